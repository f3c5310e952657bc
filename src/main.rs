use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod metrics;
mod models;
mod report;
mod snapshot;

use config::AppConfig;
use models::RecordSet;

#[derive(Parser)]
#[command(name = "acurate-metrics")]
#[command(about = "Derived academic metrics for AcuRate student dashboards", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("source")
        .args(["email", "snapshot"])
        .required(true)
        .multiple(false)
))]
struct Source {
    /// Load records for this student from Postgres
    #[arg(long)]
    email: Option<String>,
    /// Load records from a JSON snapshot file
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// Cumulative GPA to project from; computed from enrollments when omitted
    #[arg(long)]
    current_gpa: Option<f64>,
}

impl Source {
    fn label(&self) -> String {
        match (&self.email, &self.snapshot) {
            (Some(email), _) => email.clone(),
            (None, Some(path)) => path.display().to_string(),
            (None, None) => "unknown source".to_string(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import enrollments from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print a student's derived metrics
    Summary {
        #[command(flatten)]
        source: Source,
        /// Emit the dashboard as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        source: Source,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config::DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn load_source(config: &AppConfig, source: &Source) -> anyhow::Result<RecordSet> {
    if let Some(path) = &source.snapshot {
        return Ok(snapshot::load(path)?);
    }
    let email = source
        .email
        .as_deref()
        .context("either --email or --snapshot is required")?;
    let pool = db::connect(config).await?;
    db::load_records(&pool, email).await
}

fn check_current_gpa(value: Option<f64>) -> anyhow::Result<()> {
    if let Some(gpa) = value {
        anyhow::ensure!(
            (0.0..=metrics::GPA_SCALE).contains(&gpa),
            "--current-gpa must be between 0 and {}",
            metrics::GPA_SCALE
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::InitDb => {
            let pool = db::connect(&config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = db::connect(&config).await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let pool = db::connect(&config).await?;
            let written = db::import_csv(&pool, &csv).await?;
            println!("Imported {written} enrollments from {}.", csv.display());
        }
        Commands::Summary { source, json } => {
            check_current_gpa(source.current_gpa)?;
            let records = load_source(&config, &source).await?;
            let dashboard = metrics::build_dashboard(&records, source.current_gpa);

            if json {
                println!("{}", serde_json::to_string_pretty(&dashboard)?);
            } else {
                print!("{}", report::render_summary(&source.label(), &dashboard));
            }
        }
        Commands::Report { source, out } => {
            check_current_gpa(source.current_gpa)?;
            let records = load_source(&config, &source).await?;
            let dashboard = metrics::build_dashboard(&records, source.current_gpa);
            let report = report::build_report(&source.label(), &dashboard, chrono::Utc::now());
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
