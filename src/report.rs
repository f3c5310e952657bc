use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{CourseRow, StudentDashboard};

/// A zero PO achievement means no matching data, shown as a dash.
pub fn format_po_achievement(value: f64) -> String {
    if value > 0.0 {
        format!("{value:.1}%")
    } else {
        "-".to_string()
    }
}

fn format_optional_percent(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.1}%"))
        .unwrap_or_else(|| "-".to_string())
}

fn course_status(course: &CourseRow) -> &'static str {
    if course.completed {
        "Completed"
    } else if course.is_active == Some(true) {
        "Active"
    } else {
        "-"
    }
}

fn format_trend(trend: Option<f64>) -> String {
    match trend {
        Some(value) => format!("{value:+.2}"),
        None => "n/a".to_string(),
    }
}

pub fn render_summary(label: &str, dashboard: &StudentDashboard) -> String {
    let mut output = String::new();
    let projection = &dashboard.projection;

    let _ = writeln!(output, "Academic summary for {label}");
    let _ = writeln!(
        output,
        "Current GPA {:.2}, projected {:.2}{} (trend {})",
        dashboard.current_gpa,
        projection.projected,
        if projection.is_excellent { " [excellent]" } else { "" },
        format_trend(projection.trend)
    );

    if dashboard.gpa_history.is_empty() {
        let _ = writeln!(output, "No completed courses yet.");
    } else {
        let _ = writeln!(output, "GPA history:");
        for point in &dashboard.gpa_history {
            let _ = writeln!(output, "- {}: {:.2}", point.semester, point.gpa);
        }
    }

    if !dashboard.category_averages.is_empty() {
        let _ = writeln!(output, "Category averages:");
        for category in &dashboard.category_averages {
            let _ = writeln!(output, "- {}: {:.2}", category.category, category.average_grade);
        }
    }

    if !dashboard.po_standings.is_empty() {
        let _ = writeln!(output, "Program outcomes:");
        for standing in &dashboard.po_standings {
            let _ = writeln!(
                output,
                "- {} {:.1}% of {:.1}% target: {}",
                standing.code,
                standing.current,
                standing.target,
                standing.status.label()
            );
        }
    }

    output
}

pub fn build_report(
    label: &str,
    dashboard: &StudentDashboard,
    generated_at: DateTime<Utc>,
) -> String {
    let mut output = String::new();
    let projection = &dashboard.projection;

    let _ = writeln!(output, "# Student Academic Report");
    let _ = writeln!(
        output,
        "Generated for {} on {}",
        label,
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## GPA");
    let _ = writeln!(output, "- Current: {:.2}", dashboard.current_gpa);
    let _ = writeln!(
        output,
        "- Projected: {:.2}{}",
        projection.projected,
        if projection.is_excellent { " (excellent)" } else { "" }
    );
    let _ = writeln!(output, "- Trend: {}", format_trend(projection.trend));

    let _ = writeln!(output);
    let _ = writeln!(output, "## GPA History");
    if dashboard.gpa_history.is_empty() {
        let _ = writeln!(output, "No completed courses yet.");
    } else {
        for point in &dashboard.gpa_history {
            let _ = writeln!(output, "- {}: {:.2}", point.semester, point.gpa);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Category Averages");
    if dashboard.category_averages.is_empty() {
        let _ = writeln!(output, "No graded courses yet.");
    } else {
        for category in &dashboard.category_averages {
            let _ = writeln!(output, "- {}: {:.2}", category.category, category.average_grade);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Courses");
    if dashboard.courses.is_empty() {
        let _ = writeln!(output, "No enrollments recorded.");
    } else {
        let _ = writeln!(output, "| Course | Name | Status | Final | Weighted | PO |");
        let _ = writeln!(output, "|---|---|---|---|---|---|");
        for course in &dashboard.courses {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {} |",
                course.code,
                course.name,
                course_status(course),
                course
                    .final_grade
                    .map(|g| format!("{g:.1}"))
                    .unwrap_or_else(|| "-".to_string()),
                format_optional_percent(course.weighted_score),
                format_po_achievement(course.po_achievement)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Program Outcomes");
    if dashboard.po_standings.is_empty() {
        let _ = writeln!(output, "No active program outcomes.");
    } else {
        for standing in &dashboard.po_standings {
            let _ = writeln!(
                output,
                "- {} {}: {:.1}% (target {:.1}%) {}",
                standing.code,
                standing.title,
                standing.current,
                standing.target,
                standing.status.label()
            );
        }
    }

    output
}
