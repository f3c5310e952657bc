use anyhow::Context;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::config::AppConfig;
use crate::error::LoadError;
use crate::models::{
    Assessment, Course, Enrollment, ProgramOutcome, RecordId, RecordSet, StudentGrade,
    StudentPoAchievement,
};

pub async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(config.require_database_url()?)
        .await
        .context("failed to connect to Postgres")?;
    tracing::debug!(max_connections = config.max_connections, "connection pool ready");
    Ok(pool)
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Course columns to upsert. `None` keeps whatever the row already holds.
#[derive(Debug, PartialEq)]
struct CourseSeed<'a> {
    code: &'a str,
    name: &'a str,
    semester: Option<&'a str>,
    semester_display: Option<&'a str>,
    academic_year: Option<&'a str>,
    credits: Option<i32>,
    teacher_name: Option<&'a str>,
}

async fn upsert_student(pool: &PgPool, full_name: &str, email: &str) -> anyhow::Result<RecordId> {
    let id = sqlx::query(
        r#"
        INSERT INTO acurate.students (full_name, email)
        VALUES ($1, $2)
        ON CONFLICT (email) DO UPDATE SET full_name = EXCLUDED.full_name
        RETURNING id
        "#,
    )
    .bind(full_name)
    .bind(email)
    .fetch_one(pool)
    .await?
    .try_get("id")?;
    Ok(id)
}

async fn upsert_course(pool: &PgPool, course: &CourseSeed<'_>) -> anyhow::Result<RecordId> {
    let id = sqlx::query(
        r#"
        INSERT INTO acurate.courses
        (code, name, semester, semester_display, academic_year, credits, teacher_name)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (code) DO UPDATE
        SET name = EXCLUDED.name,
            semester = COALESCE(EXCLUDED.semester, courses.semester),
            semester_display = COALESCE(EXCLUDED.semester_display, courses.semester_display),
            academic_year = COALESCE(EXCLUDED.academic_year, courses.academic_year),
            credits = COALESCE(EXCLUDED.credits, courses.credits),
            teacher_name = COALESCE(EXCLUDED.teacher_name, courses.teacher_name)
        RETURNING id
        "#,
    )
    .bind(course.code)
    .bind(course.name)
    .bind(course.semester)
    .bind(course.semester_display)
    .bind(course.academic_year)
    .bind(course.credits)
    .bind(course.teacher_name)
    .fetch_one(pool)
    .await?
    .try_get("id")?;
    Ok(id)
}

async fn upsert_enrollment(
    pool: &PgPool,
    student_id: RecordId,
    course_id: RecordId,
    is_active: bool,
    final_grade: Option<f64>,
) -> anyhow::Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO acurate.enrollments (student_id, course_id, is_active, final_grade)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (student_id, course_id) DO UPDATE
        SET is_active = EXCLUDED.is_active, final_grade = EXCLUDED.final_grade
        "#,
    )
    .bind(student_id)
    .bind(course_id)
    .bind(is_active)
    .bind(final_grade)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let student_id = upsert_student(pool, "Deniz Arslan", "deniz.arslan@acurate.edu").await?;

    let courses = [
        (
            CourseSeed {
                code: "CS101",
                name: "Introduction to Programming",
                semester: Some("1"),
                semester_display: Some("Fall"),
                academic_year: Some("2023-2024"),
                credits: Some(4),
                teacher_name: Some("Dr. Elif Kaya"),
            },
            false,
            Some(84.0),
        ),
        (
            CourseSeed {
                code: "MATH101",
                name: "Calculus I",
                semester: Some("1"),
                semester_display: Some("Fall"),
                academic_year: Some("2023-2024"),
                credits: Some(4),
                teacher_name: Some("Dr. Murat Demir"),
            },
            false,
            Some(71.0),
        ),
        (
            CourseSeed {
                code: "CS201",
                name: "Data Structures",
                semester: Some("2"),
                semester_display: Some("Spring"),
                academic_year: Some("2023-2024"),
                credits: Some(3),
                teacher_name: Some("Dr. Elif Kaya"),
            },
            false,
            Some(88.0),
        ),
        (
            CourseSeed {
                code: "SE301",
                name: "Software Engineering",
                semester: Some("1"),
                semester_display: Some("Fall"),
                academic_year: Some("2024-2025"),
                credits: Some(3),
                teacher_name: Some("Dr. Can Yilmaz"),
            },
            false,
            Some(92.0),
        ),
        (
            CourseSeed {
                code: "CS405",
                name: "Distributed Systems",
                semester: Some("2"),
                semester_display: Some("Spring"),
                academic_year: Some("2024-2025"),
                credits: Some(3),
                teacher_name: Some("Dr. Can Yilmaz"),
            },
            true,
            None,
        ),
    ];

    let mut course_ids = Vec::with_capacity(courses.len());
    for (course, is_active, final_grade) in &courses {
        let course_id = upsert_course(pool, course).await?;
        upsert_enrollment(pool, student_id, course_id, *is_active, *final_grade).await?;
        course_ids.push(course_id);
    }

    let outcomes = [
        ("PO1", "Engineering Knowledge", 70.0, Some(81.5)),
        ("PO2", "Problem Analysis", 65.0, Some(68.0)),
        ("PO3", "Design of Solutions", 70.0, Some(62.5)),
        ("PO4", "Teamwork", 60.0, None),
    ];

    let mut outcome_ids = Vec::with_capacity(outcomes.len());
    for (code, title, target, achieved) in outcomes {
        let outcome_id: RecordId = sqlx::query(
            r#"
            INSERT INTO acurate.program_outcomes (code, title, target_percentage)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO UPDATE
            SET title = EXCLUDED.title, target_percentage = EXCLUDED.target_percentage
            RETURNING id
            "#,
        )
        .bind(code)
        .bind(title)
        .bind(target)
        .fetch_one(pool)
        .await?
        .try_get("id")?;

        sqlx::query(
            r#"
            INSERT INTO acurate.po_achievements (student_id, program_outcome_id, achievement_percentage)
            VALUES ($1, $2, $3)
            ON CONFLICT (student_id, program_outcome_id) DO UPDATE
            SET achievement_percentage = EXCLUDED.achievement_percentage
            "#,
        )
        .bind(student_id)
        .bind(outcome_id)
        .bind(achieved)
        .execute(pool)
        .await?;

        outcome_ids.push(outcome_id);
    }

    // (course index, title, weight, max score, outcome indexes, score)
    let assessments: [(usize, &str, f64, f64, &[usize], Option<f64>); 6] = [
        (0, "Midterm", 0.4, 100.0, &[0, 1], Some(78.0)),
        (0, "Final Project", 0.6, 50.0, &[0, 2], Some(44.0)),
        (2, "Lab Portfolio", 0.5, 20.0, &[1], Some(18.0)),
        (3, "Team Project", 0.7, 100.0, &[2, 3], Some(91.0)),
        (4, "Midterm", 0.3, 100.0, &[0], Some(74.0)),
        (4, "Research Paper", 0.4, 100.0, &[2], None),
    ];

    for (course_index, title, weight, max_score, outcome_indexes, score) in assessments {
        let related: Vec<RecordId> = outcome_indexes.iter().map(|i| outcome_ids[*i]).collect();
        let assessment_id: RecordId = sqlx::query(
            r#"
            INSERT INTO acurate.assessments (course_id, title, weight, max_score, related_pos)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (course_id, title) DO UPDATE
            SET weight = EXCLUDED.weight,
                max_score = EXCLUDED.max_score,
                related_pos = EXCLUDED.related_pos
            RETURNING id
            "#,
        )
        .bind(course_ids[course_index])
        .bind(title)
        .bind(weight)
        .bind(max_score)
        .bind(related.as_slice())
        .fetch_one(pool)
        .await?
        .try_get("id")?;

        let Some(score) = score else {
            continue;
        };
        sqlx::query(
            r#"
            INSERT INTO acurate.student_grades (student_id, assessment_id, score, max_score)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (student_id, assessment_id) DO UPDATE
            SET score = EXCLUDED.score, max_score = EXCLUDED.max_score
            "#,
        )
        .bind(student_id)
        .bind(assessment_id)
        .bind(score)
        .bind(max_score)
        .execute(pool)
        .await?;
    }

    tracing::info!(student_id, courses = course_ids.len(), "seed data applied");
    Ok(())
}

pub async fn find_student(pool: &PgPool, email: &str) -> anyhow::Result<RecordId> {
    let row = sqlx::query("SELECT id FROM acurate.students WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
        .context("failed to look up student")?;

    match row {
        Some(row) => Ok(row.try_get("id")?),
        None => Err(LoadError::StudentNotFound(email.to_string()).into()),
    }
}

/// Resolves the student, then runs the six record queries concurrently. A
/// query that fails contributes an empty list instead of aborting the load.
pub async fn load_records(pool: &PgPool, email: &str) -> anyhow::Result<RecordSet> {
    let student_id = find_student(pool, email).await?;

    let (enrollments, courses, assessments, grades, program_outcomes, po_achievements) = tokio::join!(
        fetch_enrollments(pool, student_id),
        fetch_courses(pool, student_id),
        fetch_assessments(pool, student_id),
        fetch_grades(pool, student_id),
        fetch_program_outcomes(pool),
        fetch_po_achievements(pool, student_id),
    );

    let records = RecordSet {
        enrollments: or_empty("enrollments", enrollments),
        courses: or_empty("courses", courses),
        assessments: or_empty("assessments", assessments),
        grades: or_empty("grades", grades),
        program_outcomes: or_empty("program_outcomes", program_outcomes),
        po_achievements: or_empty("po_achievements", po_achievements),
    };
    tracing::info!(
        student_id,
        enrollments = records.enrollments.len(),
        assessments = records.assessments.len(),
        "records loaded"
    );
    Ok(records)
}

fn or_empty<T>(section: &str, result: Result<Vec<T>, sqlx::Error>) -> Vec<T> {
    match result {
        Ok(records) => records,
        Err(err) => {
            tracing::warn!(section, error = %err, "fetch failed, continuing with no records");
            Vec::new()
        }
    }
}

async fn fetch_enrollments(
    pool: &PgPool,
    student_id: RecordId,
) -> Result<Vec<Enrollment>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT e.course_id, c.code, c.name, e.is_active, e.final_grade \
         FROM acurate.enrollments e \
         JOIN acurate.courses c ON c.id = e.course_id \
         WHERE e.student_id = $1 \
         ORDER BY e.id",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(enrollment_from_row).collect()
}

fn enrollment_from_row(row: &PgRow) -> Result<Enrollment, sqlx::Error> {
    Ok(Enrollment {
        course: row.try_get("course_id")?,
        course_code: row.try_get("code")?,
        course_name: row.try_get("name")?,
        is_active: row.try_get("is_active")?,
        final_grade: row.try_get("final_grade")?,
    })
}

async fn fetch_courses(pool: &PgPool, student_id: RecordId) -> Result<Vec<Course>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT c.id, c.code, c.name, c.semester, c.semester_display, c.academic_year, \
         c.credits, c.teacher_name \
         FROM acurate.courses c \
         WHERE c.id IN (SELECT course_id FROM acurate.enrollments WHERE student_id = $1) \
         ORDER BY c.id",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(course_from_row).collect()
}

fn course_from_row(row: &PgRow) -> Result<Course, sqlx::Error> {
    Ok(Course {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        semester: row.try_get("semester")?,
        semester_display: row.try_get("semester_display")?,
        academic_year: row.try_get("academic_year")?,
        credits: row.try_get("credits")?,
        teacher_name: row.try_get("teacher_name")?,
    })
}

async fn fetch_assessments(
    pool: &PgPool,
    student_id: RecordId,
) -> Result<Vec<Assessment>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT a.id, a.course_id, a.title, a.weight, a.max_score, a.related_pos \
         FROM acurate.assessments a \
         WHERE a.course_id IN (SELECT course_id FROM acurate.enrollments WHERE student_id = $1) \
         ORDER BY a.id",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(assessment_from_row).collect()
}

fn assessment_from_row(row: &PgRow) -> Result<Assessment, sqlx::Error> {
    Ok(Assessment {
        id: row.try_get("id")?,
        course: row.try_get("course_id")?,
        title: row.try_get("title")?,
        weight: row.try_get("weight")?,
        max_score: row.try_get("max_score")?,
        related_pos: row.try_get("related_pos")?,
    })
}

async fn fetch_grades(pool: &PgPool, student_id: RecordId) -> Result<Vec<StudentGrade>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT assessment_id, score, max_score, feedback \
         FROM acurate.student_grades \
         WHERE student_id = $1 \
         ORDER BY id",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(grade_from_row).collect()
}

fn grade_from_row(row: &PgRow) -> Result<StudentGrade, sqlx::Error> {
    Ok(StudentGrade {
        assessment: row.try_get("assessment_id")?,
        score: row.try_get("score")?,
        max_score: row.try_get("max_score")?,
        feedback: row.try_get("feedback")?,
    })
}

async fn fetch_program_outcomes(pool: &PgPool) -> Result<Vec<ProgramOutcome>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, code, title, description, target_percentage, is_active \
         FROM acurate.program_outcomes \
         ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(outcome_from_row).collect()
}

fn outcome_from_row(row: &PgRow) -> Result<ProgramOutcome, sqlx::Error> {
    Ok(ProgramOutcome {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        target_percentage: row.try_get("target_percentage")?,
        is_active: row.try_get("is_active")?,
    })
}

async fn fetch_po_achievements(
    pool: &PgPool,
    student_id: RecordId,
) -> Result<Vec<StudentPoAchievement>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT program_outcome_id, achievement_percentage \
         FROM acurate.po_achievements \
         WHERE student_id = $1 \
         ORDER BY id",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(achievement_from_row).collect()
}

fn achievement_from_row(row: &PgRow) -> Result<StudentPoAchievement, sqlx::Error> {
    Ok(StudentPoAchievement {
        program_outcome: row.try_get("program_outcome_id")?,
        achievement_percentage: row.try_get("achievement_percentage")?,
    })
}

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    full_name: String,
    email: String,
    course_code: String,
    course_name: String,
    semester: Option<String>,
    semester_display: Option<String>,
    academic_year: Option<String>,
    credits: Option<i32>,
    teacher_name: Option<String>,
    final_grade: Option<f64>,
    is_active: bool,
}

fn validate_row(row: &CsvRow) -> anyhow::Result<()> {
    anyhow::ensure!(!row.email.trim().is_empty(), "email is required");
    anyhow::ensure!(!row.course_code.trim().is_empty(), "course_code is required");
    if let Some(grade) = row.final_grade {
        anyhow::ensure!(
            (0.0..=100.0).contains(&grade),
            "final_grade {grade} is outside 0-100"
        );
    }
    Ok(())
}

fn blank_as_none(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn course_seed(row: &CsvRow) -> CourseSeed<'_> {
    CourseSeed {
        code: row.course_code.trim(),
        name: &row.course_name,
        semester: blank_as_none(&row.semester),
        semester_display: blank_as_none(&row.semester_display),
        academic_year: blank_as_none(&row.academic_year),
        credits: row.credits,
        teacher_name: blank_as_none(&row.teacher_name),
    }
}

/// Upserts students, courses and enrollments from a CSV export and returns the
/// number of enrollment rows written.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut written = 0usize;

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("invalid CSV row at line {line}"))?;
        validate_row(&row).with_context(|| format!("rejected CSV row at line {line}"))?;

        let student_id = upsert_student(pool, &row.full_name, row.email.trim()).await?;
        let course_id = upsert_course(pool, &course_seed(&row)).await?;

        if upsert_enrollment(pool, student_id, course_id, row.is_active, row.final_grade).await? > 0 {
            written += 1;
        }
    }

    tracing::info!(path = %csv_path.display(), written, "csv import finished");
    Ok(written)
}
