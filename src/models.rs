use serde::{Deserialize, Deserializer, Serialize};

pub type RecordId = i64;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub course: RecordId,
    #[serde(default)]
    pub course_code: Option<String>,
    #[serde(default)]
    pub course_name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub final_grade: Option<f64>,
}

impl Enrollment {
    /// Completed means explicitly inactive and graded; a missing flag is not `false`.
    pub fn is_completed(&self) -> bool {
        self.is_active == Some(false) && self.final_grade.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: RecordId,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub semester: Option<String>,
    #[serde(default)]
    pub semester_display: Option<String>,
    #[serde(default)]
    pub academic_year: Option<String>,
    #[serde(default, deserialize_with = "whole_number")]
    pub credits: Option<i32>,
    #[serde(default)]
    pub teacher_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: RecordId,
    pub course: RecordId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub weight: f64,
    #[serde(default)]
    pub max_score: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub related_pos: Vec<RecordId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentGrade {
    pub assessment: RecordId,
    pub score: f64,
    pub max_score: f64,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramOutcome {
    pub id: RecordId,
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub target_percentage: f64,
    #[serde(default = "default_true", deserialize_with = "null_as_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// `null` reads as the field's default instead of rejecting the record.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

fn null_as_true<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<bool>::deserialize(deserializer).map(|value| value.unwrap_or(true))
}

/// Accepts `3` and `3.0`; fractional or out-of-range values read as missing.
fn whole_number<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value
        .filter(|v| v.fract() == 0.0 && (f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(v))
        .map(|v| v as i32))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentPoAchievement {
    pub program_outcome: RecordId,
    #[serde(default)]
    pub achievement_percentage: Option<f64>,
}

/// Everything the calculator reads for one student. Any list may be empty.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    pub enrollments: Vec<Enrollment>,
    pub courses: Vec<Course>,
    pub assessments: Vec<Assessment>,
    pub grades: Vec<StudentGrade>,
    pub program_outcomes: Vec<ProgramOutcome>,
    pub po_achievements: Vec<StudentPoAchievement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpaPoint {
    pub semester: String,
    pub gpa: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAverage {
    pub category: String,
    pub average_grade: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpaProjection {
    pub projected: f64,
    pub trend: Option<f64>,
    pub is_excellent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PoStatus {
    #[serde(rename = "Excellent")]
    Excellent,
    #[serde(rename = "Achieved")]
    Achieved,
    #[serde(rename = "Needs Attention")]
    NeedsAttention,
}

impl PoStatus {
    pub fn label(self) -> &'static str {
        match self {
            PoStatus::Excellent => "Excellent",
            PoStatus::Achieved => "Achieved",
            PoStatus::NeedsAttention => "Needs Attention",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoStanding {
    pub code: String,
    pub title: String,
    pub target: f64,
    pub current: f64,
    pub status: PoStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRow {
    pub course: RecordId,
    pub code: String,
    pub name: String,
    pub is_active: Option<bool>,
    pub completed: bool,
    pub final_grade: Option<f64>,
    pub weighted_score: Option<f64>,
    pub po_achievement: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDashboard {
    pub current_gpa: f64,
    pub projection: GpaProjection,
    pub gpa_history: Vec<GpaPoint>,
    pub category_averages: Vec<CategoryAverage>,
    pub courses: Vec<CourseRow>,
    pub po_standings: Vec<PoStanding>,
}
