use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::models::{
    Assessment, CategoryAverage, Course, CourseRow, Enrollment, GpaPoint, GpaProjection, PoStanding,
    PoStatus, ProgramOutcome, RecordId, RecordSet, StudentDashboard, StudentGrade,
    StudentPoAchievement,
};

pub const GPA_SCALE: f64 = 4.0;
pub const GPA_HISTORY_LIMIT: usize = 5;
pub const EXCELLENT_GPA: f64 = 3.75;
pub const OTHER_CATEGORY: &str = "Other";

static CATEGORY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[A-Z]+").expect("valid regex"));

pub fn grade_to_gpa(grade: f64) -> f64 {
    grade / 100.0 * GPA_SCALE
}

/// `Math.round(x * 10) / 10`: halves round toward positive infinity.
pub fn round_one_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

fn index_courses(courses: &[Course]) -> HashMap<RecordId, &Course> {
    let mut index = HashMap::with_capacity(courses.len());
    for course in courses {
        index.entry(course.id).or_insert(course);
    }
    index
}

fn semester_label(course: Option<&Course>, position: usize) -> String {
    let label = course
        .map(|course| {
            let term = course
                .semester_display
                .as_deref()
                .filter(|value| !value.is_empty())
                .or(course.semester.as_deref())
                .unwrap_or("");
            let year = course.academic_year.as_deref().unwrap_or("");
            format!("{term} {year}").trim().to_string()
        })
        .unwrap_or_default();

    if label.is_empty() {
        format!("Semester {position}")
    } else {
        label
    }
}

pub fn course_category(course: Option<&Course>) -> String {
    course
        .and_then(|course| course.code.as_deref())
        .and_then(|code| CATEGORY_RE.find(code))
        .map(|found| found.as_str().to_string())
        .unwrap_or_else(|| OTHER_CATEGORY.to_string())
}

/// GPA per completed enrollment in input order, keeping only the most recent
/// `GPA_HISTORY_LIMIT` points.
pub fn gpa_history(enrollments: &[Enrollment], courses: &[Course]) -> Vec<GpaPoint> {
    let index = index_courses(courses);

    let points: Vec<GpaPoint> = enrollments
        .iter()
        .filter(|enrollment| enrollment.is_completed())
        .enumerate()
        .filter_map(|(position, enrollment)| {
            let grade = enrollment.final_grade?;
            let course = index.get(&enrollment.course).copied();
            Some(GpaPoint {
                semester: semester_label(course, position + 1),
                gpa: grade_to_gpa(grade),
            })
        })
        .collect();

    let skip = points.len().saturating_sub(GPA_HISTORY_LIMIT);
    points.into_iter().skip(skip).collect()
}

/// Mean GPA per course-code prefix, in order of first appearance.
pub fn category_averages(enrollments: &[Enrollment], courses: &[Course]) -> Vec<CategoryAverage> {
    let index = index_courses(courses);
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<f64>)> = Vec::new();

    for enrollment in enrollments {
        let Some(grade) = enrollment.final_grade else {
            continue;
        };
        let category = course_category(index.get(&enrollment.course).copied());
        let slot = *slots.entry(category.clone()).or_insert_with(|| {
            groups.push((category, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(grade_to_gpa(grade));
    }

    groups
        .into_iter()
        .map(|(category, values)| CategoryAverage {
            category,
            average_grade: values.iter().sum::<f64>() / values.len() as f64,
        })
        .collect()
}

/// Two-point trend continued two steps ahead from the current GPA.
pub fn project_gpa(history: &[GpaPoint], current_gpa: f64) -> GpaProjection {
    let (projected, trend) = match history {
        [.., previous, last] => {
            let trend = last.gpa - previous.gpa;
            let projected = (current_gpa + trend * 2.0).clamp(0.0, GPA_SCALE);
            (projected, Some(trend))
        }
        _ => (current_gpa, None),
    };

    GpaProjection {
        projected,
        trend,
        is_excellent: projected >= EXCELLENT_GPA,
    }
}

/// Mean achievement over the outcomes touched by a course's assessments, or 0
/// when nothing matches.
pub fn course_po_achievement(
    course_id: RecordId,
    assessments: &[Assessment],
    achievements: &[StudentPoAchievement],
) -> f64 {
    let outcome_ids: HashSet<RecordId> = assessments
        .iter()
        .filter(|assessment| assessment.course == course_id)
        .flat_map(|assessment| assessment.related_pos.iter().copied())
        .collect();

    let matched: Vec<f64> = achievements
        .iter()
        .filter(|achievement| outcome_ids.contains(&achievement.program_outcome))
        .map(|achievement| achievement.achievement_percentage.unwrap_or(0.0))
        .collect();

    if matched.is_empty() {
        return 0.0;
    }

    round_one_decimal(matched.iter().sum::<f64>() / matched.len() as f64)
}

impl PoStatus {
    /// Both boundaries belong to the higher label. The 110% check is done in
    /// integer-friendly form so `82.5` against `75` lands on `Excellent`.
    pub fn classify(current: f64, target: f64) -> PoStatus {
        if current * 10.0 >= target * 11.0 {
            PoStatus::Excellent
        } else if current >= target {
            PoStatus::Achieved
        } else {
            PoStatus::NeedsAttention
        }
    }
}

/// Weighted mean percentage over the graded assessments of a course,
/// normalised by the weights actually present.
pub fn weighted_course_score(
    course_id: RecordId,
    assessments: &[Assessment],
    grades: &[StudentGrade],
) -> Option<f64> {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    for assessment in assessments.iter().filter(|a| a.course == course_id) {
        let Some(grade) = grades
            .iter()
            .find(|grade| grade.assessment == assessment.id && grade.max_score > 0.0)
        else {
            continue;
        };
        let percent = grade.score / grade.max_score * 100.0;
        weighted_sum += percent * assessment.weight;
        weight_total += assessment.weight;
    }

    if weight_total > 0.0 {
        Some(weighted_sum / weight_total)
    } else {
        None
    }
}

/// Credit-weighted GPA over completed enrollments. Courses without credits weigh 1.
pub fn cumulative_gpa(enrollments: &[Enrollment], courses: &[Course]) -> f64 {
    let index = index_courses(courses);
    let mut points = 0.0;
    let mut credits = 0.0;

    for enrollment in enrollments.iter().filter(|e| e.is_completed()) {
        let Some(grade) = enrollment.final_grade else {
            continue;
        };
        let weight = index
            .get(&enrollment.course)
            .and_then(|course| course.credits)
            .filter(|credits| *credits > 0)
            .map(f64::from)
            .unwrap_or(1.0);
        points += grade_to_gpa(grade) * weight;
        credits += weight;
    }

    if credits > 0.0 {
        points / credits
    } else {
        0.0
    }
}

pub fn po_standings(
    outcomes: &[ProgramOutcome],
    achievements: &[StudentPoAchievement],
) -> Vec<PoStanding> {
    outcomes
        .iter()
        .filter(|outcome| outcome.is_active)
        .map(|outcome| {
            let current = achievements
                .iter()
                .find(|achievement| achievement.program_outcome == outcome.id)
                .and_then(|achievement| achievement.achievement_percentage)
                .unwrap_or(0.0);
            PoStanding {
                code: outcome.code.clone(),
                title: outcome.title.clone(),
                target: outcome.target_percentage,
                current,
                status: PoStatus::classify(current, outcome.target_percentage),
            }
        })
        .collect()
}

pub fn build_dashboard(records: &RecordSet, current_gpa: Option<f64>) -> StudentDashboard {
    let index = index_courses(&records.courses);
    let gpa_history = gpa_history(&records.enrollments, &records.courses);
    let current_gpa =
        current_gpa.unwrap_or_else(|| cumulative_gpa(&records.enrollments, &records.courses));
    let projection = project_gpa(&gpa_history, current_gpa);

    let courses = records
        .enrollments
        .iter()
        .map(|enrollment| {
            let course = index.get(&enrollment.course).copied();
            let code = enrollment
                .course_code
                .clone()
                .or_else(|| course.and_then(|c| c.code.clone()))
                .unwrap_or_default();
            let name = enrollment
                .course_name
                .clone()
                .or_else(|| course.and_then(|c| c.name.clone()))
                .unwrap_or_default();
            CourseRow {
                course: enrollment.course,
                code,
                name,
                is_active: enrollment.is_active,
                completed: enrollment.is_completed(),
                final_grade: enrollment.final_grade,
                weighted_score: weighted_course_score(
                    enrollment.course,
                    &records.assessments,
                    &records.grades,
                ),
                po_achievement: course_po_achievement(
                    enrollment.course,
                    &records.assessments,
                    &records.po_achievements,
                ),
            }
        })
        .collect();

    StudentDashboard {
        current_gpa,
        projection,
        gpa_history,
        category_averages: category_averages(&records.enrollments, &records.courses),
        courses,
        po_standings: po_standings(&records.program_outcomes, &records.po_achievements),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const EPS: f64 = 1e-9;

    fn completed(course: RecordId, grade: f64) -> Enrollment {
        Enrollment {
            course,
            is_active: Some(false),
            final_grade: Some(grade),
            ..Enrollment::default()
        }
    }

    fn active(course: RecordId) -> Enrollment {
        Enrollment {
            course,
            is_active: Some(true),
            ..Enrollment::default()
        }
    }

    fn course(id: RecordId, code: &str, semester: &str, year: &str) -> Course {
        Course {
            id,
            code: Some(code.to_string()),
            semester_display: Some(semester.to_string()),
            academic_year: Some(year.to_string()),
            credits: Some(3),
            ..Course::default()
        }
    }

    fn point(gpa: f64) -> GpaPoint {
        GpaPoint {
            semester: "Fall 2025".to_string(),
            gpa,
        }
    }

    fn assessment(id: RecordId, course: RecordId, weight: f64, pos: &[RecordId]) -> Assessment {
        Assessment {
            id,
            course,
            weight,
            related_pos: pos.to_vec(),
            ..Assessment::default()
        }
    }

    fn achievement(outcome: RecordId, pct: f64) -> StudentPoAchievement {
        StudentPoAchievement {
            program_outcome: outcome,
            achievement_percentage: Some(pct),
        }
    }

    #[test]
    fn history_keeps_only_completed_enrollments() {
        let enrollments = vec![
            completed(1, 88.0),
            Enrollment {
                course: 2,
                is_active: Some(true),
                final_grade: None,
                ..Enrollment::default()
            },
        ];
        let courses = vec![course(1, "CS301", "Fall", "2024-2025")];

        let history = gpa_history(&enrollments, &courses);
        assert_eq!(history.len(), 1);
        assert!((history[0].gpa - 3.52).abs() < EPS);
        assert_eq!(history[0].semester, "Fall 2024-2025");
    }

    #[test]
    fn history_requires_explicit_inactive_flag() {
        let enrollments = vec![Enrollment {
            course: 1,
            is_active: None,
            final_grade: Some(90.0),
            ..Enrollment::default()
        }];
        assert!(gpa_history(&enrollments, &[]).is_empty());
    }

    #[test]
    fn history_keeps_last_five_in_input_order() {
        let grades = [60.0, 95.0, 70.0, 85.0, 50.0, 100.0, 75.0];
        let enrollments: Vec<Enrollment> = grades
            .iter()
            .enumerate()
            .map(|(i, grade)| completed(i as RecordId, *grade))
            .collect();

        let history = gpa_history(&enrollments, &[]);
        let gpas: Vec<f64> = history.iter().map(|p| p.gpa).collect();
        let expected: Vec<f64> = grades[2..].iter().map(|g| g / 100.0 * 4.0).collect();
        assert_eq!(gpas.len(), GPA_HISTORY_LIMIT);
        for (got, want) in gpas.iter().zip(expected.iter()) {
            assert!((got - want).abs() < EPS);
        }
        assert_eq!(history[0].semester, "Semester 3");
        assert_eq!(history[4].semester, "Semester 7");
    }

    #[test]
    fn history_label_falls_back_to_semester_and_position() {
        let courses = vec![
            Course {
                id: 1,
                semester: Some("2".to_string()),
                semester_display: Some(String::new()),
                academic_year: Some("2025".to_string()),
                ..Course::default()
            },
            Course {
                id: 2,
                ..Course::default()
            },
        ];
        let enrollments = vec![completed(1, 80.0), completed(2, 80.0), completed(9, 80.0)];

        let labels: Vec<String> = gpa_history(&enrollments, &courses)
            .into_iter()
            .map(|p| p.semester)
            .collect();
        assert_eq!(labels, vec!["2 2025", "Semester 2", "Semester 3"]);
    }

    #[test]
    fn history_never_exceeds_completed_count() {
        let enrollments = vec![completed(1, 70.0), active(2), completed(3, 90.0)];
        let history = gpa_history(&enrollments, &[]);
        assert!(history.len() <= 2);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn empty_inputs_give_empty_sequences() {
        assert!(gpa_history(&[], &[]).is_empty());
        assert!(category_averages(&[], &[]).is_empty());
        assert_eq!(cumulative_gpa(&[], &[]), 0.0);
    }

    #[test]
    fn single_course_forms_its_own_category() {
        let enrollments = vec![completed(1, 90.0)];
        let courses = vec![course(1, "SE405", "Spring", "2025")];

        let averages = category_averages(&enrollments, &courses);
        assert_eq!(averages.len(), 1);
        assert_eq!(averages[0].category, "SE");
        assert!((averages[0].average_grade - 3.6).abs() < EPS);
    }

    #[test]
    fn categories_follow_first_appearance_and_partition_grades() {
        let courses = vec![
            course(1, "MATH101", "Fall", "2024"),
            course(2, "CS201", "Fall", "2024"),
            course(3, "MATH202", "Spring", "2025"),
            course(4, "101", "Spring", "2025"),
        ];
        let enrollments = vec![
            completed(1, 80.0),
            completed(2, 90.0),
            completed(3, 60.0),
            completed(4, 50.0),
            completed(99, 100.0),
            active(2),
        ];

        let averages = category_averages(&enrollments, &courses);
        let names: Vec<&str> = averages.iter().map(|a| a.category.as_str()).collect();
        assert_eq!(names, vec!["MATH", "CS", "Other"]);
        assert!((averages[0].average_grade - 2.8).abs() < EPS);
        assert!((averages[1].average_grade - 3.6).abs() < EPS);
        assert!((averages[2].average_grade - 3.0).abs() < EPS);

        let regrouped: f64 = averages[0].average_grade * 2.0
            + averages[1].average_grade
            + averages[2].average_grade * 2.0;
        let direct: f64 = [80.0, 90.0, 60.0, 50.0, 100.0]
            .iter()
            .map(|g| grade_to_gpa(*g))
            .sum();
        assert!((regrouped - direct).abs() < EPS);
    }

    #[test]
    fn categories_include_graded_active_enrollments() {
        let enrollments = vec![Enrollment {
            course: 1,
            is_active: Some(true),
            final_grade: Some(75.0),
            ..Enrollment::default()
        }];
        let courses = vec![course(1, "EE210", "Fall", "2025")];
        let averages = category_averages(&enrollments, &courses);
        assert_eq!(averages[0].category, "EE");
        assert!(gpa_history(&enrollments, &courses).is_empty());
    }

    #[test]
    fn projection_clamps_rising_trend() {
        let projection = project_gpa(&[point(3.2), point(3.5)], 3.5);
        let trend = projection.trend.unwrap_or_default();
        assert!((trend - 0.3).abs() < EPS);
        assert_eq!(projection.projected, 4.0);
        assert!(projection.is_excellent);
    }

    #[test]
    fn projection_without_enough_history_is_current_gpa() {
        let projection = project_gpa(&[point(3.0)], 2.9);
        assert_eq!(projection.projected, 2.9);
        assert_eq!(projection.trend, None);
        assert!(!projection.is_excellent);

        assert_eq!(project_gpa(&[], 3.8).projected, 3.8);
    }

    #[test]
    fn projection_stays_in_range_for_extreme_trends() {
        let falling = project_gpa(&[point(4.0), point(0.0)], 0.5);
        assert_eq!(falling.projected, 0.0);

        let rising = project_gpa(&[point(1.0), point(0.0), point(4.0)], 3.9);
        assert_eq!(rising.projected, 4.0);

        let flat = project_gpa(&[point(3.0), point(3.0)], 3.1);
        assert!((flat.projected - 3.1).abs() < EPS);
    }

    #[test]
    fn projection_uses_only_last_two_points() {
        let projection = project_gpa(&[point(1.0), point(3.0), point(2.9)], 3.0);
        assert!((projection.projected - 2.8).abs() < EPS);
        assert!(!projection.is_excellent);
    }

    #[test]
    fn course_po_achievement_averages_distinct_outcomes() {
        let assessments = vec![
            assessment(1, 10, 0.4, &[1, 2]),
            assessment(2, 10, 0.6, &[2, 3]),
            assessment(3, 20, 1.0, &[4]),
        ];
        let achievements = vec![
            achievement(1, 80.0),
            achievement(2, 71.0),
            achievement(3, 66.0),
            achievement(4, 10.0),
        ];

        let value = course_po_achievement(10, &assessments, &achievements);
        assert!((value - 72.3).abs() < EPS);
    }

    #[test]
    fn course_po_achievement_without_data_is_zero() {
        let achievements = vec![achievement(1, 90.0)];
        assert_eq!(course_po_achievement(10, &[], &achievements), 0.0);
        assert_eq!(
            course_po_achievement(10, &[assessment(1, 10, 1.0, &[])], &achievements),
            0.0
        );
        assert_eq!(
            course_po_achievement(10, &[assessment(1, 10, 1.0, &[7])], &achievements),
            0.0
        );
    }

    #[test]
    fn course_po_achievement_counts_missing_percentage_as_zero() {
        let achievements = vec![
            achievement(1, 90.0),
            StudentPoAchievement {
                program_outcome: 2,
                achievement_percentage: None,
            },
        ];
        let value = course_po_achievement(10, &[assessment(1, 10, 1.0, &[1, 2])], &achievements);
        assert_eq!(value, 45.0);
    }

    #[test]
    fn rounding_matches_half_up() {
        assert_eq!(round_one_decimal(72.25), 72.3);
        assert_eq!(round_one_decimal(66.64), 66.6);
        assert_eq!(round_one_decimal(0.0), 0.0);
    }

    #[test]
    fn status_boundaries_are_inclusive_upward() {
        assert_matches!(PoStatus::classify(75.0, 75.0), PoStatus::Achieved);
        assert_matches!(PoStatus::classify(82.5, 75.0), PoStatus::Excellent);
        assert_matches!(PoStatus::classify(74.9, 75.0), PoStatus::NeedsAttention);
        assert_matches!(PoStatus::classify(82.4, 75.0), PoStatus::Achieved);
        assert_matches!(PoStatus::classify(77.0, 70.0), PoStatus::Excellent);
    }

    #[test]
    fn status_is_total_over_targets() {
        for target in [1.0, 50.0, 60.0, 70.0, 80.0, 100.0] {
            for step in 0..=150 {
                let current = step as f64;
                let status = PoStatus::classify(current, target);
                let expected = if current >= target * 1.1 + 1e-9 {
                    Some(PoStatus::Excellent)
                } else if current < target {
                    Some(PoStatus::NeedsAttention)
                } else if current < target * 1.1 - 1e-9 {
                    Some(PoStatus::Achieved)
                } else {
                    None
                };
                if let Some(expected) = expected {
                    assert_eq!(status, expected, "current {current} target {target}");
                }
            }
        }
    }

    #[test]
    fn weighted_score_normalises_by_present_weights() {
        let assessments = vec![
            assessment(1, 10, 0.2, &[]),
            assessment(2, 10, 0.3, &[]),
            assessment(3, 10, 0.5, &[]),
        ];
        let grades = vec![
            StudentGrade {
                assessment: 1,
                score: 40.0,
                max_score: 50.0,
                feedback: None,
            },
            StudentGrade {
                assessment: 2,
                score: 60.0,
                max_score: 100.0,
                feedback: Some("ok".to_string()),
            },
        ];

        let score = weighted_course_score(10, &assessments, &grades).unwrap_or_default();
        assert!((score - 68.0).abs() < EPS);
        assert_eq!(weighted_course_score(20, &assessments, &grades), None);
    }

    #[test]
    fn weighted_score_skips_zero_max_score() {
        let assessments = vec![assessment(1, 10, 1.0, &[])];
        let grades = vec![StudentGrade {
            assessment: 1,
            score: 5.0,
            max_score: 0.0,
            feedback: None,
        }];
        assert_eq!(weighted_course_score(10, &assessments, &grades), None);
    }

    #[test]
    fn cumulative_gpa_weights_by_credits() {
        let mut heavy = course(1, "CS101", "Fall", "2024");
        heavy.credits = Some(4);
        let mut uncredited = course(2, "HIS100", "Fall", "2024");
        uncredited.credits = None;
        let enrollments = vec![completed(1, 100.0), completed(2, 50.0), active(1)];

        let gpa = cumulative_gpa(&enrollments, &[heavy, uncredited]);
        assert!((gpa - (4.0 * 4.0 + 2.0) / 5.0).abs() < EPS);
    }

    #[test]
    fn standings_skip_inactive_outcomes() {
        let outcomes = vec![
            ProgramOutcome {
                id: 1,
                code: "PO1".to_string(),
                title: "Engineering knowledge".to_string(),
                description: None,
                target_percentage: 70.0,
                is_active: true,
            },
            ProgramOutcome {
                id: 2,
                code: "PO2".to_string(),
                title: "Retired".to_string(),
                description: None,
                target_percentage: 70.0,
                is_active: false,
            },
            ProgramOutcome {
                id: 3,
                code: "PO3".to_string(),
                title: "Design".to_string(),
                description: None,
                target_percentage: 60.0,
                is_active: true,
            },
        ];
        let standings = po_standings(&outcomes, &[achievement(1, 80.0)]);

        assert_eq!(standings.len(), 2);
        assert_eq!(standings[0].status, PoStatus::Excellent);
        assert_eq!(standings[1].code, "PO3");
        assert_eq!(standings[1].current, 0.0);
        assert_eq!(standings[1].status, PoStatus::NeedsAttention);
    }

    #[test]
    fn dashboard_composes_every_view() {
        let records = RecordSet {
            enrollments: vec![completed(1, 80.0), completed(2, 90.0), active(3)],
            courses: vec![
                course(1, "CS101", "Fall", "2024"),
                course(2, "CS201", "Spring", "2025"),
                course(3, "MATH301", "Fall", "2025"),
            ],
            assessments: vec![assessment(1, 3, 1.0, &[1])],
            grades: vec![StudentGrade {
                assessment: 1,
                score: 18.0,
                max_score: 20.0,
                feedback: None,
            }],
            program_outcomes: Vec::new(),
            po_achievements: vec![achievement(1, 77.0)],
        };

        let dashboard = build_dashboard(&records, None);
        assert_eq!(dashboard.gpa_history.len(), 2);
        assert!((dashboard.current_gpa - 3.4).abs() < EPS);
        assert!((dashboard.projection.projected - 4.0).abs() < EPS);
        assert_eq!(dashboard.courses.len(), 3);
        assert_eq!(dashboard.courses[2].code, "MATH301");
        assert_eq!(dashboard.courses[2].po_achievement, 77.0);
        assert!((dashboard.courses[2].weighted_score.unwrap_or_default() - 90.0).abs() < EPS);

        let overridden = build_dashboard(&records, Some(2.0));
        assert_eq!(overridden.current_gpa, 2.0);
        assert!((overridden.projection.projected - 2.8).abs() < EPS);
    }
}
