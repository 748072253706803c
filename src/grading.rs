use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tracing::warn;
use uuid::Uuid;

use crate::error::{GradebookError, Result};
use crate::models::{
    AnalysisPayload, ClassificationResult, Grade, GradeDraft, RosterEntry, Standing, Student,
    StudentAssessment, StudentDraft, Subject, SubjectDraft,
};

pub const SCALE_MIN: f64 = 1.0;
pub const PASS_MAX: f64 = 3.0;
pub const FAIL_MIN: f64 = 4.0;
pub const SCALE_MAX: f64 = 5.0;

/// Shown wherever a grade row's student cannot be resolved.
pub const MISSING_STUDENT: &str = "—";

pub fn validate_score(field: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() || !(SCALE_MIN..=SCALE_MAX).contains(&value) {
        return Err(GradebookError::ScoreOutOfScale { field, value });
    }
    if value > PASS_MAX && value < FAIL_MIN {
        return Err(GradebookError::ScoreInUndefinedBand { field, value });
    }
    Ok(())
}

/// Checks a grade form before it is sent anywhere. Returns the subject the
/// grade belongs to.
pub fn validate_grade(draft: &GradeDraft) -> Result<Uuid> {
    let subject_id = draft.subject_id.ok_or(GradebookError::MissingSubject)?;
    if draft.student_id.is_none() {
        return Err(GradebookError::MissingStudent);
    }

    let scores = [
        ("prelim", draft.prelim),
        ("midterm", draft.midterm),
        ("semifinal", draft.semifinal),
        ("final", draft.final_score),
    ];
    for (field, score) in scores {
        if let Some(value) = score {
            validate_score(field, value)?;
        }
    }

    Ok(subject_id)
}

pub fn validate_student(draft: &StudentDraft) -> Result<()> {
    require("student number", &draft.student_number)?;
    require("first name", &draft.first_name)?;
    require("last name", &draft.last_name)?;
    if !(1..=6).contains(&draft.year_level) {
        return Err(GradebookError::InvalidField {
            field: "year level",
            reason: format!("{} is not between 1 and 6", draft.year_level),
        });
    }
    Ok(())
}

pub fn validate_subject(draft: &SubjectDraft) -> Result<()> {
    require("subject code", &draft.code)?;
    require("subject name", &draft.name)
}

fn require(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GradebookError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

/// Student lookup keyed by id, built once per fetch.
#[derive(Debug, Default)]
pub struct StudentIndex<'a> {
    by_id: HashMap<Uuid, &'a Student>,
}

impl<'a> StudentIndex<'a> {
    pub fn new(students: &'a [Student]) -> Self {
        Self {
            by_id: students.iter().map(|student| (student.id, student)).collect(),
        }
    }

    pub fn get(&self, id: Option<Uuid>) -> Option<&'a Student> {
        id.and_then(|id| self.by_id.get(&id).copied())
    }

    pub fn display_name(&self, id: Option<Uuid>) -> String {
        self.get(id)
            .map(Student::display_name)
            .unwrap_or_else(|| MISSING_STUDENT.to_string())
    }
}

pub fn build_payload(subject: &Subject, students: &[Student], grades: &[Grade]) -> AnalysisPayload {
    AnalysisPayload {
        subject_id: subject.id,
        subject_name: subject.name.clone(),
        students: students.iter().map(RosterEntry::from).collect(),
        grades: grades
            .iter()
            .filter(|grade| grade.subject_id == subject.id)
            .cloned()
            .collect(),
    }
}

/// Mean of the recorded period scores.
pub fn composite(grade: &Grade) -> Option<f64> {
    let recorded: Vec<f64> = grade
        .period_scores()
        .iter()
        .filter_map(|(_, score)| *score)
        .collect();

    if recorded.is_empty() {
        None
    } else {
        Some(recorded.iter().sum::<f64>() / recorded.len() as f64)
    }
}

pub fn standing(composite: Option<f64>) -> Standing {
    match composite {
        None => Standing::Incomplete,
        Some(value) if value <= PASS_MAX => Standing::Passed,
        Some(value) if value >= FAIL_MIN => Standing::Failed,
        Some(_) => Standing::Undetermined,
    }
}

/// Deterministic standing for every rostered student. Students without a
/// grade row are `Incomplete`; grade rows for unknown students are skipped.
///
/// The schema allows several rows per student and subject. The first row in
/// payload order is assessed and the rest are logged and ignored.
pub fn assess(payload: &AnalysisPayload) -> Vec<StudentAssessment> {
    let mut rows: HashMap<Uuid, &Grade> = HashMap::new();
    for grade in &payload.grades {
        let Some(student_id) = grade.student_id else {
            continue;
        };
        match rows.entry(student_id) {
            Entry::Vacant(slot) => {
                slot.insert(grade);
            }
            Entry::Occupied(kept) => warn!(
                student = %student_id,
                subject = %payload.subject_id,
                kept = %kept.get().id,
                ignored = %grade.id,
                "duplicate grade row for student, assessing the first"
            ),
        }
    }

    payload
        .students
        .iter()
        .map(|student| {
            let composite = rows.get(&student.id).and_then(|grade| composite(grade));
            StudentAssessment {
                student_id: student.id,
                display_name: format!("{} {}", student.first_name, student.last_name),
                composite,
                standing: standing(composite),
            }
        })
        .collect()
}

pub fn local_classification(assessments: &[StudentAssessment]) -> (Vec<String>, Vec<String>) {
    let mut passed = Vec::new();
    let mut failed = Vec::new();
    for assessment in assessments {
        match assessment.standing {
            Standing::Passed => passed.push(assessment.display_name.clone()),
            Standing::Failed => failed.push(assessment.display_name.clone()),
            Standing::Undetermined | Standing::Incomplete => {}
        }
    }
    (passed, failed)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Disagreement {
    pub student: String,
    pub local: Standing,
    pub reported: Option<Standing>,
}

/// Compares the service's lists against the numeric rule.
pub fn reconcile(
    result: &ClassificationResult,
    assessments: &[StudentAssessment],
) -> Vec<Disagreement> {
    assessments
        .iter()
        .filter_map(|assessment| {
            let name = &assessment.display_name;
            let reported = if result.passed_students.contains(name) {
                Some(Standing::Passed)
            } else if result.failed_students.contains(name) {
                Some(Standing::Failed)
            } else {
                None
            };

            let agrees = match (assessment.standing, reported) {
                (Standing::Passed, Some(Standing::Passed)) => true,
                (Standing::Failed, Some(Standing::Failed)) => true,
                (Standing::Undetermined | Standing::Incomplete, _) => true,
                _ => false,
            };

            (!agrees).then(|| Disagreement {
                student: name.clone(),
                local: assessment.standing,
                reported,
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;

    pub(crate) fn student(first: &str, last: &str) -> Student {
        Student {
            id: Uuid::new_v4(),
            student_number: format!("2026-{}", &Uuid::new_v4().simple().to_string()[..4]),
            first_name: first.to_string(),
            last_name: last.to_string(),
            course: "BSIT".to_string(),
            year_level: 2,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn subject(code: &str, name: &str) -> Subject {
        Subject {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: name.to_string(),
            instructor: "R. Villanueva".to_string(),
            created_at: Utc::now(),
        }
    }

    pub(crate) fn grade(student_id: Option<Uuid>, subject_id: Uuid, final_score: Option<f64>) -> Grade {
        Grade {
            id: Uuid::new_v4(),
            student_id,
            subject_id,
            prelim: None,
            midterm: None,
            semifinal: None,
            final_score,
        }
    }

    #[test]
    fn scores_follow_inverted_scale() {
        assert!(validate_score("final", 1.0).is_ok());
        assert!(validate_score("final", 3.0).is_ok());
        assert!(validate_score("final", 4.0).is_ok());
        assert!(validate_score("final", 5.0).is_ok());
        assert!(matches!(
            validate_score("final", 3.5),
            Err(GradebookError::ScoreInUndefinedBand { .. })
        ));
        assert!(matches!(
            validate_score("final", 0.5),
            Err(GradebookError::ScoreOutOfScale { .. })
        ));
        assert!(matches!(
            validate_score("final", f64::NAN),
            Err(GradebookError::ScoreOutOfScale { .. })
        ));
    }

    #[test]
    fn grade_without_subject_or_student_is_rejected() {
        let draft = GradeDraft {
            student_id: Some(Uuid::new_v4()),
            ..GradeDraft::default()
        };
        assert!(matches!(validate_grade(&draft), Err(GradebookError::MissingSubject)));

        let draft = GradeDraft {
            subject_id: Some(Uuid::new_v4()),
            ..GradeDraft::default()
        };
        assert!(matches!(validate_grade(&draft), Err(GradebookError::MissingStudent)));
    }

    #[test]
    fn student_year_level_is_bounded() {
        let mut draft = StudentDraft {
            student_number: "2026-0001".to_string(),
            first_name: "Maria".to_string(),
            last_name: "Cruz".to_string(),
            course: "BSIT".to_string(),
            year_level: 7,
        };
        assert!(validate_student(&draft).is_err());
        draft.year_level = 3;
        assert!(validate_student(&draft).is_ok());
    }

    #[test]
    fn payload_keeps_only_selected_subject_untouched() {
        let net1 = subject("NET1", "Networking 1");
        let other = subject("DB1", "Databases 1");
        let maria = student("Maria", "Cruz");
        let mut kept = grade(Some(maria.id), net1.id, Some(2.0));
        kept.prelim = Some(1.75);
        let grades = vec![
            kept.clone(),
            grade(Some(maria.id), other.id, Some(1.0)),
            grade(None, net1.id, Some(4.5)),
        ];

        let payload = build_payload(&net1, &[maria], &grades);

        assert_eq!(payload.grades.len(), 2);
        assert_eq!(payload.grades[0], kept);
        assert!(payload.grades.iter().any(|g| g.student_id.is_none()));
        assert_eq!(payload.subject_name, "Networking 1");
    }

    #[test]
    fn payload_serializes_with_camel_case_envelope() {
        let net1 = subject("NET1", "Networking 1");
        let payload = build_payload(&net1, &[], &[grade(None, net1.id, Some(2.0))]);
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("subjectId").is_some());
        assert_eq!(value["grades"][0]["final"], serde_json::json!(2.0));
        assert!(value["grades"][0]["student_id"].is_null());
    }

    #[test]
    fn composite_averages_recorded_periods() {
        let mut row = grade(None, Uuid::new_v4(), Some(2.0));
        row.prelim = Some(1.0);
        assert_eq!(composite(&row), Some(1.5));
        assert_eq!(composite(&grade(None, Uuid::new_v4(), None)), None);
    }

    #[test]
    fn standing_leaves_gap_undetermined() {
        assert_eq!(standing(Some(3.0)), Standing::Passed);
        assert_eq!(standing(Some(4.0)), Standing::Failed);
        assert_eq!(standing(Some(3.5)), Standing::Undetermined);
        assert_eq!(standing(None), Standing::Incomplete);
    }

    #[test]
    fn assessment_covers_students_without_rows() {
        let net1 = subject("NET1", "Networking 1");
        let maria = student("Maria", "Cruz");
        let juan = student("Juan", "Santos");
        let ana = student("Ana", "Reyes");
        let grades = vec![
            grade(Some(maria.id), net1.id, Some(2.0)),
            grade(Some(juan.id), net1.id, Some(4.5)),
            grade(Some(Uuid::new_v4()), net1.id, Some(1.0)),
        ];
        let payload = build_payload(&net1, &[maria, juan, ana], &grades);

        let assessments = assess(&payload);
        assert_eq!(assessments.len(), 3);
        assert_eq!(assessments[2].standing, Standing::Incomplete);

        let (passed, failed) = local_classification(&assessments);
        assert_eq!(passed, vec!["Maria Cruz".to_string()]);
        assert_eq!(failed, vec!["Juan Santos".to_string()]);
    }

    #[test]
    fn first_duplicate_row_is_assessed() {
        let net1 = subject("NET1", "Networking 1");
        let maria = student("Maria", "Cruz");
        let grades = vec![
            grade(Some(maria.id), net1.id, Some(4.5)),
            grade(Some(maria.id), net1.id, Some(1.5)),
        ];
        let payload = build_payload(&net1, &[maria], &grades);

        let assessments = assess(&payload);

        assert_eq!(assessments.len(), 1);
        assert_eq!(assessments[0].composite, Some(4.5));
        assert_eq!(assessments[0].standing, Standing::Failed);
        // both rows still travel to the narrative service untouched
        assert_eq!(payload.grades.len(), 2);
    }

    #[test]
    fn reconcile_flags_misclassified_students() {
        let net1 = subject("NET1", "Networking 1");
        let maria = student("Maria", "Cruz");
        let juan = student("Juan", "Santos");
        let grades = vec![
            grade(Some(maria.id), net1.id, Some(2.0)),
            grade(Some(juan.id), net1.id, Some(4.5)),
        ];
        let assessments = assess(&build_payload(&net1, &[maria, juan], &grades));

        let result = ClassificationResult {
            analysis: "Networking 1".to_string(),
            passed_students: vec!["Maria Cruz".to_string(), "Juan Santos".to_string()],
            failed_students: vec![],
        };

        let disagreements = reconcile(&result, &assessments);
        assert_eq!(disagreements.len(), 1);
        assert_eq!(disagreements[0].student, "Juan Santos");
        assert_eq!(disagreements[0].reported, Some(Standing::Passed));
    }

    #[test]
    fn index_falls_back_to_placeholder() {
        let maria = student("Maria", "Cruz");
        let roster = vec![maria.clone()];
        let index = StudentIndex::new(&roster);
        assert_eq!(index.display_name(Some(maria.id)), "Maria Cruz");
        assert_eq!(index.display_name(Some(Uuid::new_v4())), MISSING_STUDENT);
        assert_eq!(index.display_name(None), MISSING_STUDENT);
    }
}
