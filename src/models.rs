use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub id: Uuid,
    pub student_number: String,
    pub first_name: String,
    pub last_name: String,
    pub course: String,
    pub year_level: i32,
    pub created_at: DateTime<Utc>,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subject {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub instructor: String,
    pub created_at: DateTime<Utc>,
}

/// One student's period scores for one subject. Scores use the inverted
/// 1.0 (best) to 5.0 (worst) scale and are `None` until recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grade {
    pub id: Uuid,
    pub student_id: Option<Uuid>,
    pub subject_id: Uuid,
    pub prelim: Option<f64>,
    pub midterm: Option<f64>,
    pub semifinal: Option<f64>,
    #[serde(rename = "final")]
    pub final_score: Option<f64>,
}

impl Grade {
    pub fn period_scores(&self) -> [(&'static str, Option<f64>); 4] {
        [
            ("prelim", self.prelim),
            ("midterm", self.midterm),
            ("semifinal", self.semifinal),
            ("final", self.final_score),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StudentDraft {
    pub student_number: String,
    pub first_name: String,
    pub last_name: String,
    pub course: String,
    pub year_level: i32,
}

impl From<&Student> for StudentDraft {
    fn from(student: &Student) -> Self {
        Self {
            student_number: student.student_number.clone(),
            first_name: student.first_name.clone(),
            last_name: student.last_name.clone(),
            course: student.course.clone(),
            year_level: student.year_level,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubjectDraft {
    pub code: String,
    pub name: String,
    pub instructor: String,
}

impl From<&Subject> for SubjectDraft {
    fn from(subject: &Subject) -> Self {
        Self {
            code: subject.code.clone(),
            name: subject.name.clone(),
            instructor: subject.instructor.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradeDraft {
    pub student_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub prelim: Option<f64>,
    pub midterm: Option<f64>,
    pub semifinal: Option<f64>,
    pub final_score: Option<f64>,
}

impl From<&Grade> for GradeDraft {
    fn from(grade: &Grade) -> Self {
        Self {
            student_id: grade.student_id,
            subject_id: Some(grade.subject_id),
            prelim: grade.prelim,
            midterm: grade.midterm,
            semifinal: grade.semifinal,
            final_score: grade.final_score,
        }
    }
}

/// Roster entry as sent to the narrative service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterEntry {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
}

impl From<&Student> for RosterEntry {
    fn from(student: &Student) -> Self {
        Self {
            id: student.id,
            first_name: student.first_name.clone(),
            last_name: student.last_name.clone(),
        }
    }
}

/// Everything the narrative service sees for one subject. Grade rows are
/// passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPayload {
    pub subject_id: Uuid,
    pub subject_name: String,
    pub students: Vec<RosterEntry>,
    pub grades: Vec<Grade>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub analysis: String,
    pub passed_students: Vec<String>,
    pub failed_students: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Standing {
    Passed,
    Failed,
    /// Composite lands strictly between 3.0 and 4.0
    Undetermined,
    /// No recorded period scores
    Incomplete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentAssessment {
    pub student_id: Uuid,
    pub display_name: String,
    pub composite: Option<f64>,
    pub standing: Standing,
}
