//! Record store boundary: list, insert, update and delete per entity.
//!
//! Filters are exact-match only. There is no transaction or conflict
//! handling, the last write wins.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Grade, GradeDraft, Student, StudentDraft, Subject, SubjectDraft};

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list_students(&self) -> Result<Vec<Student>>;
    async fn insert_student(&self, draft: &StudentDraft) -> Result<Uuid>;
    async fn update_student(&self, id: Uuid, draft: &StudentDraft) -> Result<()>;
    /// Grade rows referencing the student are kept.
    async fn delete_student(&self, id: Uuid) -> Result<()>;

    async fn list_subjects(&self) -> Result<Vec<Subject>>;
    async fn get_subject(&self, id: Uuid) -> Result<Option<Subject>>;
    async fn insert_subject(&self, draft: &SubjectDraft) -> Result<Uuid>;
    async fn update_subject(&self, id: Uuid, draft: &SubjectDraft) -> Result<()>;
    async fn delete_subject(&self, id: Uuid) -> Result<()>;

    async fn list_grades(&self, subject_id: Uuid) -> Result<Vec<Grade>>;
    async fn get_grade(&self, id: Uuid) -> Result<Option<Grade>>;
    async fn insert_grade(&self, subject_id: Uuid, draft: &GradeDraft) -> Result<Uuid>;
    async fn update_grade(&self, id: Uuid, subject_id: Uuid, draft: &GradeDraft) -> Result<()>;
    async fn delete_grade(&self, id: Uuid) -> Result<()>;
}
