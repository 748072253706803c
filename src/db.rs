use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{GradebookError, Result};
use crate::models::{Grade, GradeDraft, Student, StudentDraft, Subject, SubjectDraft};
use crate::store::RecordStore;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn student_from_row(row: &PgRow) -> Student {
    Student {
        id: row.get("id"),
        student_number: row.get("student_number"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        course: row.get("course"),
        year_level: row.get("year_level"),
        created_at: row.get("created_at"),
    }
}

fn subject_from_row(row: &PgRow) -> Subject {
    Subject {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("subject_name"),
        instructor: row.get("instructor"),
        created_at: row.get("created_at"),
    }
}

fn grade_from_row(row: &PgRow) -> Grade {
    Grade {
        id: row.get("id"),
        student_id: row.get("student_id"),
        subject_id: row.get("subject_id"),
        prelim: row.get("prelim"),
        midterm: row.get("midterm"),
        semifinal: row.get("semifinal"),
        final_score: row.get("final"),
    }
}

fn expect_one(id: Uuid, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        return Err(GradebookError::RecordNotFound(id));
    }
    Ok(())
}

#[async_trait]
impl RecordStore for PgStore {
    async fn list_students(&self) -> Result<Vec<Student>> {
        let rows = sqlx::query(
            "SELECT id, student_number, first_name, last_name, course, year_level, created_at \
             FROM gradebook.students ORDER BY last_name, first_name",
        )
        .fetch_all(&self.pool)
        .await?;
        debug!(count = rows.len(), "fetched students");
        Ok(rows.iter().map(student_from_row).collect())
    }

    async fn insert_student(&self, draft: &StudentDraft) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO gradebook.students
            (id, student_number, first_name, last_name, course, year_level)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(&draft.student_number)
        .bind(&draft.first_name)
        .bind(&draft.last_name)
        .bind(&draft.course)
        .bind(draft.year_level)
        .execute(&self.pool)
        .await?;
        info!(%id, "inserted student");
        Ok(id)
    }

    async fn update_student(&self, id: Uuid, draft: &StudentDraft) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE gradebook.students
            SET student_number = $2, first_name = $3, last_name = $4, course = $5, year_level = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&draft.student_number)
        .bind(&draft.first_name)
        .bind(&draft.last_name)
        .bind(&draft.course)
        .bind(draft.year_level)
        .execute(&self.pool)
        .await?;
        expect_one(id, result.rows_affected())
    }

    async fn delete_student(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM gradebook.students WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        info!(%id, "deleted student");
        expect_one(id, result.rows_affected())
    }

    async fn list_subjects(&self) -> Result<Vec<Subject>> {
        let rows = sqlx::query(
            "SELECT id, code, subject_name, instructor, created_at \
             FROM gradebook.subjects ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(subject_from_row).collect())
    }

    async fn get_subject(&self, id: Uuid) -> Result<Option<Subject>> {
        let row = sqlx::query(
            "SELECT id, code, subject_name, instructor, created_at \
             FROM gradebook.subjects WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(subject_from_row))
    }

    async fn insert_subject(&self, draft: &SubjectDraft) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO gradebook.subjects (id, code, subject_name, instructor) VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(&draft.code)
        .bind(&draft.name)
        .bind(&draft.instructor)
        .execute(&self.pool)
        .await?;
        info!(%id, code = %draft.code, "inserted subject");
        Ok(id)
    }

    async fn update_subject(&self, id: Uuid, draft: &SubjectDraft) -> Result<()> {
        let result = sqlx::query(
            "UPDATE gradebook.subjects SET code = $2, subject_name = $3, instructor = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(&draft.code)
        .bind(&draft.name)
        .bind(&draft.instructor)
        .execute(&self.pool)
        .await?;
        expect_one(id, result.rows_affected())
    }

    async fn delete_subject(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM gradebook.subjects WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_one(id, result.rows_affected())
    }

    async fn list_grades(&self, subject_id: Uuid) -> Result<Vec<Grade>> {
        let rows = sqlx::query(
            "SELECT id, student_id, subject_id, prelim, midterm, semifinal, final \
             FROM gradebook.grades WHERE subject_id = $1 ORDER BY created_at",
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;
        debug!(%subject_id, count = rows.len(), "fetched grades");
        Ok(rows.iter().map(grade_from_row).collect())
    }

    async fn get_grade(&self, id: Uuid) -> Result<Option<Grade>> {
        let row = sqlx::query(
            "SELECT id, student_id, subject_id, prelim, midterm, semifinal, final \
             FROM gradebook.grades WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(grade_from_row))
    }

    async fn insert_grade(&self, subject_id: Uuid, draft: &GradeDraft) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO gradebook.grades
            (id, student_id, subject_id, prelim, midterm, semifinal, final)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(draft.student_id)
        .bind(subject_id)
        .bind(draft.prelim)
        .bind(draft.midterm)
        .bind(draft.semifinal)
        .bind(draft.final_score)
        .execute(&self.pool)
        .await?;
        info!(%id, %subject_id, "inserted grade");
        Ok(id)
    }

    async fn update_grade(&self, id: Uuid, subject_id: Uuid, draft: &GradeDraft) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE gradebook.grades
            SET student_id = $2, subject_id = $3, prelim = $4, midterm = $5, semifinal = $6, final = $7
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(draft.student_id)
        .bind(subject_id)
        .bind(draft.prelim)
        .bind(draft.midterm)
        .bind(draft.semifinal)
        .bind(draft.final_score)
        .execute(&self.pool)
        .await?;
        expect_one(id, result.rows_affected())
    }

    async fn delete_grade(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM gradebook.grades WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_one(id, result.rows_affected())
    }
}

/// (student_number, first_name, last_name, course, year_level)
const SEED_STUDENTS: [(&str, &str, &str, &str, i32); 3] = [
    ("2026-0001", "Maria", "Cruz", "BSIT", 2),
    ("2026-0002", "Juan", "Santos", "BSIT", 2),
    ("2026-0003", "John", "Dela Cruz", "BSCS", 3),
];

/// (code, subject_name, instructor)
const SEED_SUBJECT: (&str, &str, &str) = ("NET1", "NET1", "R. Villanueva");

/// (student_number, prelim, midterm, semifinal, final)
const SEED_GRADES: [(&str, Option<f64>, Option<f64>, Option<f64>, Option<f64>); 3] = [
    ("2026-0001", Some(1.75), Some(2.0), Some(2.25), Some(2.0)),
    ("2026-0002", Some(4.0), Some(4.5), Some(5.0), Some(4.5)),
    ("2026-0003", Some(1.5), Some(1.25), None, None),
];

/// Idempotent sample data. Ids come back from the upserts, so rows that
/// already exist keep their own ids and the grades still point at them.
pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let mut student_ids: HashMap<&str, Uuid> = HashMap::new();

    for (number, first, last, course, year) in SEED_STUDENTS {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO gradebook.students
            (id, student_number, first_name, last_name, course, year_level)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (student_number) DO UPDATE
            SET first_name = EXCLUDED.first_name, last_name = EXCLUDED.last_name,
                course = EXCLUDED.course, year_level = EXCLUDED.year_level
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(number)
        .bind(first)
        .bind(last)
        .bind(course)
        .bind(year)
        .fetch_one(pool)
        .await?;
        student_ids.insert(number, id);
    }

    let (code, name, instructor) = SEED_SUBJECT;
    let subject_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO gradebook.subjects (id, code, subject_name, instructor)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (code) DO UPDATE
        SET subject_name = EXCLUDED.subject_name, instructor = EXCLUDED.instructor
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(code)
    .bind(name)
    .bind(instructor)
    .fetch_one(pool)
    .await?;

    let mut inserted = 0u64;
    for (number, prelim, midterm, semifinal, final_score) in SEED_GRADES {
        let student_id = student_ids
            .get(number)
            .copied()
            .with_context(|| format!("seed grade references unknown student {}", number))?;

        let result = sqlx::query(
            r#"
            INSERT INTO gradebook.grades
            (id, student_id, subject_id, prelim, midterm, semifinal, final)
            SELECT $1, $2, $3, $4, $5, $6, $7
            WHERE NOT EXISTS (
                SELECT 1 FROM gradebook.grades WHERE student_id = $2 AND subject_id = $3
            )
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(subject_id)
        .bind(prelim)
        .bind(midterm)
        .bind(semifinal)
        .bind(final_score)
        .execute(pool)
        .await?;
        inserted += result.rows_affected();
    }

    info!(students = student_ids.len(), %subject_id, grades = inserted, "seeded sample records");
    Ok(())
}

/// Reads roster rows with headers
/// `student_number,first_name,last_name,course,year_level`.
pub fn read_student_csv(csv_path: &Path) -> Result<Vec<StudentDraft>> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut drafts = Vec::new();
    for row in reader.deserialize::<StudentDraft>() {
        drafts.push(row?);
    }
    Ok(drafts)
}

/// Upserts students by student number. Returns how many rows changed.
pub async fn import_students(pool: &PgPool, drafts: &[StudentDraft]) -> Result<usize> {
    let mut inserted = 0usize;

    for draft in drafts {
        let result = sqlx::query(
            r#"
            INSERT INTO gradebook.students
            (id, student_number, first_name, last_name, course, year_level)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (student_number) DO UPDATE
            SET first_name = EXCLUDED.first_name, last_name = EXCLUDED.last_name,
                course = EXCLUDED.course, year_level = EXCLUDED.year_level
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&draft.student_number)
        .bind(&draft.first_name)
        .bind(&draft.last_name)
        .bind(&draft.course)
        .bind(draft.year_level)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_roster_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "student_number,first_name,last_name,course,year_level").unwrap();
        writeln!(file, "2026-0101,Ana,Reyes,BSIT,1").unwrap();
        writeln!(file, "2026-0102,Leo,Garcia,BSCS,4").unwrap();

        let drafts = read_student_csv(file.path()).unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[1].last_name, "Garcia");
        assert_eq!(drafts[1].year_level, 4);
    }

    #[test]
    fn seed_grades_reference_seed_students() {
        for (number, prelim, midterm, semifinal, final_score) in SEED_GRADES {
            assert!(
                SEED_STUDENTS.iter().any(|(n, ..)| *n == number),
                "no seed student {}",
                number
            );
            let draft = GradeDraft {
                student_id: Some(Uuid::new_v4()),
                subject_id: Some(Uuid::new_v4()),
                prelim,
                midterm,
                semifinal,
                final_score,
            };
            assert!(crate::grading::validate_grade(&draft).is_ok());
        }
    }

    #[test]
    fn rejects_malformed_csv_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "student_number,first_name,last_name,course,year_level").unwrap();
        writeln!(file, "2026-0101,Ana,Reyes,BSIT,first").unwrap();

        assert!(matches!(
            read_student_csv(file.path()),
            Err(GradebookError::Csv(_))
        ));
    }
}
