use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use gradebook_report::analysis::{AnalysisCoordinator, ClassificationSource};
use gradebook_report::db::{self, PgStore};
use gradebook_report::form::{FormMode, FormState};
use gradebook_report::models::{GradeDraft, Standing, StudentDraft, SubjectDraft};
use gradebook_report::narrative::{self, GeminiClient, GeminiConfig};
use gradebook_report::store::RecordStore;
use gradebook_report::{grading, report, GradebookError, Result};

#[derive(Parser)]
#[command(name = "gradebook-report")]
#[command(about = "Student, subject and grade records with AI pass/fail reports", long_about = None)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Manage the student roster
    Students {
        #[command(subcommand)]
        action: StudentAction,
    },
    /// Manage subjects
    Subjects {
        #[command(subcommand)]
        action: SubjectAction,
    },
    /// Manage grades for a subject
    Grades {
        #[command(subcommand)]
        action: GradeAction,
    },
    /// Generate the AI analysis report for a subject
    Analyze(AnalyzeArgs),
}

#[derive(Subcommand)]
enum StudentAction {
    List,
    Add {
        #[arg(long)]
        number: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        course: String,
        #[arg(long)]
        year_level: i32,
    },
    Update {
        id: Uuid,
        #[arg(long)]
        number: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        course: Option<String>,
        #[arg(long)]
        year_level: Option<i32>,
    },
    /// Delete a student; their grade rows are kept
    Delete { id: Uuid },
    /// Import students from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
}

#[derive(Subcommand)]
enum SubjectAction {
    List,
    Add {
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        instructor: String,
    },
    Update {
        id: Uuid,
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        instructor: Option<String>,
    },
    Delete { id: Uuid },
}

#[derive(Args)]
struct ScoreArgs {
    #[arg(long)]
    prelim: Option<f64>,
    #[arg(long)]
    midterm: Option<f64>,
    #[arg(long)]
    semifinal: Option<f64>,
    #[arg(long = "final")]
    final_score: Option<f64>,
}

#[derive(Subcommand)]
enum GradeAction {
    List {
        #[arg(long)]
        subject: Option<Uuid>,
    },
    Add {
        #[arg(long)]
        subject: Option<Uuid>,
        #[arg(long)]
        student: Option<Uuid>,
        #[command(flatten)]
        scores: ScoreArgs,
    },
    Update {
        id: Uuid,
        #[arg(long)]
        subject: Option<Uuid>,
        #[arg(long)]
        student: Option<Uuid>,
        #[command(flatten)]
        scores: ScoreArgs,
    },
    Delete {
        id: Uuid,
        /// Subject to re-list afterwards
        #[arg(long)]
        subject: Option<Uuid>,
    },
}

#[derive(Args)]
struct AnalyzeArgs {
    #[arg(long)]
    subject: Option<Uuid>,
    #[arg(long, default_value = "report.md")]
    out: PathBuf,
    #[arg(long, value_enum, default_value_t = ClassificationSource::Service)]
    classification: ClassificationSource,
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, default_value = "")]
    api_key: String,
    #[arg(long, env = "GEMINI_MODEL", default_value = narrative::DEFAULT_MODEL)]
    model: String,
    #[arg(long, env = "GEMINI_BASE_URL", default_value = narrative::DEFAULT_BASE_URL)]
    base_url: String,
    #[arg(long, env = "NARRATIVE_TIMEOUT_SECS", default_value_t = narrative::DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,
    #[arg(long, default_value_t = 80)]
    page_width: usize,
    #[arg(long, default_value_t = 50)]
    lines_per_page: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gradebook_report=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let pool = PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect(&cli.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgStore::new(pool);

    match cli.command {
        Commands::InitDb => {
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(store.pool()).await?;
            println!("Seed data inserted.");
        }
        Commands::Students { action } => run_students(&store, action).await?,
        Commands::Subjects { action } => run_subjects(&store, action).await?,
        Commands::Grades { action } => run_grades(&store, action).await?,
        Commands::Analyze(args) => run_analyze(&store, args).await?,
    }

    Ok(())
}

/// Drives one open form through validation and save. The form ends `Idle` on
/// success and `Error` on failure.
async fn submit_form<D, V, S, Fut>(
    form: &mut FormState<D>,
    validate: V,
    save: S,
) -> anyhow::Result<FormMode>
where
    D: Clone,
    V: FnOnce(&D) -> Result<()>,
    S: FnOnce(FormMode, D) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let (mode, draft) = form.submit()?;
    let outcome = match validate(&draft) {
        Ok(()) => save(mode, draft).await,
        Err(err) => Err(err),
    };

    match outcome {
        Ok(()) => {
            form.complete()?;
            Ok(mode)
        }
        Err(err) => {
            if !err.is_validation() {
                error!(error = %err, "save failed");
            }
            form.fail(err.to_string())?;
            Err(err.into())
        }
    }
}

fn override_with<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

async fn print_students(store: &PgStore) -> Result<()> {
    let students = store.list_students().await?;
    if students.is_empty() {
        println!("No students recorded.");
        return Ok(());
    }
    for student in students {
        println!(
            "- {} {} ({}, {} year {})",
            student.id,
            student.display_name(),
            student.student_number,
            student.course,
            student.year_level
        );
    }
    Ok(())
}

async fn print_subjects(store: &PgStore) -> Result<()> {
    let subjects = store.list_subjects().await?;
    if subjects.is_empty() {
        println!("No subjects recorded.");
        return Ok(());
    }
    for subject in subjects {
        println!(
            "- {} {} {} ({})",
            subject.id, subject.code, subject.name, subject.instructor
        );
    }
    Ok(())
}

async fn print_grades(store: &PgStore, subject_id: Uuid) -> Result<()> {
    let (grades, students) =
        tokio::try_join!(store.list_grades(subject_id), store.list_students())?;
    if grades.is_empty() {
        println!("No grades recorded for this subject.");
        return Ok(());
    }
    print!("{}", report::grade_table(&grades, &students));
    Ok(())
}

async fn run_students(store: &PgStore, action: StudentAction) -> anyhow::Result<()> {
    let mut form = FormState::default();

    match action {
        StudentAction::List => {}
        StudentAction::Add {
            number,
            first_name,
            last_name,
            course,
            year_level,
        } => {
            form.open_create(StudentDraft {
                student_number: number,
                first_name,
                last_name,
                course,
                year_level,
            })?;
            submit_form(&mut form, grading::validate_student, |_, draft| async move {
                store.insert_student(&draft).await.map(|_| ())
            })
            .await?;
            println!("Student saved.");
        }
        StudentAction::Update {
            id,
            number,
            first_name,
            last_name,
            course,
            year_level,
        } => {
            let students = store.list_students().await?;
            let existing = students
                .iter()
                .find(|student| student.id == id)
                .ok_or(GradebookError::RecordNotFound(id))?;
            let mut draft = StudentDraft::from(existing);
            override_with(&mut draft.student_number, number);
            override_with(&mut draft.first_name, first_name);
            override_with(&mut draft.last_name, last_name);
            override_with(&mut draft.course, course);
            override_with(&mut draft.year_level, year_level);

            form.open_edit(id, draft)?;
            submit_form(&mut form, grading::validate_student, |_, draft| async move {
                store.update_student(id, &draft).await
            })
            .await?;
            println!("Student updated.");
        }
        StudentAction::Delete { id } => {
            store.delete_student(id).await.inspect_err(|err| {
                error!(error = %err, %id, "delete failed");
            })?;
            println!("Student deleted. Their grade rows were kept.");
        }
        StudentAction::Import { csv } => {
            let drafts = db::read_student_csv(&csv)?;
            for draft in &drafts {
                grading::validate_student(draft)
                    .with_context(|| format!("row for {}", draft.student_number))?;
            }
            let inserted = db::import_students(store.pool(), &drafts).await?;
            println!("Imported {inserted} students from {}.", csv.display());
        }
    }

    print_students(store).await?;
    Ok(())
}

async fn run_subjects(store: &PgStore, action: SubjectAction) -> anyhow::Result<()> {
    let mut form = FormState::default();

    match action {
        SubjectAction::List => {}
        SubjectAction::Add {
            code,
            name,
            instructor,
        } => {
            form.open_create(SubjectDraft {
                code,
                name,
                instructor,
            })?;
            submit_form(&mut form, grading::validate_subject, |_, draft| async move {
                store.insert_subject(&draft).await.map(|_| ())
            })
            .await?;
            println!("Subject saved.");
        }
        SubjectAction::Update {
            id,
            code,
            name,
            instructor,
        } => {
            let existing = store
                .get_subject(id)
                .await?
                .ok_or(GradebookError::SubjectNotFound(id))?;
            let mut draft = SubjectDraft::from(&existing);
            override_with(&mut draft.code, code);
            override_with(&mut draft.name, name);
            override_with(&mut draft.instructor, instructor);

            form.open_edit(id, draft)?;
            submit_form(&mut form, grading::validate_subject, |_, draft| async move {
                store.update_subject(id, &draft).await
            })
            .await?;
            println!("Subject updated.");
        }
        SubjectAction::Delete { id } => {
            store.delete_subject(id).await.inspect_err(|err| {
                error!(error = %err, %id, "delete failed");
            })?;
            println!("Subject deleted.");
        }
    }

    print_subjects(store).await?;
    Ok(())
}

fn validate_grade_form(draft: &GradeDraft) -> Result<()> {
    grading::validate_grade(draft).map(|_| ())
}

async fn save_grade(store: &PgStore, mode: FormMode, draft: GradeDraft) -> Result<()> {
    let subject_id = draft.subject_id.ok_or(GradebookError::MissingSubject)?;
    match mode {
        FormMode::Create => store.insert_grade(subject_id, &draft).await.map(|_| ()),
        FormMode::Edit(id) => store.update_grade(id, subject_id, &draft).await,
    }
}

async fn run_grades(store: &PgStore, action: GradeAction) -> anyhow::Result<()> {
    let mut form = FormState::default();

    let relist = match action {
        GradeAction::List { subject } => Some(subject.ok_or(GradebookError::MissingSubject)?),
        GradeAction::Add {
            subject,
            student,
            scores,
        } => {
            form.open_create(GradeDraft {
                student_id: student,
                subject_id: subject,
                prelim: scores.prelim,
                midterm: scores.midterm,
                semifinal: scores.semifinal,
                final_score: scores.final_score,
            })?;
            submit_form(&mut form, validate_grade_form, |mode, draft| {
                save_grade(store, mode, draft)
            })
            .await?;
            println!("Grade saved.");
            subject
        }
        GradeAction::Update {
            id,
            subject,
            student,
            scores,
        } => {
            let existing = store
                .get_grade(id)
                .await?
                .ok_or(GradebookError::RecordNotFound(id))?;

            // --subject moves the row to another subject
            let mut draft = GradeDraft::from(&existing);
            if subject.is_some() {
                draft.subject_id = subject;
            }
            if student.is_some() {
                draft.student_id = student;
            }
            override_with(&mut draft.prelim, scores.prelim.map(Some));
            override_with(&mut draft.midterm, scores.midterm.map(Some));
            override_with(&mut draft.semifinal, scores.semifinal.map(Some));
            override_with(&mut draft.final_score, scores.final_score.map(Some));

            form.open_edit(id, draft)?;
            submit_form(&mut form, validate_grade_form, |mode, draft| {
                save_grade(store, mode, draft)
            })
            .await?;
            println!("Grade updated.");
            subject.or(Some(existing.subject_id))
        }
        GradeAction::Delete { id, subject } => {
            store.delete_grade(id).await.inspect_err(|err| {
                error!(error = %err, %id, "delete failed");
            })?;
            println!("Grade deleted.");
            subject
        }
    };

    if let Some(subject_id) = relist {
        print_grades(store, subject_id).await?;
    }
    Ok(())
}

async fn run_analyze(store: &PgStore, args: AnalyzeArgs) -> anyhow::Result<()> {
    let subject_id = args.subject.ok_or(GradebookError::MissingSubject)?;

    let client = GeminiClient::new(GeminiConfig {
        base_url: args.base_url,
        model: args.model,
        api_key: args.api_key,
        timeout: Duration::from_secs(args.timeout_secs.max(1)),
    })?;
    info!(%subject_id, model = client.model(), "generating analysis");

    let coordinator = AnalysisCoordinator::new();
    let outcome = coordinator
        .run(store, &client, Some(subject_id), args.classification)
        .await;
    let analysis = match outcome {
        Ok(analysis) => analysis,
        Err(err) => {
            error!(error = %err, "AI analysis failed");
            return Err(anyhow::Error::new(err).context("AI analysis failed"));
        }
    };

    let layout = report::ReportLayout {
        width: args.page_width,
        lines_per_page: args.lines_per_page,
    };
    let document = report::render(&analysis.subject_name, &analysis.result, layout, Utc::now());
    std::fs::write(&args.out, document.to_markdown())
        .with_context(|| format!("failed to write {}", args.out.display()))?;

    if analysis.malformed {
        println!("The narrative service did not return structured data; its text is used as the analysis.");
    }
    for assessment in &analysis.assessments {
        let composite = assessment
            .composite
            .map(|value| format!("{:.2}", value))
            .unwrap_or_else(|| "-".to_string());
        let standing = match assessment.standing {
            Standing::Passed => "passed",
            Standing::Failed => "failed",
            Standing::Undetermined => "between 3.0 and 4.0",
            Standing::Incomplete => "no grades",
        };
        println!("  {:<24} {:>6}  {}", assessment.display_name, composite, standing);
    }
    println!(
        "{}: {} passed, {} failed.",
        analysis.subject_name,
        analysis.result.passed_students.len(),
        analysis.result.failed_students.len()
    );
    if !analysis.disagreements.is_empty() {
        println!(
            "{} student(s) classified differently from the grading scale; see logs.",
            analysis.disagreements.len()
        );
    }
    println!(
        "Report written to {} ({} page(s)).",
        args.out.display(),
        document.pages.len()
    );

    Ok(())
}
