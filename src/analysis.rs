//! Subject analysis: fetch, aggregate, ask the narrative service, decode.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{GradebookError, Result};
use crate::grading;
use crate::models::{ClassificationResult, StudentAssessment};
use crate::narrative::{decode_classification, NarrativeOutcome, NarrativeService};
use crate::store::RecordStore;

/// Where the passed and failed lists come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ClassificationSource {
    /// Keep the narrative service's lists
    #[default]
    Service,
    /// Replace the lists with the numeric rule applied locally
    Local,
}

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub subject_name: String,
    pub result: ClassificationResult,
    pub assessments: Vec<StudentAssessment>,
    /// The service did not return a JSON object
    pub malformed: bool,
    pub disagreements: Vec<grading::Disagreement>,
}

pub async fn analyze_subject(
    store: &dyn RecordStore,
    narrative: &dyn NarrativeService,
    subject_id: Option<Uuid>,
    source: ClassificationSource,
) -> Result<AnalysisReport> {
    let subject_id = subject_id.ok_or(GradebookError::MissingSubject)?;
    let subject = store
        .get_subject(subject_id)
        .await?
        .ok_or(GradebookError::SubjectNotFound(subject_id))?;

    let (grades, students) =
        tokio::try_join!(store.list_grades(subject_id), store.list_students())?;

    let payload = grading::build_payload(&subject, &students, &grades);
    let assessments = grading::assess(&payload);

    let raw = narrative.generate(&payload).await?;
    let outcome = decode_classification(&raw);
    let malformed = matches!(outcome, NarrativeOutcome::Malformed(_));
    if malformed {
        warn!(subject = %subject.code, "narrative response was not a JSON object, using it as plain analysis");
    }

    let mut result = outcome.into_result();
    let disagreements = grading::reconcile(&result, &assessments);
    for disagreement in &disagreements {
        warn!(
            student = %disagreement.student,
            local = ?disagreement.local,
            reported = ?disagreement.reported,
            "narrative classification disagrees with the grading scale"
        );
    }

    if source == ClassificationSource::Local {
        let (passed, failed) = grading::local_classification(&assessments);
        result.passed_students = passed;
        result.failed_students = failed;
    }

    info!(
        subject = %subject.code,
        passed = result.passed_students.len(),
        failed = result.failed_students.len(),
        "analysis complete"
    );

    Ok(AnalysisReport {
        subject_name: subject.name,
        result,
        assessments,
        malformed,
        disagreements,
    })
}

#[derive(Default)]
struct CoordinatorState {
    selected: Option<(Uuid, CancellationToken)>,
    in_flight: HashSet<Uuid>,
}

/// Serializes analysis requests per subject selection.
///
/// A second request for a subject that is still running is rejected, and
/// selecting another subject cancels whatever the previous selection started.
#[derive(Clone, Default)]
pub struct AnalysisCoordinator {
    state: Arc<Mutex<CoordinatorState>>,
}

impl AnalysisCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the token tied to this selection.
    pub fn select_subject(&self, subject_id: Uuid) -> CancellationToken {
        let mut state = self.lock();
        if let Some((current, token)) = &state.selected {
            if *current == subject_id {
                return token.clone();
            }
            token.cancel();
        }

        let token = CancellationToken::new();
        state.selected = Some((subject_id, token.clone()));
        token
    }

    pub fn is_in_flight(&self, subject_id: Uuid) -> bool {
        self.lock().in_flight.contains(&subject_id)
    }

    pub async fn run(
        &self,
        store: &dyn RecordStore,
        narrative: &dyn NarrativeService,
        subject_id: Option<Uuid>,
        source: ClassificationSource,
    ) -> Result<AnalysisReport> {
        let subject_id = subject_id.ok_or(GradebookError::MissingSubject)?;
        let token = self.select_subject(subject_id);

        if !self.lock().in_flight.insert(subject_id) {
            return Err(GradebookError::AnalysisInFlight(subject_id));
        }
        let _guard = InFlightGuard {
            coordinator: self,
            subject_id,
        };

        tokio::select! {
            _ = token.cancelled() => Err(GradebookError::Cancelled(subject_id)),
            report = analyze_subject(store, narrative, Some(subject_id), source) => report,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct InFlightGuard<'a> {
    coordinator: &'a AnalysisCoordinator,
    subject_id: Uuid,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.lock().in_flight.remove(&self.subject_id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::grading::tests::{grade, student, subject};
    use crate::models::AnalysisPayload;
    use crate::store::memory::MemoryStore;

    /// Replies with a fixed string after an optional pause.
    struct StubNarrative {
        reply: String,
        hold: Option<Arc<Notify>>,
    }

    impl StubNarrative {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                hold: None,
            }
        }
    }

    #[async_trait]
    impl NarrativeService for StubNarrative {
        async fn generate(&self, payload: &AnalysisPayload) -> Result<String> {
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            Ok(self.reply.replace("{subject}", &payload.subject_name))
        }
    }

    struct FailingNarrative;

    #[async_trait]
    impl NarrativeService for FailingNarrative {
        async fn generate(&self, _payload: &AnalysisPayload) -> Result<String> {
            Err(GradebookError::Status {
                code: 503,
                body: "down".to_string(),
            })
        }
    }

    fn net1_store() -> (MemoryStore, Uuid) {
        let net1 = subject("NET1", "NET1");
        let maria = student("Maria", "Cruz");
        let juan = student("Juan", "Santos");
        let grades = vec![
            grade(Some(maria.id), net1.id, Some(2.0)),
            grade(Some(juan.id), net1.id, Some(4.5)),
        ];
        let id = net1.id;
        (MemoryStore::with_records(vec![maria, juan], vec![net1], grades), id)
    }

    const NET1_REPLY: &str = r#"{"analysis":"The students of {subject} split evenly.","passedStudents":["Maria Cruz"],"failedStudents":["Juan Santos"]}"#;

    #[tokio::test]
    async fn classifies_net1_end_to_end() {
        let (store, net1) = net1_store();
        let narrative = StubNarrative::replying(NET1_REPLY);

        let report = analyze_subject(&store, &narrative, Some(net1), ClassificationSource::Service)
            .await
            .unwrap();

        assert_eq!(report.result.passed_students, vec!["Maria Cruz".to_string()]);
        assert_eq!(report.result.failed_students, vec!["Juan Santos".to_string()]);
        assert!(report.result.analysis.contains("NET1"));
        assert!(!report.result.analysis.contains(&net1.to_string()));
        assert!(report.disagreements.is_empty());
        assert!(!report.malformed);
    }

    #[tokio::test]
    async fn local_source_overrides_service_lists() {
        let (store, net1) = net1_store();
        let narrative = StubNarrative::replying("NET1 looks fine overall.");

        let report = analyze_subject(&store, &narrative, Some(net1), ClassificationSource::Local)
            .await
            .unwrap();

        assert!(report.malformed);
        assert_eq!(report.result.analysis, "NET1 looks fine overall.");
        assert_eq!(report.result.passed_students, vec!["Maria Cruz".to_string()]);
        assert_eq!(report.result.failed_students, vec!["Juan Santos".to_string()]);
    }

    #[tokio::test]
    async fn malformed_reply_is_absorbed() {
        let (store, net1) = net1_store();
        let narrative = StubNarrative::replying("plain text, not an object");

        let report = analyze_subject(&store, &narrative, Some(net1), ClassificationSource::Service)
            .await
            .unwrap();

        assert_eq!(report.result.analysis, "plain text, not an object");
        assert!(report.result.passed_students.is_empty());
        assert!(report.result.failed_students.is_empty());
        assert_eq!(report.disagreements.len(), 2);
    }

    #[tokio::test]
    async fn missing_or_unknown_subject_is_rejected() {
        let (store, _) = net1_store();
        let narrative = StubNarrative::replying(NET1_REPLY);

        let err = analyze_subject(&store, &narrative, None, ClassificationSource::Service)
            .await
            .unwrap_err();
        assert!(matches!(err, GradebookError::MissingSubject));

        let unknown = Uuid::new_v4();
        let err = analyze_subject(&store, &narrative, Some(unknown), ClassificationSource::Service)
            .await
            .unwrap_err();
        assert!(matches!(err, GradebookError::SubjectNotFound(id) if id == unknown));
    }

    #[tokio::test]
    async fn service_failure_surfaces() {
        let (store, net1) = net1_store();
        let err = analyze_subject(&store, &FailingNarrative, Some(net1), ClassificationSource::Service)
            .await
            .unwrap_err();
        assert!(matches!(err, GradebookError::Status { code: 503, .. }));
    }

    #[tokio::test]
    async fn duplicate_request_is_rejected_while_in_flight() {
        let (store, net1) = net1_store();
        let hold = Arc::new(Notify::new());
        let narrative = StubNarrative {
            reply: NET1_REPLY.to_string(),
            hold: Some(hold.clone()),
        };
        let coordinator = AnalysisCoordinator::new();

        let first = coordinator.run(&store, &narrative, Some(net1), ClassificationSource::Service);
        let second = async {
            while !coordinator.is_in_flight(net1) {
                tokio::task::yield_now().await;
            }
            let outcome = coordinator
                .run(&store, &narrative, Some(net1), ClassificationSource::Service)
                .await;
            hold.notify_one();
            outcome
        };

        let (first, second) = tokio::join!(first, second);
        assert!(first.is_ok());
        assert!(matches!(second, Err(GradebookError::AnalysisInFlight(id)) if id == net1));
        assert!(!coordinator.is_in_flight(net1));
    }

    #[tokio::test]
    async fn changing_subject_cancels_outstanding_request() {
        let (store, net1) = net1_store();
        let narrative = StubNarrative {
            reply: NET1_REPLY.to_string(),
            hold: Some(Arc::new(Notify::new())),
        };
        let coordinator = AnalysisCoordinator::new();

        let pending = coordinator.run(&store, &narrative, Some(net1), ClassificationSource::Service);
        let switch = async {
            while !coordinator.is_in_flight(net1) {
                tokio::task::yield_now().await;
            }
            coordinator.select_subject(Uuid::new_v4());
        };

        let (outcome, _) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(pending, switch)
        })
        .await
        .unwrap();

        assert!(matches!(outcome, Err(GradebookError::Cancelled(id)) if id == net1));
        assert!(!coordinator.is_in_flight(net1));
    }

    #[tokio::test]
    async fn deleted_student_keeps_grade_rows() {
        let (store, net1) = net1_store();
        let juan = store
            .list_students()
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.last_name == "Santos")
            .unwrap();
        store.delete_student(juan.id).await.unwrap();

        let grades = store.list_grades(net1).await.unwrap();
        assert_eq!(grades.len(), 2);

        let students = store.list_students().await.unwrap();
        let table = crate::report::grade_table(&grades, &students);
        assert!(table.contains(crate::grading::MISSING_STUDENT));

        let narrative = StubNarrative::replying(NET1_REPLY);
        let report = analyze_subject(&store, &narrative, Some(net1), ClassificationSource::Local)
            .await
            .unwrap();
        assert_eq!(report.assessments.len(), 1);
        assert!(report.result.failed_students.is_empty());
    }

    #[test]
    fn reselecting_same_subject_keeps_token() {
        let coordinator = AnalysisCoordinator::new();
        let subject_id = Uuid::new_v4();
        let first = coordinator.select_subject(subject_id);
        let again = coordinator.select_subject(subject_id);
        assert!(!first.is_cancelled());
        assert!(!again.is_cancelled());

        coordinator.select_subject(Uuid::new_v4());
        assert!(first.is_cancelled());
    }
}
