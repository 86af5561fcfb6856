use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

use uuid::Uuid;

use triage_core::traits::AssessmentStore;
use triage_core::types::{
    AssessmentRecord, CorpusEntry, Diagnosis, DiagnosisRecord, Role, SeverityTier, TaskState,
};
use triage_core::{Error, Result};
use triage_embed::{HashEmbedder, LexicalReranker};
use triage_index::VectorIndex;
use triage_pipeline::manager::diagnosis_id;
use triage_pipeline::{PrecomputedClassifier, TaskManager, TriagePipeline, TriageRequest};
use triage_retrieval::{RetrievalContext, RetrievalParams};
use triage_store::MemoryStore;

fn context() -> Arc<RetrievalContext> {
    let corpus = vec![
        CorpusEntry::from_record("Eczema", "itchy red rash with dry skin"),
        CorpusEntry::from_record("Pneumonia", "fever cough and difficulty breathing"),
        CorpusEntry::from_record("Acne", "pimples on the face"),
    ];
    let index = VectorIndex::build(Arc::new(HashEmbedder::new(256)), corpus).unwrap();
    Arc::new(RetrievalContext::with_components(
        Arc::new(index),
        Arc::new(LexicalReranker::new()),
        RetrievalParams::new(3).with_min_score(0.1),
    ))
}

fn manager_with(store: Arc<dyn AssessmentStore>) -> TaskManager {
    TaskManager::new(context(), store)
}

/// Delegates to a memory store, optionally failing or panicking on demand.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_upsert: AtomicBool,
    panic_on_list: AtomicBool,
}

impl AssessmentStore for FlakyStore {
    fn get_assessment(&self, id: Uuid) -> Result<Option<AssessmentRecord>> {
        self.inner.get_assessment(id)
    }
    fn upsert_assessment(&self, record: &AssessmentRecord) -> Result<()> {
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(Error::Storage("database is read-only".into()));
        }
        self.inner.upsert_assessment(record)
    }
    fn list_diagnoses(&self, assessment_id: Uuid) -> Result<Vec<DiagnosisRecord>> {
        if self.panic_on_list.load(Ordering::SeqCst) {
            panic!("boom");
        }
        self.inner.list_diagnoses(assessment_id)
    }
    fn insert_diagnoses(&self, diagnoses: &[Diagnosis]) -> Result<()> {
        self.inner.insert_diagnoses(diagnoses)
    }
    fn delete_diagnoses(&self, ids: &[Uuid]) -> Result<()> {
        self.inner.delete_diagnoses(ids)
    }
}

#[test]
fn upsert_is_idempotent_before_a_run() {
    let manager = manager_with(Arc::new(MemoryStore::new()));
    let first = manager.upsert_task("t-1");
    let second = manager.upsert_task("t-1");
    assert_eq!(first.status, TaskState::Submitted);
    assert_eq!(first, second);
}

#[test]
fn concurrent_upserts_create_one_task() {
    let manager = manager_with(Arc::new(MemoryStore::new()));
    let barrier = Barrier::new(8);
    let tasks: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    manager.upsert_task("shared")
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(tasks.windows(2).all(|w| w[0] == w[1]), "every caller observes the same task");
    assert_eq!(manager.tasks().len(), 1);
}

#[test]
fn symptom_run_completes_and_persists() {
    let store = Arc::new(MemoryStore::new());
    let manager = manager_with(store.clone());
    let id = Uuid::new_v4();

    let result = manager.run_triage_pipeline(id, "itchy rash", None).unwrap();
    assert_eq!(result.severity_score, 5);
    assert_eq!(result.recommendation_status, SeverityTier::Critical);
    assert_eq!(result.severity_reason, "Based on analysis of Eczema with 100.00% confidence");
    assert_eq!(
        result.recommendation_text,
        "Seek immediate medical attention for Eczema. itchy red rash with dry skin"
    );
    assert_eq!(result.diagnoses.len(), 1);
    assert_eq!(result.diagnoses[0].id, diagnosis_id(id, "Eczema"));
    assert_eq!(result.predicted_label, None);

    let task = manager.tasks().get(&id.to_string()).unwrap();
    assert_eq!(task.status, TaskState::Completed);
    assert_eq!(task.history.len(), 3);
    assert_eq!(task.history[0].role, Role::User);
    assert!(task.history[2].text.starts_with("Severity 5 (critical)"));

    let record = store.get_assessment(id).unwrap().unwrap();
    assert_eq!(record.symptom_description, "itchy rash");
    assert_eq!(record.severity_score, Some(5));
    assert_eq!(record.recommendation_status.as_deref(), Some("critical"));
    assert_eq!(store.list_diagnoses(id).unwrap().len(), 1);
}

#[test]
fn partial_match_scores_lower_tier() {
    let manager = manager_with(Arc::new(MemoryStore::new()));
    let result = manager.run_triage_pipeline(Uuid::new_v4(), "itchy scalp flakes rash", None).unwrap();
    assert_eq!(result.severity_score, 2);
    assert_eq!(result.recommendation_status, SeverityTier::Moderate);
    assert_eq!(result.severity_reason, "Based on analysis of Eczema with 50.00% confidence");
    assert!(result.recommendation_text.starts_with("Schedule a routine appointment for Eczema."));
    assert!((result.diagnoses[0].confidence - 0.5).abs() < 1e-6);
}

#[test]
fn image_label_results_take_precedence() {
    let store = Arc::new(MemoryStore::new());
    let manager = manager_with(store.clone());
    let id = Uuid::new_v4();

    let result = manager.run_triage_pipeline(id, "fever cough breathing", Some("acne")).unwrap();
    let names: Vec<_> = result.diagnoses.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["Acne", "Pneumonia"]);
    assert!(result.severity_reason.contains("Acne"));
    assert_eq!(result.predicted_label.as_deref(), Some("acne"));
    assert_eq!(store.get_assessment(id).unwrap().unwrap().predicted_label.as_deref(), Some("acne"));
}

#[test]
fn no_match_completes_as_mild_with_no_diagnoses() {
    let manager = manager_with(Arc::new(MemoryStore::new()));
    let id = Uuid::new_v4();
    let result = manager.run_triage_pipeline(id, "xylophone", None).unwrap();
    assert_eq!(result.severity_score, 1);
    assert_eq!(result.recommendation_status, SeverityTier::Mild);
    assert!(result.diagnoses.is_empty());
    assert_eq!(manager.tasks().get(&id.to_string()).unwrap().status, TaskState::Completed);
}

#[test]
fn existing_diagnoses_come_first_and_malformed_rows_are_skipped() {
    let store = Arc::new(MemoryStore::new());
    let id = Uuid::new_v4();
    let prior = Diagnosis {
        id: Uuid::new_v4(),
        assessment_id: id,
        name: "Contact dermatitis".into(),
        confidence: 0.3,
        description: None,
        created_at: chrono::Utc::now(),
    };
    let already_known = Diagnosis { id: diagnosis_id(id, "Eczema"), name: "Eczema".into(), ..prior.clone() };
    store.insert_diagnoses(&[prior.clone(), already_known.clone()]).unwrap();
    store.insert_raw_diagnosis(DiagnosisRecord {
        id: Some(Uuid::new_v4().to_string()),
        assessment_id: Some(id.to_string()),
        name: None,
        confidence: Some(2.0),
        ..Default::default()
    });

    let manager = manager_with(store.clone());
    let result = manager.run_triage_pipeline(id, "itchy rash", None).unwrap();
    assert_eq!(result.diagnoses, vec![prior, already_known], "known candidate is not duplicated");
    assert_eq!(store.diagnosis_count(), 3, "nothing new was inserted");
}

#[test]
fn malformed_row_under_a_candidate_id_is_skipped_not_fatal() {
    let store = Arc::new(MemoryStore::new());
    let id = Uuid::new_v4();
    store.insert_raw_diagnosis(DiagnosisRecord {
        id: Some(diagnosis_id(id, "Eczema").to_string()),
        assessment_id: Some(id.to_string()),
        name: Some("Eczema".into()),
        confidence: Some(0.9),
        description: None,
        created_at: None,
    });

    let manager = manager_with(store.clone());
    let result = manager.run_triage_pipeline(id, "itchy rash", None).unwrap();
    assert_eq!(result.severity_score, 5);
    assert!(result.diagnoses.is_empty(), "the malformed row is not reported and its id is not reused");
    assert_eq!(store.diagnosis_count(), 1);
    assert_eq!(manager.tasks().get(&id.to_string()).unwrap().status, TaskState::Completed);
}

#[test]
fn persistence_failure_marks_task_failed_and_rolls_back() {
    let store = Arc::new(FlakyStore::default());
    store.fail_upsert.store(true, Ordering::SeqCst);
    let manager = manager_with(store.clone());
    let id = Uuid::new_v4();

    let err = manager.run_triage_pipeline(id, "itchy rash", None).unwrap_err();
    match &err {
        Error::Pipeline { task_id, reason } => {
            assert_eq!(task_id, &id.to_string());
            assert!(reason.contains("read-only"), "{reason}");
        }
        other => panic!("unexpected error {other:?}"),
    }

    let task = manager.tasks().get(&id.to_string()).unwrap();
    assert_eq!(task.status, TaskState::Failed);
    assert!(task.error.as_deref().unwrap().contains("read-only"));
    assert_eq!(task.history.len(), 2, "progress messages are rolled back");
    assert!(task.history[1].text.starts_with("Triage failed:"));
    assert_eq!(store.inner.diagnosis_count(), 0, "inserted diagnoses are removed again");
}

#[test]
fn panics_inside_the_pipeline_fail_the_task() {
    let store = Arc::new(FlakyStore::default());
    store.panic_on_list.store(true, Ordering::SeqCst);
    let manager = manager_with(store);
    let id = Uuid::new_v4();

    let err = manager.run_triage_pipeline(id, "itchy rash", None).unwrap_err();
    assert!(matches!(&err, Error::Pipeline { reason, .. } if reason == "boom"), "{err}");
    assert_eq!(manager.tasks().get(&id.to_string()).unwrap().status, TaskState::Failed);
}

#[test]
fn missing_input_and_closed_context_fail_explicitly() {
    let manager = manager_with(Arc::new(MemoryStore::new()));
    let id = Uuid::new_v4();
    assert!(matches!(manager.run_triage_pipeline(id, "  ", None), Err(Error::Pipeline { .. })));
    assert_eq!(manager.tasks().get(&id.to_string()).unwrap().status, TaskState::Failed);

    let ctx = context();
    let manager = TaskManager::new(ctx.clone(), Arc::new(MemoryStore::new()));
    ctx.close();
    let id = Uuid::new_v4();
    let err = manager.run_triage_pipeline(id, "itchy rash", None).unwrap_err();
    assert!(matches!(err, Error::Pipeline { ref reason, .. } if reason.contains("closed")));
    assert_eq!(manager.health().status, "degraded");
}

#[test]
fn status_never_reverts() {
    let manager = manager_with(Arc::new(MemoryStore::new()));
    let id = Uuid::new_v4();
    manager.run_triage_pipeline(id, "itchy rash", None).unwrap();

    let err = manager.run_triage_pipeline(id, "itchy rash", None).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition { from: TaskState::Completed, to: TaskState::Working, .. }
    ));
    let task = manager.upsert_task(&id.to_string());
    assert_eq!(task.status, TaskState::Completed);
    assert_eq!(task.history.len(), 3);
}

#[test]
fn concurrent_runs_each_reach_a_terminal_state() {
    let manager = manager_with(Arc::new(MemoryStore::new()));
    let shared = Uuid::new_v4();
    let barrier = Barrier::new(12);
    let (distinct, same): (Vec<_>, Vec<_>) = std::thread::scope(|s| {
        let distinct: Vec<_> = (0..6)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    manager.run_pipeline(&TriageRequest::new(Uuid::new_v4(), "itchy rash"))
                })
            })
            .collect();
        let same: Vec<_> = (0..6)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    manager.run_pipeline(&TriageRequest::new(shared, "fever cough").with_image_label("acne"))
                })
            })
            .collect();
        (
            distinct.into_iter().map(|h| h.join().unwrap()).collect(),
            same.into_iter().map(|h| h.join().unwrap()).collect(),
        )
    });

    assert!(distinct.iter().all(|r| r.is_ok()));
    assert_eq!(same.iter().filter(|r| r.is_ok()).count(), 1, "one run per task");
    assert!(same.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(e, Error::InvalidTransition { .. })));
    assert_eq!(manager.tasks().counts_by_state().get(&TaskState::Completed), Some(&7));
}

#[test]
fn image_triage_uses_top_prediction() {
    let classifier = PrecomputedClassifier::from_json(
        r#"{
            "img-1.jpg": [
                {"class": "eczema photos", "confidence": 0.4},
                {"class": "acne", "confidence": 0.9, "description": "Acne vulgaris"}
            ],
            "odd.jpg": [{"class": "broken arm", "confidence": 0.99}]
        }"#,
    )
    .unwrap();
    let store = Arc::new(MemoryStore::new());
    let manager = manager_with(store.clone()).with_classifier(Arc::new(classifier));

    let id = Uuid::new_v4();
    let result = manager.run_image_triage(id, "", "img-1.jpg").unwrap();
    assert_eq!(result.predicted_label.as_deref(), Some("acne"));
    assert_eq!(result.diagnoses[0].name, "Acne");
    let record = store.get_assessment(id).unwrap().unwrap();
    assert_eq!(record.image_ref.as_deref(), Some("img-1.jpg"));
    assert_eq!(record.label_description.as_deref(), Some("Acne vulgaris"));

    // Labels outside the taxonomy are dropped, so only symptoms remain.
    let result = manager.run_image_triage(Uuid::new_v4(), "itchy rash", "odd.jpg").unwrap();
    assert_eq!(result.predicted_label, None);
    assert_eq!(result.diagnoses[0].name, "Eczema");
}

#[test]
fn image_triage_requires_a_classifier() {
    let manager = manager_with(Arc::new(MemoryStore::new()));
    let err = manager.run_image_triage(Uuid::new_v4(), "itchy rash", "img.jpg").unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn health_reports_counts() {
    let manager = manager_with(Arc::new(MemoryStore::new()));
    manager.run_triage_pipeline(Uuid::new_v4(), "itchy rash", None).unwrap();
    manager.run_triage_pipeline(Uuid::new_v4(), "", None).unwrap_err();
    manager.upsert_task("pending");

    let health = manager.health();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.request_count, 2);
    assert_eq!(health.error_count, 1);
    assert!((health.error_rate - 0.5).abs() < f64::EPSILON);
    assert_eq!(health.knowledge_base_size, 3);
    assert_eq!(health.tasks.get("completed"), Some(&1));
    assert_eq!(health.tasks.get("failed"), Some(&1));
    assert_eq!(health.tasks.get("submitted"), Some(&1));

    let ids: HashSet<_> = health.tasks.keys().cloned().collect();
    assert!(!ids.contains("working"));
}
