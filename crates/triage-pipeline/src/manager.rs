//! End-to-end triage runs.
//!
//! A run moves its task to `Working`, retrieves candidates for the symptom
//! text and the image label (two independent retrievals, merged image-first),
//! scores severity from the top merged candidate, persists new diagnoses and
//! the assessment, then completes the task. Any failure marks the task
//! `Failed` and is returned to the caller; a failed run leaves no diagnoses
//! behind.
use chrono::Utc;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use triage_core::traits::{AssessmentStore, ImageClassifier};
use triage_core::types::{AssessmentRecord, Diagnosis, Message, SeverityTier, SourcedHit, Task, TriageResult};
use triage_core::{Error, Result};
use triage_retrieval::{merge_by_id, RetrievalContext};

use crate::health::HealthReport;
use crate::scorer::TriageScorer;
use crate::task_store::TaskStore;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TriageRequest {
    pub assessment_id: Uuid,
    pub symptom_text: String,
    pub image_label: Option<String>,
    pub image_ref: Option<String>,
    pub label_description: Option<String>,
}

impl TriageRequest {
    pub fn new(assessment_id: Uuid, symptom_text: impl Into<String>) -> Self {
        Self { assessment_id, symptom_text: symptom_text.into(), ..Default::default() }
    }

    pub fn with_image_label(mut self, label: impl Into<String>) -> Self {
        self.image_label = Some(label.into());
        self
    }

    fn task_id(&self) -> String {
        self.assessment_id.to_string()
    }

    fn image_label(&self) -> Option<&str> {
        self.image_label.as_deref().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// Capability surface of a pipeline variant.
pub trait TriagePipeline: Send + Sync {
    fn upsert_task(&self, id: &str) -> Task;
    fn run_pipeline(&self, request: &TriageRequest) -> Result<TriageResult>;
}

#[derive(Default)]
struct Stats {
    requests: AtomicU64,
    errors: AtomicU64,
}

pub struct TaskManager {
    tasks: TaskStore,
    retrieval: Arc<RetrievalContext>,
    store: Arc<dyn AssessmentStore>,
    classifier: Option<Arc<dyn ImageClassifier>>,
    stats: Stats,
    started: Instant,
}

impl TaskManager {
    pub fn new(retrieval: Arc<RetrievalContext>, store: Arc<dyn AssessmentStore>) -> Self {
        Self {
            tasks: TaskStore::new(),
            retrieval,
            store,
            classifier: None,
            stats: Stats::default(),
            started: Instant::now(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ImageClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn run_triage_pipeline(
        &self,
        assessment_id: Uuid,
        symptom_text: &str,
        image_label: Option<&str>,
    ) -> Result<TriageResult> {
        let mut request = TriageRequest::new(assessment_id, symptom_text);
        request.image_label = image_label.map(str::to_string);
        self.run_pipeline(&request)
    }

    /// Classify `image_ref` and run the pipeline seeded with the top label.
    /// With no usable prediction the run continues on symptoms alone.
    pub fn run_image_triage(&self, assessment_id: Uuid, symptom_text: &str, image_ref: &str) -> Result<TriageResult> {
        let classifier = self
            .classifier
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("no image classifier configured".into()))?;
        let mut request = TriageRequest::new(assessment_id, symptom_text);
        request.image_ref = Some(image_ref.to_string());
        match classifier.classify(image_ref).into_iter().next() {
            Some(top) => {
                info!(image_ref, label = %top.label, confidence = top.confidence, "image classified");
                request.image_label = Some(top.label);
                request.label_description = Some(top.description).filter(|d| !d.is_empty());
            }
            None => warn!(image_ref, "classifier returned no predictions, using symptoms only"),
        }
        self.run_pipeline(&request)
    }

    pub fn health(&self) -> HealthReport {
        let requests = self.stats.requests.load(Ordering::Relaxed);
        let errors = self.stats.errors.load(Ordering::Relaxed);
        HealthReport {
            status: if self.retrieval.is_closed() { "degraded" } else { "healthy" },
            uptime_secs: self.started.elapsed().as_secs(),
            request_count: requests,
            error_count: errors,
            error_rate: if requests == 0 { 0.0 } else { errors as f64 / requests as f64 },
            knowledge_base_size: self.retrieval.index().len(),
            tasks: self
                .tasks
                .counts_by_state()
                .into_iter()
                .map(|(state, n)| (state.as_str().to_string(), n))
                .collect(),
        }
    }

    fn execute(&self, request: &TriageRequest) -> Result<TriageResult> {
        let task_id = request.task_id();
        let symptoms = request.symptom_text.trim();
        let label = request.image_label();
        if symptoms.is_empty() && label.is_none() {
            return Err(Error::Pipeline { task_id, reason: "no symptom text or image label to triage".into() });
        }

        // Retrieval runs without the task lock.
        let image_hits = match label {
            Some(l) => self.retrieval.retrieve(l)?,
            None => vec![],
        };
        let symptom_hits = if symptoms.is_empty() { vec![] } else { self.retrieval.retrieve(symptoms)? };
        let merged = merge_by_id(image_hits, symptom_hits);
        self.tasks
            .append_message(&task_id, Message::agent(format!("Retrieved {} candidate conditions", merged.len())))?;

        let assessment_id = request.assessment_id;
        let (existing, known) = self.existing_diagnoses(assessment_id)?;
        let now = Utc::now();
        let new: Vec<Diagnosis> = merged
            .iter()
            .map(|h| self.to_diagnosis(assessment_id, h, now))
            .filter(|d| !known.contains(&d.id))
            .collect();

        let mut result = match merged.first() {
            Some(top) => {
                let confidence = self.retrieval.reranker().calibrate(top.hit.similarity_score);
                let (name, description) = split_passage(&top.hit.text);
                let assessed = TriageScorer::score(confidence);
                TriageResult {
                    severity_score: assessed.severity,
                    severity_reason: TriageScorer::reason(name, confidence),
                    recommendation_status: assessed.tier,
                    recommendation_text: TriageScorer::recommendation(assessed.tier, name, description),
                    diagnoses: vec![],
                    predicted_label: label.map(str::to_string),
                }
            }
            None => TriageResult {
                severity_score: 1,
                severity_reason: "No condition in the knowledge base matched the reported symptoms".into(),
                recommendation_status: SeverityTier::Mild,
                recommendation_text: "Monitor your symptoms and practice self-care. Seek care if they worsen.".into(),
                diagnoses: vec![],
                predicted_label: label.map(str::to_string),
            },
        };
        result.diagnoses = existing.into_iter().chain(new.iter().cloned()).collect();

        self.persist(request, &new, &result)?;
        Ok(result)
    }

    /// Stored diagnoses that validate, plus the ids of every stored row.
    /// Malformed rows are skipped but still reserve their id, so a run never
    /// writes a second row under it.
    fn existing_diagnoses(&self, assessment_id: Uuid) -> Result<(Vec<Diagnosis>, HashSet<Uuid>)> {
        let mut taken = HashSet::new();
        let mut valid = HashSet::new();
        let mut out = Vec::new();
        for record in self.store.list_diagnoses(assessment_id)? {
            if let Some(id) = record.id.as_deref().and_then(|raw| Uuid::parse_str(raw.trim()).ok()) {
                taken.insert(id);
            }
            match Diagnosis::try_from(record) {
                Ok(d) if valid.insert(d.id) => out.push(d),
                Ok(d) => warn!(id = %d.id, "duplicate stored diagnosis skipped"),
                Err(e) => warn!(%assessment_id, error = %e, "skipping stored diagnosis"),
            }
        }
        Ok((out, taken))
    }

    fn to_diagnosis(&self, assessment_id: Uuid, hit: &SourcedHit, created_at: chrono::DateTime<Utc>) -> Diagnosis {
        let (name, description) = split_passage(&hit.hit.text);
        Diagnosis {
            id: diagnosis_id(assessment_id, &hit.hit.id),
            assessment_id,
            name: name.to_string(),
            confidence: self.retrieval.reranker().calibrate(hit.hit.similarity_score),
            description: description.map(str::to_string),
            created_at,
        }
    }

    /// Insert new diagnoses, then write the computed fields onto the
    /// assessment. If the second write fails the inserted rows are removed.
    fn persist(&self, request: &TriageRequest, new: &[Diagnosis], result: &TriageResult) -> Result<()> {
        let mut record = self
            .store
            .get_assessment(request.assessment_id)?
            .unwrap_or_else(|| AssessmentRecord::new(request.assessment_id, request.symptom_text.trim()));
        if !request.symptom_text.trim().is_empty() {
            record.symptom_description = request.symptom_text.trim().to_string();
        }
        if request.image_ref.is_some() {
            record.image_ref = request.image_ref.clone();
        }
        if let Some(label) = request.image_label() {
            record.predicted_label = Some(label.to_string());
            record.label_description = request.label_description.clone().or(record.label_description);
        }
        record.severity_score = Some(result.severity_score);
        record.severity_reason = Some(result.severity_reason.clone());
        record.recommendation_status = Some(result.recommendation_status.as_str().to_string());
        record.recommendation_text = Some(result.recommendation_text.clone());
        record.updated_at = Utc::now();

        self.store.insert_diagnoses(new)?;
        if let Err(e) = self.store.upsert_assessment(&record) {
            let ids: Vec<Uuid> = new.iter().map(|d| d.id).collect();
            if let Err(undo) = self.store.delete_diagnoses(&ids) {
                error!(assessment_id = %request.assessment_id, error = %undo, "could not remove diagnoses of failed run");
            }
            return Err(e);
        }
        Ok(())
    }
}

impl TriagePipeline for TaskManager {
    fn upsert_task(&self, id: &str) -> Task {
        self.tasks.upsert_task(id)
    }

    fn run_pipeline(&self, request: &TriageRequest) -> Result<TriageResult> {
        let task_id = request.task_id();
        let _span = info_span!("triage", task_id = %task_id).entered();
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        self.tasks.upsert_task(&task_id);

        let summary = match request.image_label() {
            Some(label) => format!("{} [image label: {label}]", request.symptom_text.trim()),
            None => request.symptom_text.trim().to_string(),
        };
        let checkpoint = match self.tasks.begin_run(&task_id, Message::user(summary)) {
            Ok(c) => c,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| self.execute(request))).unwrap_or_else(|panic| {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "pipeline panicked".to_string());
            Err(Error::Pipeline { task_id: task_id.clone(), reason })
        });

        match outcome {
            Ok(result) => {
                let message = format!(
                    "Severity {} ({}): {}",
                    result.severity_score, result.recommendation_status, result.recommendation_text
                );
                self.tasks.complete(&task_id, Message::agent(message))?;
                info!(severity = result.severity_score, tier = %result.recommendation_status, diagnoses = result.diagnoses.len(), "triage completed");
                Ok(result)
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                let reason = match e {
                    Error::Pipeline { reason, .. } => reason,
                    other => other.to_string(),
                };
                error!(%reason, "triage failed");
                if let Err(state_err) = self.tasks.fail(&task_id, checkpoint, &reason) {
                    error!(error = %state_err, "could not mark task failed");
                }
                Err(Error::Pipeline { task_id, reason })
            }
        }
    }
}

/// Deterministic per assessment and knowledge-base entry.
pub fn diagnosis_id(assessment_id: Uuid, entry_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{assessment_id}:{entry_id}").as_bytes())
}

/// `"Name: description"` into its parts; no colon means no description.
fn split_passage(text: &str) -> (&str, Option<&str>) {
    match text.split_once(':') {
        Some((name, rest)) => {
            let rest = rest.trim();
            (name.trim(), (!rest.is_empty()).then_some(rest))
        }
        None => (text.trim(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_passage_on_first_colon() {
        assert_eq!(split_passage("Eczema: itchy: dry"), ("Eczema", Some("itchy: dry")));
        assert_eq!(split_passage("Eczema"), ("Eczema", None));
        assert_eq!(split_passage("Eczema:  "), ("Eczema", None));
    }

    #[test]
    fn diagnosis_ids_are_stable() {
        let a = Uuid::new_v4();
        assert_eq!(diagnosis_id(a, "Eczema"), diagnosis_id(a, "Eczema"));
        assert_ne!(diagnosis_id(a, "Eczema"), diagnosis_id(a, "Acne"));
        assert_ne!(diagnosis_id(a, "Eczema"), diagnosis_id(Uuid::new_v4(), "Eczema"));
    }
}
