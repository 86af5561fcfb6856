use uuid::Uuid;

use crate::error::Result;
use crate::types::{AssessmentRecord, Diagnosis, DiagnosisRecord, ImagePrediction};

/// Bi-encoder: one L2-normalized vector per text.
pub trait Embedder: Send + Sync {
    /// Stable identifier for the model (e.g. `bge-m3:d1024`); keys the embedding cache.
    fn id(&self) -> &str;
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Pairwise relevance model. Must return exactly one score per candidate, in order.
pub trait Reranker: Send + Sync {
    fn score(&self, query: &str, candidates: &[String]) -> anyhow::Result<Vec<f32>>;

    /// Map a raw score from `score` onto a confidence in `[0, 1]`.
    fn calibrate(&self, raw: f32) -> f32 {
        1.0 / (1.0 + (-raw).exp())
    }
}

/// Opaque image labeler. Returns predictions highest confidence first, or an
/// empty list when classification fails.
pub trait ImageClassifier: Send + Sync {
    fn classify(&self, image_ref: &str) -> Vec<ImagePrediction>;
}

/// Persistence collaborator for assessments and their possible diagnoses.
pub trait AssessmentStore: Send + Sync {
    fn get_assessment(&self, id: Uuid) -> Result<Option<AssessmentRecord>>;
    fn upsert_assessment(&self, record: &AssessmentRecord) -> Result<()>;
    /// Raw rows; validation into [`Diagnosis`] is the caller's job.
    fn list_diagnoses(&self, assessment_id: Uuid) -> Result<Vec<DiagnosisRecord>>;
    fn insert_diagnoses(&self, diagnoses: &[Diagnosis]) -> Result<()>;
    fn delete_diagnoses(&self, ids: &[Uuid]) -> Result<()>;
}
