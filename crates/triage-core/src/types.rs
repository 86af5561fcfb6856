//! Domain types shared by the retrieval engine and the triage pipeline.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

pub type EntryId = String;

/// An immutable knowledge-base fact, loaded once at index build time.
///
/// `text` is the passage that gets embedded, formatted as `"{id}: {data}"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub id: EntryId,
    pub text: String,
}

impl CorpusEntry {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into() }
    }

    /// Build an entry from a raw `{id, data}` corpus record.
    pub fn from_record(id: &str, data: &str) -> Self {
        Self { id: id.to_string(), text: format!("{id}: {data}") }
    }
}

/// Stage-1 recall result. `position` is the entry's insertion order in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: EntryId,
    pub text: String,
    pub bi_score: f32,
    pub position: usize,
}

/// Stage-2 result; `rerank_score` is only comparable within one re-ranking call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub rerank_score: f32,
}

/// The public surface of one retrieval response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub id: EntryId,
    #[serde(rename = "data")]
    pub text: String,
    #[serde(rename = "score")]
    pub similarity_score: f32,
}

impl From<ScoredCandidate> for RetrievalHit {
    fn from(scored: ScoredCandidate) -> Self {
        Self {
            id: scored.candidate.id,
            text: scored.candidate.text,
            similarity_score: scored.rerank_score,
        }
    }
}

/// Which signal produced a merged hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    Image,
    Symptom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcedHit {
    pub hit: RetrievalHit,
    pub source: HitSource,
}

/// One class/confidence pair returned by the image classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePrediction {
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f32,
    #[serde(default)]
    pub description: String,
}

/// A possible diagnosis attached to an assessment. Never mutated once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub id: Uuid,
    pub assessment_id: Uuid,
    pub name: String,
    pub confidence: f32,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A diagnosis row as the persistence layer hands it back: every field optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    pub id: Option<String>,
    pub assessment_id: Option<String>,
    pub name: Option<String>,
    pub confidence: Option<f64>,
    pub description: Option<String>,
    pub created_at: Option<String>,
}

impl TryFrom<DiagnosisRecord> for Diagnosis {
    type Error = Error;

    fn try_from(record: DiagnosisRecord) -> Result<Self> {
        let id = parse_uuid(record.id.as_deref(), "id")?;
        let assessment_id = parse_uuid(record.assessment_id.as_deref(), "assessment_id")?;
        let name = record
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| Error::malformed("diagnosis", format!("{id}: missing name")))?;
        let confidence = record
            .confidence
            .filter(|c| (0.0..=1.0).contains(c))
            .ok_or_else(|| Error::malformed("diagnosis", format!("{id}: confidence missing or outside [0,1]")))?;
        let created_at = record
            .created_at
            .as_deref()
            .ok_or_else(|| Error::malformed("diagnosis", format!("{id}: missing created_at")))
            .and_then(|raw| {
                parse_timestamp(raw)
                    .ok_or_else(|| Error::malformed("diagnosis", format!("{id}: invalid created_at '{raw}'")))
            })?;
        Ok(Self {
            id,
            assessment_id,
            name,
            confidence: confidence as f32,
            description: record.description,
            created_at,
        })
    }
}

impl From<&Diagnosis> for DiagnosisRecord {
    fn from(d: &Diagnosis) -> Self {
        Self {
            id: Some(d.id.to_string()),
            assessment_id: Some(d.assessment_id.to_string()),
            name: Some(d.name.clone()),
            confidence: Some(f64::from(d.confidence)),
            description: d.description.clone(),
            created_at: Some(d.created_at.to_rfc3339()),
        }
    }
}

/// Accepts RFC 3339 timestamps and naive ISO-8601 ones (interpreted as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_uuid(raw: Option<&str>, field: &str) -> Result<Uuid> {
    let raw = raw.ok_or_else(|| Error::malformed("diagnosis", format!("missing {field}")))?;
    Uuid::parse_str(raw).map_err(|e| Error::malformed("diagnosis", format!("invalid {field} '{raw}': {e}")))
}

/// An assessment as stored by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub id: Uuid,
    pub symptom_description: String,
    pub image_ref: Option<String>,
    pub patient_name: Option<String>,
    pub patient_age: Option<u32>,
    pub predicted_label: Option<String>,
    pub label_description: Option<String>,
    pub severity_score: Option<u8>,
    pub severity_reason: Option<String>,
    pub recommendation_status: Option<String>,
    pub recommendation_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AssessmentRecord {
    pub fn new(id: Uuid, symptom_description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            symptom_description: symptom_description.into(),
            image_ref: None,
            patient_name: None,
            patient_age: None,
            predicted_label: None,
            label_description: None,
            severity_score: None,
            severity_reason: None,
            recommendation_status: None,
            recommendation_text: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Task lifecycle: `Submitted -> Working -> {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Submitted,
    Working,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Submitted, Self::Working) | (Self::Working, Self::Completed) | (Self::Working, Self::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Working => "working",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into(), created_at: Utc::now() }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self { role: Role::Agent, text: text.into(), created_at: Utc::now() }
    }
}

/// One unit of orchestrated work; `history` is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub status: TaskState,
    pub history: Vec<Message>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn submitted(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: TaskState::Submitted,
            history: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Discrete triage urgency bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityTier {
    Mild,
    Moderate,
    Severe,
    Critical,
}

impl SeverityTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Severe => "severe",
            Self::Moderate => "moderate",
            Self::Mild => "mild",
        }
    }

    pub fn meaning(self) -> &'static str {
        match self {
            Self::Critical => "seek immediate care",
            Self::Severe => "seek urgent care",
            Self::Moderate => "schedule routine visit",
            Self::Mild => "self-care / monitor",
        }
    }
}

impl fmt::Display for SeverityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The derived outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageResult {
    pub severity_score: u8,
    pub severity_reason: String,
    pub recommendation_status: SeverityTier,
    pub recommendation_text: String,
    pub diagnoses: Vec<Diagnosis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_label: Option<String>,
}
