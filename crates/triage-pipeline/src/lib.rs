//! Triage orchestration: severity scoring, the task lifecycle and the
//! pipeline that ties retrieval, classification and persistence together.
pub mod classifier;
pub mod health;
pub mod manager;
pub mod scorer;
pub mod task_store;

pub use classifier::PrecomputedClassifier;
pub use health::HealthReport;
pub use manager::{TaskManager, TriagePipeline, TriageRequest};
pub use scorer::{SeverityAssessment, TriageScorer};
pub use task_store::{RunCheckpoint, TaskStore};
