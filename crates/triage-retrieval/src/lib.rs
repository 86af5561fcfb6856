//! Two-stage retrieval: flat inner-product recall, then pairwise re-ranking.
pub mod context;
pub mod merge;
pub mod service;

pub use context::RetrievalContext;
pub use merge::merge_by_id;
pub use service::{RetrievalParams, RetrievalService};
