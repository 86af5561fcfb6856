//! Persistence for assessments and their possible diagnoses.
use std::sync::Arc;
use tracing::info;

use triage_core::config::{expand_path, StoreSettings};
use triage_core::traits::AssessmentStore;
use triage_core::Result;

pub mod lance;
pub mod memory;
mod schema;

pub use lance::LanceStore;
pub use memory::MemoryStore;

/// LanceDB when `store.uri` is set, otherwise an in-memory store.
pub fn open_store(settings: &StoreSettings) -> Result<Arc<dyn AssessmentStore>> {
    match &settings.uri {
        Some(uri) => {
            let path = expand_path(uri);
            Ok(Arc::new(LanceStore::open(&path.to_string_lossy())?))
        }
        None => {
            info!("store.uri not set, assessments are kept in memory");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
