use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// `healthy`, or `degraded` once the retrieval context is closed.
    pub status: &'static str,
    pub uptime_secs: u64,
    pub request_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub knowledge_base_size: usize,
    pub tasks: BTreeMap<String, usize>,
}
