use std::sync::Arc;
use tracing::{debug, info_span, warn};

use triage_core::config::RetrievalSettings;
use triage_core::traits::Reranker;
use triage_core::types::{RetrievalHit, ScoredCandidate};
use triage_core::{Error, Result};
use triage_index::VectorIndex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    pub k: usize,
    /// Stage-1 cosine floor; candidates strictly below it are dropped.
    pub min_score: f32,
    /// Stage-1 recall size; raised to `k` when smaller.
    pub rerank_pool_size: usize,
}

impl RetrievalParams {
    pub fn new(k: usize) -> Self {
        Self { k, min_score: 0.0, rerank_pool_size: k.max(10) }
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_pool_size(mut self, rerank_pool_size: usize) -> Self {
        self.rerank_pool_size = rerank_pool_size;
        self
    }

    fn pool(&self) -> usize {
        self.rerank_pool_size.max(self.k)
    }
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self::from(&RetrievalSettings::default())
    }
}

impl From<&RetrievalSettings> for RetrievalParams {
    fn from(s: &RetrievalSettings) -> Self {
        Self { k: s.top_k, min_score: s.min_score, rerank_pool_size: s.rerank_pool_size }
    }
}

/// Composes the index and a reranker into one `retrieve` call. Holds no
/// mutable state of its own.
#[derive(Clone)]
pub struct RetrievalService {
    index: Arc<VectorIndex>,
    reranker: Arc<dyn Reranker>,
}

impl RetrievalService {
    pub fn new(index: Arc<VectorIndex>, reranker: Arc<dyn Reranker>) -> Self {
        Self { index, reranker }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn reranker(&self) -> &Arc<dyn Reranker> {
        &self.reranker
    }

    /// Recall, filter, re-rank and cut to `k`. Ordering is rerank score
    /// descending, then bi-encoder score descending, then recall order.
    pub fn rank(&self, query: &str, params: &RetrievalParams) -> Result<Vec<ScoredCandidate>> {
        let _span = info_span!("retrieve", k = params.k, min_score = params.min_score).entered();
        if params.k == 0 || query.trim().is_empty() {
            return Ok(vec![]);
        }

        let q = self.index.embed_query(query)?;
        let survivors: Vec<_> = self
            .index
            .search(&q, params.pool())
            .into_iter()
            .filter(|c| c.bi_score >= params.min_score)
            .collect();
        if survivors.is_empty() {
            debug!("no candidates above min_score, skipping rerank");
            return Ok(vec![]);
        }

        let texts: Vec<String> = survivors.iter().map(|c| c.text.clone()).collect();
        let scores = self
            .reranker
            .score(query, &texts)
            .map_err(|e| Error::Retrieval(format!("rerank failed: {e:#}")))?;
        if scores.len() != survivors.len() {
            return Err(Error::Retrieval(format!(
                "reranker returned {} scores for {} candidates",
                scores.len(),
                survivors.len()
            )));
        }

        let mut scored: Vec<ScoredCandidate> = survivors
            .into_iter()
            .zip(scores)
            .map(|(candidate, s)| ScoredCandidate {
                candidate,
                rerank_score: if s.is_nan() { f32::NEG_INFINITY } else { s },
            })
            .collect();
        scored.sort_by(|a, b| {
            b.rerank_score
                .total_cmp(&a.rerank_score)
                .then_with(|| b.candidate.bi_score.total_cmp(&a.candidate.bi_score))
        });
        scored.truncate(params.k);
        debug!(returned = scored.len(), "retrieval ranked");
        Ok(scored)
    }

    pub fn try_retrieve(&self, query: &str, params: &RetrievalParams) -> Result<Vec<RetrievalHit>> {
        Ok(self.rank(query, params)?.into_iter().map(RetrievalHit::from).collect())
    }

    /// Like [`Self::try_retrieve`], but a backend failure degrades to an empty
    /// result.
    pub fn retrieve(&self, query: &str, params: &RetrievalParams) -> Vec<RetrievalHit> {
        self.try_retrieve(query, params).unwrap_or_else(|e| {
            warn!(error = %e, "retrieval failed, returning no results");
            vec![]
        })
    }
}
