//! Owns the models and the index for the lifetime of a process or test.
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use triage_core::config::{expand_path, Settings};
use triage_core::corpus::{default_corpus, load_corpus, load_corpus_dir};
use triage_core::traits::{Embedder, Reranker};
use triage_core::types::{CorpusEntry, RetrievalHit};
use triage_core::{Error, Result};
use triage_embed::{get_default_embedder, get_default_reranker, HashEmbedder};
use triage_index::VectorIndex;

use crate::service::{RetrievalParams, RetrievalService};

pub struct RetrievalContext {
    service: RetrievalService,
    params: RetrievalParams,
    closed: AtomicBool,
}

impl RetrievalContext {
    /// Load models and corpus from settings. A missing corpus or an embedding
    /// backend that cannot build it falls back to the built-in corpus.
    pub fn init(settings: &Settings) -> Result<Self> {
        let corpus = read_corpus(&expand_path(&settings.corpus.path));
        let embedder: Arc<dyn Embedder> = match get_default_embedder(&settings.embedding) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "embedding model unavailable, using hashing embedder");
                Arc::new(HashEmbedder::default())
            }
        };
        let index = build_with_fallback(embedder, corpus)?;
        let reranker = get_default_reranker(&settings.reranker);
        Ok(Self::with_components(Arc::new(index), reranker, RetrievalParams::from(&settings.retrieval)))
    }

    pub fn with_components(index: Arc<VectorIndex>, reranker: Arc<dyn Reranker>, params: RetrievalParams) -> Self {
        Self { service: RetrievalService::new(index, reranker), params, closed: AtomicBool::new(false) }
    }

    pub fn retrieve(&self, query: &str) -> Result<Vec<RetrievalHit>> {
        self.retrieve_with(query, &self.params)
    }

    pub fn retrieve_with(&self, query: &str, params: &RetrievalParams) -> Result<Vec<RetrievalHit>> {
        self.ensure_open()?;
        Ok(self.service.retrieve(query, params))
    }

    pub fn service(&self) -> Result<&RetrievalService> {
        self.ensure_open()?;
        Ok(&self.service)
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        self.service.index()
    }

    pub fn reranker(&self) -> &Arc<dyn Reranker> {
        self.service.reranker()
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(entries = self.index().len(), "retrieval context closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Retrieval("retrieval context is closed".into()));
        }
        Ok(())
    }
}

fn read_corpus(path: &Path) -> Vec<CorpusEntry> {
    let loaded = if path.is_dir() { load_corpus_dir(path) } else { load_corpus(path) };
    match loaded {
        Ok(entries) if !entries.is_empty() => entries,
        Ok(_) => {
            warn!(path = %path.display(), "corpus is empty, using built-in corpus");
            default_corpus()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corpus unavailable, using built-in corpus");
            default_corpus()
        }
    }
}

fn build_with_fallback(embedder: Arc<dyn Embedder>, corpus: Vec<CorpusEntry>) -> Result<VectorIndex> {
    match VectorIndex::build(Arc::clone(&embedder), corpus) {
        Ok(index) => Ok(index),
        Err(Error::IndexBuild(reason)) => {
            warn!(%reason, "index build failed, falling back to built-in corpus");
            VectorIndex::build(embedder, default_corpus())
                .or_else(|_| VectorIndex::build(Arc::new(HashEmbedder::default()), default_corpus()))
        }
        Err(e) => Err(e),
    }
}
