//! Exact (flat) inner-product search.
//!
//! Readers clone an `Arc` to the current snapshot and search it without
//! holding any lock. Writers serialize on a separate mutex, build the next
//! snapshot off to the side and swap it in, so a search sees either all of
//! an `add` or none of it.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

use triage_core::traits::Embedder;
use triage_core::types::{Candidate, CorpusEntry};
use triage_core::{Error, Result};

use crate::cache::{embed_cached, hash_content, EmbeddingCache};

#[derive(Default)]
struct Snapshot {
    entries: Vec<CorpusEntry>,
    /// Row-major, `entries.len() * dim`.
    vectors: Vec<f32>,
    positions: HashMap<String, usize>,
}

impl Snapshot {
    fn row(&self, i: usize, dim: usize) -> &[f32] {
        &self.vectors[i * dim..(i + 1) * dim]
    }
}

pub struct VectorIndex {
    embedder: Arc<dyn Embedder>,
    cache: EmbeddingCache,
    dim: usize,
    snapshot: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
}

impl VectorIndex {
    /// Embed every entry and build the index. Repeated ids keep their first
    /// occurrence. Fails with `IndexBuild` when the embedder cannot produce
    /// vectors; callers decide on a fallback corpus.
    pub fn build(embedder: Arc<dyn Embedder>, entries: Vec<CorpusEntry>) -> Result<Self> {
        let dim = embedder.dim();
        let index = Self {
            embedder,
            cache: EmbeddingCache::new(),
            dim,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            writer: Mutex::new(()),
        };
        index.reload(entries)?;
        Ok(index)
    }

    /// Rebuild from a new corpus and swap it in atomically.
    pub fn reload(&self, entries: Vec<CorpusEntry>) -> Result<()> {
        let started = Instant::now();
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut positions = HashMap::with_capacity(entries.len());
        let mut unique = Vec::with_capacity(entries.len());
        for entry in entries {
            if positions.contains_key(&entry.id) {
                warn!(id = %entry.id, "duplicate corpus id at build, keeping first occurrence");
                continue;
            }
            positions.insert(entry.id.clone(), unique.len());
            unique.push(entry);
        }

        let texts: Vec<String> = unique.iter().map(|e| e.text.clone()).collect();
        let vectors = embed_cached(self.embedder.as_ref(), &self.cache, &texts)
            .map_err(|e| Error::IndexBuild(format!("{e:#}")))?;

        let live: HashSet<String> = texts.iter().map(|t| hash_content(t)).collect();
        let evicted = self.cache.retain(self.embedder.id(), &live);
        if evicted > 0 {
            debug!(evicted, "pruned stale cached embeddings");
        }

        let next = Snapshot { entries: unique, vectors: vectors.concat(), positions };
        info!(
            entries = next.entries.len(),
            dim = self.dim,
            embedder = self.embedder.id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built vector index"
        );
        self.swap(next);
        Ok(())
    }

    /// Embed and append one entry without re-embedding the rest of the corpus.
    pub fn add(&self, entry: CorpusEntry) -> Result<()> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.current();
        if current.positions.contains_key(&entry.id) {
            return Err(Error::IndexBuild(format!("entry '{}' is already indexed", entry.id)));
        }

        let vector = embed_cached(self.embedder.as_ref(), &self.cache, std::slice::from_ref(&entry.text))
            .map_err(|e| Error::IndexBuild(format!("{e:#}")))?
            .remove(0);

        let mut entries = current.entries.clone();
        let mut vectors = Vec::with_capacity(current.vectors.len() + self.dim);
        vectors.extend_from_slice(&current.vectors);
        vectors.extend_from_slice(&vector);
        let mut positions = current.positions.clone();
        positions.insert(entry.id.clone(), entries.len());
        debug!(id = %entry.id, position = entries.len(), "added index entry");
        entries.push(entry);

        self.swap(Snapshot { entries, vectors, positions });
        Ok(())
    }

    pub fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self
            .embedder
            .embed_batch(&[text.to_string()])
            .map_err(|e| Error::Retrieval(format!("query embedding failed: {e:#}")))?;
        if vectors.len() != 1 {
            return Err(Error::Retrieval(format!("expected one query vector, got {}", vectors.len())));
        }
        Ok(vectors.remove(0))
    }

    /// Top `k` entries by inner product with `query`, descending; ties keep
    /// insertion order. Empty for an empty index, `k == 0`, or a query of
    /// the wrong dimension.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Candidate> {
        let snapshot = self.current();
        if k == 0 || snapshot.entries.is_empty() {
            return vec![];
        }
        if query.len() != self.dim {
            warn!(expected = self.dim, actual = query.len(), "query dimension mismatch");
            return vec![];
        }

        let mut scored: Vec<(usize, f32)> = (0..snapshot.entries.len())
            .map(|i| {
                let s: f32 = snapshot.row(i, self.dim).iter().zip(query).map(|(a, b)| a * b).sum();
                (i, if s.is_nan() { f32::NEG_INFINITY } else { s })
            })
            .collect();
        // Stable: equal scores stay in insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, score)| {
                let entry = &snapshot.entries[i];
                Candidate { id: entry.id.clone(), text: entry.text.clone(), bi_score: score, position: i }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.current().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn entry(&self, id: &str) -> Option<CorpusEntry> {
        let snapshot = self.current();
        snapshot.positions.get(id).map(|&i| snapshot.entries[i].clone())
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn swap(&self, next: Snapshot) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }
}
