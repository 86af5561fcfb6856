//! Embedding cache keyed by `(content_hash, embedder_id)`.
//!
//! Consulted before calling the embedder and written through on misses, so
//! reloads and re-adds of unchanged passages reuse their vectors. A reload
//! evicts passages that left the corpus.
use anyhow::{anyhow, ensure, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use triage_core::traits::Embedder;

pub fn hash_content(s: &str) -> String {
    blake3::hash(s.as_bytes()).to_hex().to_string()
}

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub content_hash: String,
    pub embedder_id: String,
    pub vector: Vec<f32>,
}

#[derive(Default)]
pub struct EmbeddingCache {
    entries: Mutex<HashMap<(String, String), Vec<f32>>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_many(&self, embedder_id: &str, hashes: &[String]) -> HashMap<String, Vec<f32>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        hashes
            .iter()
            .filter_map(|h| {
                entries
                    .get(&(h.clone(), embedder_id.to_string()))
                    .map(|v| (h.clone(), v.clone()))
            })
            .collect()
    }

    pub fn put_many(&self, new_entries: Vec<CacheEntry>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for e in new_entries {
            entries.insert((e.content_hash, e.embedder_id), e.vector);
        }
    }

    /// Drop every vector of `embedder_id` whose content hash is not in `keep`.
    /// Returns how many entries were evicted.
    pub fn retain(&self, embedder_id: &str, keep: &HashSet<String>) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(hash, id), _| id != embedder_id || keep.contains(hash));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Embed `texts` in order, serving repeats from `cache`. Every returned vector
/// has the embedder's dimension.
pub fn embed_cached(embedder: &dyn Embedder, cache: &EmbeddingCache, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(vec![]);
    }
    let hashes: Vec<String> = texts.iter().map(|t| hash_content(t)).collect();
    let hits = cache.get_many(embedder.id(), &hashes);

    let mut pending: HashSet<&str> = HashSet::new();
    let mut misses: Vec<usize> = Vec::new();
    for (i, h) in hashes.iter().enumerate() {
        if !hits.contains_key(h) && pending.insert(h.as_str()) {
            misses.push(i);
        }
    }

    let mut fresh: HashMap<String, Vec<f32>> = HashMap::new();
    if !misses.is_empty() {
        let miss_texts: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
        let vectors = embedder.embed_batch(&miss_texts)?;
        ensure!(
            vectors.len() == miss_texts.len(),
            "embedder returned {} vectors for {} texts",
            vectors.len(),
            miss_texts.len()
        );
        let mut written = Vec::with_capacity(vectors.len());
        for (&i, v) in misses.iter().zip(vectors) {
            ensure!(v.len() == embedder.dim(), "embedding dim {} != {}", v.len(), embedder.dim());
            written.push(CacheEntry { content_hash: hashes[i].clone(), embedder_id: embedder.id().to_string(), vector: v.clone() });
            fresh.insert(hashes[i].clone(), v);
        }
        cache.put_many(written);
    }

    hashes
        .iter()
        .map(|h| {
            hits.get(h)
                .or_else(|| fresh.get(h))
                .cloned()
                .ok_or_else(|| anyhow!("missing embedding for content hash {}", h))
        })
        .collect()
}
