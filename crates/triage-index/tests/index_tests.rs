use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use proptest::prelude::*;

use triage_core::traits::Embedder;
use triage_core::types::CorpusEntry;
use triage_core::Error;
use triage_embed::HashEmbedder;
use triage_index::VectorIndex;

/// Maps known texts to fixed vectors; unknown texts fail.
struct TableEmbedder {
    dim: usize,
    table: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl TableEmbedder {
    fn new(dim: usize, rows: &[(&str, Vec<f32>)]) -> Self {
        Self {
            dim,
            table: rows.iter().map(|(t, v)| (t.to_string(), v.clone())).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl Embedder for TableEmbedder {
    fn id(&self) -> &str {
        "table"
    }
    fn dim(&self) -> usize {
        self.dim
    }
    fn max_len(&self) -> usize {
        512
    }
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);
        texts
            .iter()
            .map(|t| self.table.get(t).cloned().ok_or_else(|| anyhow::anyhow!("backend unavailable for '{t}'")))
            .collect()
    }
}

fn entry(id: &str) -> CorpusEntry {
    CorpusEntry::new(id, id)
}

fn ids(index: &VectorIndex, q: &[f32], k: usize) -> Vec<String> {
    index.search(q, k).into_iter().map(|c| c.id).collect()
}

#[test]
fn search_ranks_by_inner_product_with_stable_ties() {
    let embedder = Arc::new(TableEmbedder::new(
        2,
        &[
            ("low", vec![0.0, 1.0]),
            ("tie1", vec![0.6, 0.8]),
            ("best", vec![1.0, 0.0]),
            ("tie2", vec![0.6, 0.8]),
        ],
    ));
    let index = VectorIndex::build(embedder, vec![entry("low"), entry("tie1"), entry("best"), entry("tie2")]).unwrap();

    let hits = index.search(&[1.0, 0.0], 3);
    assert_eq!(hits.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["best", "tie1", "tie2"]);
    assert!((hits[0].bi_score - 1.0).abs() < 1e-6);
    assert_eq!(hits[1].position, 1);
    assert_eq!(hits[2].position, 3);
}

#[test]
fn search_returns_fewer_than_k_and_handles_degenerate_queries() {
    let embedder = Arc::new(TableEmbedder::new(2, &[("a", vec![1.0, 0.0]), ("b", vec![0.0, 1.0])]));
    let index = VectorIndex::build(embedder, vec![entry("a"), entry("b")]).unwrap();

    assert_eq!(index.search(&[1.0, 0.0], 10).len(), 2);
    assert!(index.search(&[1.0, 0.0], 0).is_empty());
    assert!(index.search(&[1.0, 0.0, 0.0], 2).is_empty(), "dimension mismatch yields no hits");
}

#[test]
fn empty_corpus_searches_to_nothing() {
    let index = VectorIndex::build(Arc::new(HashEmbedder::new(16)), vec![]).unwrap();
    assert!(index.is_empty());
    assert!(index.search(&[0.0; 16], 5).is_empty());
}

#[test]
fn build_reports_backend_failure() {
    let embedder = Arc::new(TableEmbedder::new(2, &[]));
    let err = VectorIndex::build(embedder, vec![entry("unknown")]).err().expect("must fail");
    assert!(matches!(err, Error::IndexBuild(_)), "{err}");
}

#[test]
fn build_keeps_first_of_duplicate_ids() {
    let index = VectorIndex::build(
        Arc::new(HashEmbedder::new(32)),
        vec![CorpusEntry::new("A", "first"), CorpusEntry::new("A", "second")],
    )
    .unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index.entry("A").unwrap().text, "first");
}

#[test]
fn add_appends_and_rejects_duplicates() {
    let embedder = Arc::new(TableEmbedder::new(2, &[("a", vec![0.0, 1.0]), ("b", vec![1.0, 0.0])]));
    let index = VectorIndex::build(embedder, vec![entry("a")]).unwrap();

    index.add(entry("b")).unwrap();
    assert_eq!(index.len(), 2);
    assert_eq!(ids(&index, &[1.0, 0.0], 1), vec!["b"]);

    let err = index.add(entry("a")).unwrap_err();
    assert!(matches!(err, Error::IndexBuild(_)));
    assert_eq!(index.len(), 2);

    assert!(matches!(index.add(entry("missing")), Err(Error::IndexBuild(_))));
    assert_eq!(index.len(), 2, "failed add leaves the index unchanged");
}

#[test]
fn reload_reuses_cached_embeddings() {
    let embedder = Arc::new(TableEmbedder::new(2, &[("a", vec![1.0, 0.0]), ("b", vec![0.0, 1.0])]));
    let index = VectorIndex::build(embedder.clone(), vec![entry("a"), entry("b")]).unwrap();
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

    index.reload(vec![entry("b"), entry("a")]).unwrap();
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2, "unchanged passages are not re-embedded");
    assert_eq!(index.cache().len(), 2);
    assert_eq!(ids(&index, &[0.0, 1.0], 2), vec!["b", "a"]);
}

#[test]
fn reload_evicts_passages_that_left_the_corpus() {
    let embedder = Arc::new(TableEmbedder::new(
        2,
        &[("a", vec![1.0, 0.0]), ("b", vec![0.0, 1.0]), ("c", vec![0.6, 0.8])],
    ));
    let index = VectorIndex::build(embedder.clone(), vec![entry("a"), entry("b")]).unwrap();
    index.reload(vec![entry("b"), entry("c")]).unwrap();
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 3, "only the new passage is embedded");
    assert_eq!(index.cache().len(), 2, "the dropped passage is evicted");

    index.reload(vec![entry("a")]).unwrap();
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 4, "an evicted passage is embedded again");
    assert_eq!(index.cache().len(), 1);
}

#[test]
fn repeated_passages_in_one_build_are_embedded_once() {
    let embedder = Arc::new(TableEmbedder::new(2, &[("a", vec![1.0, 0.0])]));
    let corpus = vec![CorpusEntry::new("x", "a"), CorpusEntry::new("y", "a"), CorpusEntry::new("z", "a")];
    let index = VectorIndex::build(embedder.clone(), corpus).unwrap();
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(index.len(), 3);
    assert_eq!(ids(&index, &[1.0, 0.0], 3), vec!["x", "y", "z"]);
}

#[test]
fn concurrent_search_sees_whole_snapshots() {
    let base: Vec<CorpusEntry> = (0..50).map(|i| CorpusEntry::new(format!("e{i}"), format!("term{i} shared"))).collect();
    let index = Arc::new(VectorIndex::build(Arc::new(HashEmbedder::new(64)), base).unwrap());
    let query = index.embed_query("shared").unwrap();
    let barrier = Barrier::new(5);

    std::thread::scope(|s| {
        s.spawn(|| {
            barrier.wait();
            for i in 50..80 {
                index.add(CorpusEntry::new(format!("e{i}"), format!("term{i} shared"))).unwrap();
            }
        });
        for _ in 0..4 {
            s.spawn(|| {
                barrier.wait();
                let mut last = 0;
                for _ in 0..100 {
                    let hits = index.search(&query, 1000);
                    assert!(hits.len() >= last, "index never shrinks");
                    assert!((50..=80).contains(&hits.len()));
                    let unique: HashSet<_> = hits.iter().map(|c| c.id.clone()).collect();
                    assert_eq!(unique.len(), hits.len());
                    last = hits.len();
                }
            });
        }
    });
    assert_eq!(index.len(), 80);
}

proptest! {
    #[test]
    fn search_is_sorted_bounded_and_unique(
        texts in proptest::collection::vec("[a-e]{1,3}( [a-e]{1,3}){0,3}", 0..20),
        query in "[a-e]{1,3}( [a-e]{1,3}){0,2}",
        k in 0usize..8,
    ) {
        let entries: Vec<CorpusEntry> = texts.iter().enumerate().map(|(i, t)| CorpusEntry::new(format!("id{i}"), t.clone())).collect();
        let index = VectorIndex::build(Arc::new(HashEmbedder::new(32)), entries).unwrap();
        let q = index.embed_query(&query).unwrap();
        let hits = index.search(&q, k);
        prop_assert!(hits.len() <= k);
        prop_assert_eq!(hits.len(), k.min(texts.len()));
        for pair in hits.windows(2) {
            prop_assert!(pair[0].bi_score >= pair[1].bi_score);
            if pair[0].bi_score == pair[1].bi_score {
                prop_assert!(pair[0].position < pair[1].position);
            }
        }
        let unique: HashSet<_> = hits.iter().map(|c| &c.id).collect();
        prop_assert_eq!(unique.len(), hits.len());
    }
}
