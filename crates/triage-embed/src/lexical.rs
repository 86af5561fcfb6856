use std::collections::HashSet;

use triage_core::traits::Reranker;

/// Lowercased alphanumeric terms; everything else separates.
pub fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Scores a passage by the fraction of distinct query terms it contains.
///
/// Scores are already in `[0, 1]`, so `calibrate` only clamps.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalReranker;

impl LexicalReranker {
    pub fn new() -> Self {
        Self
    }

    fn overlap(query_terms: &HashSet<String>, passage: &str) -> f32 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let passage_terms: HashSet<String> = terms(passage).collect();
        let hits = query_terms.iter().filter(|t| passage_terms.contains(*t)).count();
        hits as f32 / query_terms.len() as f32
    }
}

impl Reranker for LexicalReranker {
    fn score(&self, query: &str, candidates: &[String]) -> anyhow::Result<Vec<f32>> {
        let query_terms: HashSet<String> = terms(query).collect();
        Ok(candidates.iter().map(|c| Self::overlap(&query_terms, c)).collect())
    }

    fn calibrate(&self, raw: f32) -> f32 {
        if raw.is_nan() {
            0.0
        } else {
            raw.clamp(0.0, 1.0)
        }
    }
}
