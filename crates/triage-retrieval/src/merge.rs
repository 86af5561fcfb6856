use std::collections::HashSet;

use triage_core::types::{HitSource, RetrievalHit, SourcedHit};

/// Merge image-seeded and symptom-seeded hits, unique by id. Image hits come
/// first in their original order, then symptom hits not already present.
pub fn merge_by_id(image: Vec<RetrievalHit>, symptom: Vec<RetrievalHit>) -> Vec<SourcedHit> {
    let mut seen = HashSet::new();
    let tagged = image
        .into_iter()
        .map(|hit| (hit, HitSource::Image))
        .chain(symptom.into_iter().map(|hit| (hit, HitSource::Symptom)));
    tagged
        .filter(|(hit, _)| seen.insert(hit.id.clone()))
        .map(|(hit, source)| SourcedHit { hit, source })
        .collect()
}
