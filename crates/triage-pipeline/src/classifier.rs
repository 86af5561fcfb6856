use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use triage_core::corpus::is_known_class;
use triage_core::traits::ImageClassifier;
use triage_core::types::ImagePrediction;

/// Serves classifier output computed offline, keyed by image reference:
/// `{"img-001.jpg": [{"class": "eczema photos", "confidence": 0.91}]}`.
#[derive(Debug, Default)]
pub struct PrecomputedClassifier {
    predictions: HashMap<String, Vec<ImagePrediction>>,
}

impl PrecomputedClassifier {
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: HashMap<String, Vec<ImagePrediction>> =
            serde_json::from_str(json).context("labels file must map image refs to prediction lists")?;
        let predictions = raw
            .into_iter()
            .map(|(image_ref, preds)| {
                let kept = preds
                    .into_iter()
                    .filter(|p| {
                        let ok = is_known_class(&p.label) && (0.0..=1.0).contains(&p.confidence);
                        if !ok {
                            warn!(%image_ref, label = %p.label, confidence = p.confidence, "dropping prediction outside taxonomy");
                        }
                        ok
                    })
                    .collect();
                (image_ref, kept)
            })
            .collect();
        Ok(Self { predictions })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let classifier = Self::from_json(&raw)?;
        info!(path = %path.display(), images = classifier.predictions.len(), "loaded precomputed predictions");
        Ok(classifier)
    }
}

impl ImageClassifier for PrecomputedClassifier {
    fn classify(&self, image_ref: &str) -> Vec<ImagePrediction> {
        let Some(preds) = self.predictions.get(image_ref) else {
            warn!(image_ref, "no prediction for image");
            return vec![];
        };
        let mut preds = preds.clone();
        preds.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        preds
    }
}
