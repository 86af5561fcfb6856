//! Knowledge-base corpus loading.
//!
//! The source format is a JSON array of `{"id": ..., "data": ...}` records.
//! Records that are missing a field are skipped with a warning; the rest of
//! the file still loads.
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::Error;
use crate::types::CorpusEntry;

/// Dermatology classes produced by the image classifier, in model output order.
pub const SKIN_CONDITION_CLASSES: [&str; 23] = [
    "acne",
    "actinic keratosis basal cell carcinoma and other malignant lesions",
    "atopic dermatitis photos",
    "bullous disease photos",
    "cellulitis impetigo and other bacterial infections",
    "eczema photos",
    "exanthems and drug eruptions",
    "hair loss photos alopecia and other hair diseases",
    "herpes hpv and other stds photos",
    "light diseases and disorders of pigmentation",
    "lupus and other connective tissue diseases",
    "melanoma skin cancer nevi and moles",
    "nail fungus and other nail disease",
    "poison ivy photos and other contact dermatitis",
    "psoriasis pictures lichen planus and related diseases",
    "scabies lyme disease and other infestations and bites",
    "seborrheic keratoses and other benign tumors",
    "systemic disease",
    "tinea ringworm candidiasis and other fungal infections",
    "urticaria hives",
    "vascular tumors",
    "vasculitis photos",
    "warts mollusca and other viral infections",
];

pub fn is_known_class(label: &str) -> bool {
    SKIN_CONDITION_CLASSES.iter().any(|c| c.eq_ignore_ascii_case(label.trim()))
}

/// Parse a JSON corpus document into entries. Each array element is validated
/// on its own: malformed records are skipped and repeated ids keep their first
/// occurrence. Only a document that is not a JSON array is an error.
pub fn parse_corpus(json: &str) -> Result<Vec<CorpusEntry>> {
    let records: Vec<Value> = serde_json::from_str(json).context("corpus is not a JSON array")?;
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(records.len());
    for (position, record) in records.iter().enumerate() {
        match validate_record(position, record) {
            Ok((id, data)) => {
                if !seen.insert(id.clone()) {
                    warn!(%id, position, "duplicate corpus id, keeping first occurrence");
                    continue;
                }
                entries.push(CorpusEntry::from_record(&id, data));
            }
            Err(e) => warn!(position, error = %e, "skipping corpus record"),
        }
    }
    Ok(entries)
}

fn validate_record(position: usize, record: &Value) -> std::result::Result<(String, &str), Error> {
    let Value::Object(fields) = record else {
        return Err(Error::malformed("corpus", format!("record {position} is not an object")));
    };
    let id = match fields.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(Error::malformed("corpus", format!("record {position} has no usable id"))),
    };
    let data = match fields.get("data") {
        Some(Value::String(d)) if !d.trim().is_empty() => d.as_str(),
        _ => return Err(Error::malformed("corpus", format!("record '{id}' has no text data"))),
    };
    Ok((id, data))
}

pub fn load_corpus(path: &Path) -> Result<Vec<CorpusEntry>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading corpus {}", path.display()))?;
    let entries = parse_corpus(&raw).with_context(|| format!("parsing corpus {}", path.display()))?;
    info!(path = %path.display(), entries = entries.len(), "loaded corpus");
    Ok(entries)
}

/// Load every `*.json` file under `root` in sorted path order. Ids repeated
/// across files keep their first occurrence.
pub fn load_corpus_dir(root: &Path) -> Result<Vec<CorpusEntry>> {
    let files = list_json_files(root);
    if files.is_empty() {
        warn!(root = %root.display(), "no corpus files found");
        return Ok(vec![]);
    }
    let mut seen = HashSet::new();
    let mut all = Vec::new();
    for file in &files {
        for entry in load_corpus(file)? {
            if seen.insert(entry.id.clone()) {
                all.push(entry);
            } else {
                warn!(id = %entry.id, file = %file.display(), "duplicate corpus id across files");
            }
        }
    }
    Ok(all)
}

fn list_json_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    files.sort();
    files
}

/// Small built-in corpus used when the configured one cannot be loaded or embedded.
pub fn default_corpus() -> Vec<CorpusEntry> {
    vec![
        CorpusEntry::from_record(
            "Pneumonia",
            "Pneumonia is an infection that inflames the air sacs in one or both lungs. \
             Common symptoms include cough, fever, difficulty breathing, and chest pain. \
             Treatment typically involves antibiotics, rest, and plenty of fluids.",
        ),
        CorpusEntry::from_record(
            "Bronchitis",
            "Bronchitis is an inflammation of the lining of the bronchial tubes. \
             Symptoms include persistent cough, mucus production, and fatigue. \
             Treatment may include rest, hydration, and sometimes bronchodilators.",
        ),
    ]
}
