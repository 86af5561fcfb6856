//! Embedding and re-ranking backends.
//!
//! Real models run on candle (BGE-M3 bi-encoder, bge-reranker cross-encoder).
//! `APP_USE_FAKE_EMBEDDINGS=1` swaps in the deterministic [`HashEmbedder`] and
//! [`LexicalReranker`], which need no model files.
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use triage_core::config::{expand_path, ModelSettings};
use triage_core::traits::{Embedder, Reranker};

mod bge;
mod cross_encoder;
mod device;
mod hashing;
mod lexical;
mod pool;
mod tokenize;
mod weights;

pub use bge::BgeM3Embedder;
pub use cross_encoder::CrossEncoder;
pub use device::select_device;
pub use hashing::HashEmbedder;
pub use lexical::{terms, LexicalReranker};
pub use pool::{l2_normalize, masked_mean_l2};
pub use tokenize::{tokenize_batch, tokenize_pairs, Batch};

pub fn use_fake_models() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn get_default_embedder(settings: &ModelSettings) -> Result<Arc<dyn Embedder>> {
    if use_fake_models() {
        info!("using hashing embedder");
        return Ok(Arc::new(HashEmbedder::default()));
    }
    let dir = resolve_model_dir(&settings.model_dir, &["APP_MODEL_DIR", "MODEL_DIR"])?;
    Ok(Arc::new(BgeM3Embedder::load(&dir, settings.max_len)?))
}

/// Cross-encoder when available, otherwise the lexical reranker.
pub fn get_default_reranker(settings: &ModelSettings) -> Arc<dyn Reranker> {
    if use_fake_models() {
        info!("using lexical reranker");
        return Arc::new(LexicalReranker::new());
    }
    let loaded = resolve_model_dir(&settings.model_dir, &["APP_RERANKER_DIR"])
        .and_then(|dir| CrossEncoder::load(&dir, settings.max_len));
    match loaded {
        Ok(model) => Arc::new(model),
        Err(e) => {
            warn!(error = %e, "cross-encoder unavailable, falling back to lexical reranker");
            Arc::new(LexicalReranker::new())
        }
    }
}

/// Environment overrides first, then the configured directory.
pub fn resolve_model_dir(configured: &str, env_keys: &[&str]) -> Result<PathBuf> {
    for key in env_keys {
        if let Ok(dir) = std::env::var(key) {
            let p = expand_path(&dir);
            if p.exists() {
                info!(source = *key, dir = %p.display(), "using model dir");
                return Ok(p);
            }
            warn!(source = *key, dir = %p.display(), "model dir from environment does not exist");
        }
    }
    let p = expand_path(configured);
    if p.exists() {
        return Ok(p);
    }
    let parent = Path::new("..").join(&p);
    if p.is_relative() && parent.exists() {
        return Ok(parent);
    }
    Err(anyhow!("Could not locate model directory '{}'", configured))
}
