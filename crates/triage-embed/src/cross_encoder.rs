use anyhow::{anyhow, Result};
use std::path::Path;

use candle_core::{Device, D};
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaForSequenceClassification};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use triage_core::traits::Reranker;

use crate::device::select_device;
use crate::tokenize::tokenize_pairs;
use crate::weights::{load_config, load_tokenizer, load_var_builder};

/// XLM-RoBERTa sequence classifier with a single relevance logit per
/// `(query, passage)` pair (bge-reranker family).
pub struct CrossEncoder {
    model: XLMRobertaForSequenceClassification,
    tokenizer: Tokenizer,
    device: Device,
    max_len: usize,
}

impl CrossEncoder {
    pub fn load(model_dir: &Path, max_len: usize) -> Result<Self> {
        let device = select_device();
        let tokenizer = load_tokenizer(model_dir)?;
        let config: XLMRobertaConfig = load_config(model_dir)?;
        let vb = load_var_builder(model_dir, &device)?;
        let model = XLMRobertaForSequenceClassification::new(1, &config, vb)?;
        info!(model_dir = %model_dir.display(), max_len, "loaded cross-encoder reranker");
        Ok(Self { model, tokenizer, device, max_len })
    }
}

impl Reranker for CrossEncoder {
    fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        if candidates.is_empty() {
            return Ok(vec![]);
        }
        let batch = tokenize_pairs(&self.tokenizer, query, candidates, self.max_len, &self.device)?;
        let logits = self
            .model
            .forward(&batch.input_ids, &batch.attention_mask, &batch.token_type_ids)?;
        let scores = logits
            .squeeze(D::Minus1)?
            .to_device(&Device::Cpu)?
            .to_vec1::<f32>()
            .map_err(|e| anyhow!("reading reranker logits: {}", e))?;
        debug!(candidates = candidates.len(), "cross-encoder scored");
        Ok(scores)
    }
}
