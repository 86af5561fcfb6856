use anyhow::{anyhow, ensure, Result};
use std::path::Path;
use std::time::Instant;

use candle_core::{Device, D};
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use triage_core::traits::Embedder;

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;
use crate::weights::{load_config, load_tokenizer, load_var_builder};

const BATCH_SIZE: usize = 16;

/// BGE-M3 dense encoder: masked mean pooling over the last hidden state, then L2.
pub struct BgeM3Embedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    max_len: usize,
    id: String,
}

impl BgeM3Embedder {
    pub fn load(model_dir: &Path, max_len: usize) -> Result<Self> {
        let started = Instant::now();
        let device = select_device();
        let tokenizer = load_tokenizer(model_dir)?;
        let config: XLMRobertaConfig = load_config(model_dir)?;
        let vb = load_var_builder(model_dir, &device)?;
        let model = XLMRobertaModel::new(&config, vb)?;
        let dim = config.hidden_size;
        info!(
            model_dir = %model_dir.display(),
            dim,
            max_len,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded BGE-M3 embedder"
        );
        Ok(Self { model, tokenizer, device, dim, max_len, id: format!("bge-m3:d{dim}") })
    }

    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let batch = tokenize_batch(&self.tokenizer, texts, self.max_len, &self.device)?;
        let hidden = self
            .model
            .forward(&batch.input_ids, &batch.attention_mask, &batch.token_type_ids, None, None, None)?;
        ensure!(hidden.dim(D::Minus1)? == self.dim, "unexpected hidden size {:?}", hidden.dims());
        let pooled = masked_mean_l2(&hidden, &batch.attention_mask)?;
        pooled
            .to_device(&Device::Cpu)?
            .to_vec2::<f32>()
            .map_err(|e| anyhow!("reading embeddings: {}", e))
    }
}

impl Embedder for BgeM3Embedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        self.max_len
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let started = Instant::now();
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            out.extend(self.embed_chunk(chunk)?);
        }
        debug!(texts = texts.len(), elapsed_ms = started.elapsed().as_millis() as u64, "embedded batch");
        Ok(out)
    }
}
