use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor};
use tokenizers::{Encoding, Tokenizer};

/// XLM-RoBERTa `<pad>` id.
const PAD_ID: u32 = 1;

/// Batched tensors ready for an XLM-RoBERTa forward pass, all `[B, max_len]`.
pub struct Batch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub token_type_ids: Tensor,
}

pub fn tokenize_batch(tokenizer: &Tokenizer, texts: &[String], max_len: usize, device: &Device) -> Result<Batch> {
    let encodings = texts
        .iter()
        .map(|t| tokenizer.encode(t.as_str(), true))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    to_batch(&encodings, max_len, device)
}

/// Tokenize `(query, passage)` pairs for a cross-encoder.
pub fn tokenize_pairs(
    tokenizer: &Tokenizer,
    query: &str,
    passages: &[String],
    max_len: usize,
    device: &Device,
) -> Result<Batch> {
    let encodings = passages
        .iter()
        .map(|p| tokenizer.encode((query, p.as_str()), true))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("Pair tokenization failed: {}", e))?;
    to_batch(&encodings, max_len, device)
}

fn to_batch(encodings: &[Encoding], max_len: usize, device: &Device) -> Result<Batch> {
    let batch = encodings.len();
    let mut ids = Vec::with_capacity(batch * max_len);
    let mut mask = Vec::with_capacity(batch * max_len);
    for enc in encodings {
        let (row_ids, row_mask) = pad_or_truncate(enc.get_ids(), enc.get_attention_mask(), max_len);
        ids.extend(row_ids);
        mask.extend(row_mask);
    }
    Ok(Batch {
        input_ids: Tensor::from_vec(ids, (batch, max_len), device)?,
        attention_mask: Tensor::from_vec(mask, (batch, max_len), device)?,
        token_type_ids: Tensor::zeros((batch, max_len), DType::I64, device)?,
    })
}

pub(crate) fn pad_or_truncate(ids: &[u32], mask: &[u32], max_len: usize) -> (Vec<u32>, Vec<u32>) {
    let mut ids = ids.to_vec();
    let mut mask = mask.to_vec();
    ids.truncate(max_len);
    mask.truncate(max_len);
    ids.resize(max_len, PAD_ID);
    mask.resize(max_len, 0);
    (ids, mask)
}
