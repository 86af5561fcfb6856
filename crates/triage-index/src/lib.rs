//! In-memory flat inner-product index over L2-normalized embeddings.
pub mod cache;
pub mod flat;

pub use cache::{embed_cached, hash_content, CacheEntry, EmbeddingCache};
pub use flat::VectorIndex;
