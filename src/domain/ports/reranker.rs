//! Reranker client port.

use async_trait::async_trait;

use crate::domain::error::LlmError;

/// Port for dedicated rerank backends.
///
/// Returns `(input_index, score)` pairs sorted by descending relevance.
#[async_trait]
pub trait RerankClient: Send + Sync {
    async fn rerank(&self, query: &str, documents: &[String])
        -> Result<Vec<(usize, f32)>, LlmError>;
}
