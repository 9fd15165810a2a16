//! Embedding and agreement analysis of finished responses

mod embeddings;
mod similarity;

pub use embeddings::*;
pub use similarity::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Embedding vector of one response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub response_id: String,
    pub vector: Vec<f32>,
}

/// Everything the agreement view needs, in one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementReport {
    pub provider: Option<String>,
    /// Ids of responses that have an embedding, in matrix order
    pub embedded: Vec<String>,
    pub matrix: Option<SimilarityMatrix>,
    pub stats: Option<AgreementStats>,
    pub comparisons: Vec<PairwiseComparison>,
    /// Response id to embedding error
    pub failures: HashMap<String, String>,
}
