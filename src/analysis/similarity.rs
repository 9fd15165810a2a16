//! Pairwise cosine similarity and agreement statistics

use serde::{Deserialize, Serialize};

use super::Embedding;
use crate::error::{EnsembleError, Result};

/// Cosine similarity of two vectors; 0 when either has zero norm
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Square, symmetric similarity matrix with a unit diagonal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatrix {
    /// Response ids, in row/column order
    pub ids: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl SimilarityMatrix {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i][j]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|x| x == id)
    }

    /// Similarity between two responses by id
    pub fn between(&self, a: &str, b: &str) -> Option<f64> {
        Some(self.get(self.index_of(a)?, self.index_of(b)?))
    }

    /// Strict upper triangle, row by row
    pub fn upper_triangle(&self) -> Vec<f64> {
        let n = self.len();
        let mut values = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                values.push(self.values[i][j]);
            }
        }
        values
    }
}

/// Build the matrix for `embeddings`, in the given order.
///
/// Returns `None` for fewer than two embeddings.
pub fn similarity_matrix(embeddings: &[Embedding]) -> Result<Option<SimilarityMatrix>> {
    if embeddings.len() < 2 {
        return Ok(None);
    }

    let dims = embeddings[0].vector.len();
    if let Some(other) = embeddings.iter().find(|e| e.vector.len() != dims) {
        return Err(EnsembleError::DimensionMismatch {
            left: dims,
            right: other.vector.len(),
        });
    }

    let n = embeddings.len();
    let mut values = vec![vec![0.0; n]; n];
    for i in 0..n {
        values[i][i] = 1.0;
        for j in (i + 1)..n {
            let s = cosine_similarity(&embeddings[i].vector, &embeddings[j].vector);
            values[i][j] = s;
            values[j][i] = s;
        }
    }

    Ok(Some(SimilarityMatrix {
        ids: embeddings.iter().map(|e| e.response_id.clone()).collect(),
        values,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgreementStats {
    pub mean: f64,
    pub median: f64,
}

/// Mean and median of the off-diagonal, non-redundant similarities
pub fn agreement_stats(matrix: &SimilarityMatrix) -> Option<AgreementStats> {
    let mut values = matrix.upper_triangle();
    if values.is_empty() {
        return None;
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;

    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    let median = if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    };

    Some(AgreementStats { mean, median })
}

/// Qualitative band of a similarity value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgreementLevel {
    High,
    Medium,
    Low,
}

impl AgreementLevel {
    pub fn from_similarity(similarity: f64) -> Self {
        if similarity >= 0.8 {
            AgreementLevel::High
        } else if similarity >= 0.5 {
            AgreementLevel::Medium
        } else {
            AgreementLevel::Low
        }
    }
}

/// One unordered pair of responses, for presentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseComparison {
    pub model1: String,
    pub model2: String,
    pub similarity: f64,
    pub confidence: AgreementLevel,
}

/// Every unordered pair in matrix order, labelled through `label`
pub fn pairwise_comparisons<F>(matrix: &SimilarityMatrix, label: F) -> Vec<PairwiseComparison>
where
    F: Fn(&str) -> String,
{
    let n = matrix.len();
    let mut pairs = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            let similarity = matrix.get(i, j);
            pairs.push(PairwiseComparison {
                model1: label(&matrix.ids[i]),
                model2: label(&matrix.ids[j]),
                similarity,
                confidence: AgreementLevel::from_similarity(similarity),
            });
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn emb(id: &str, vector: Vec<f32>) -> Embedding {
        Embedding {
            response_id: id.to_string(),
            vector,
        }
    }

    #[test]
    fn test_cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-12);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-12);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-12);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_identical_embeddings_agree_fully() {
        let v = vec![0.3, -0.2, 0.9, 0.1];
        let embeddings: Vec<Embedding> = (0..4).map(|i| emb(&format!("r{i}"), v.clone())).collect();

        let matrix = similarity_matrix(&embeddings).unwrap().unwrap();
        for row in &matrix.values {
            for value in row {
                assert!((value - 1.0).abs() < 1e-9);
            }
        }

        let stats = agreement_stats(&matrix).unwrap();
        assert!((stats.mean - 1.0).abs() < 1e-9);
        assert!((stats.median - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_matrix_is_symmetric_with_unit_diagonal() {
        let embeddings = vec![
            emb("a", vec![1.0, 2.0, 3.0]),
            emb("b", vec![-1.0, 0.5, 2.0]),
            emb("c", vec![0.0, 0.0, 0.0]),
            emb("d", vec![4.0, -3.0, 0.2]),
        ];

        let matrix = similarity_matrix(&embeddings).unwrap().unwrap();
        for i in 0..matrix.len() {
            assert_eq!(matrix.get(i, i), 1.0);
            for j in 0..matrix.len() {
                assert_eq!(matrix.get(i, j), matrix.get(j, i));
            }
        }
        // zero vector compares as 0 against everything else
        assert_eq!(matrix.between("a", "c"), Some(0.0));
    }

    #[test]
    fn test_fewer_than_two_is_none() {
        assert!(similarity_matrix(&[]).unwrap().is_none());
        assert!(similarity_matrix(&[emb("a", vec![1.0])]).unwrap().is_none());
    }

    #[test]
    fn test_dimension_mismatch() {
        let embeddings = vec![emb("a", vec![1.0, 0.0]), emb("b", vec![1.0, 0.0, 0.0])];
        assert!(matches!(
            similarity_matrix(&embeddings),
            Err(EnsembleError::DimensionMismatch { left: 2, right: 3 })
        ));
    }

    #[test]
    fn test_stats_use_upper_triangle_only() {
        let matrix = SimilarityMatrix {
            ids: vec!["a".into(), "b".into(), "c".into()],
            values: vec![
                vec![1.0, 0.9, 0.2],
                vec![0.9, 1.0, 0.4],
                vec![0.2, 0.4, 1.0],
            ],
        };

        assert_eq!(matrix.upper_triangle(), vec![0.9, 0.2, 0.4]);
        let stats = agreement_stats(&matrix).unwrap();
        assert!((stats.mean - 0.5).abs() < 1e-12);
        assert!((stats.median - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_even_count_median() {
        let matrix = SimilarityMatrix {
            ids: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            values: vec![
                vec![1.0, 0.1, 0.2, 0.3],
                vec![0.1, 1.0, 0.4, 0.5],
                vec![0.2, 0.4, 1.0, 0.6],
                vec![0.3, 0.5, 0.6, 1.0],
            ],
        };
        let stats = agreement_stats(&matrix).unwrap();
        assert!((stats.median - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_pairwise_comparisons() {
        let matrix = SimilarityMatrix {
            ids: vec!["a".into(), "b".into(), "c".into()],
            values: vec![
                vec![1.0, 0.95, 0.3],
                vec![0.95, 1.0, 0.6],
                vec![0.3, 0.6, 1.0],
            ],
        };

        let pairs = pairwise_comparisons(&matrix, |id| id.to_uppercase());
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].model1, "A");
        assert_eq!(pairs[0].model2, "B");
        assert_eq!(pairs[0].confidence, AgreementLevel::High);
        assert_eq!(pairs[1].confidence, AgreementLevel::Low);
        assert_eq!(pairs[2].confidence, AgreementLevel::Medium);
    }
}
