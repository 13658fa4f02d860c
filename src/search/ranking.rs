//! Query vector algebra and top-k ranking

use ndarray::{Array1, ArrayView1};

/// One ranked result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub filepath: String,
    pub score: f32,
}

/// Sum of `multiplier * vector` over one class of terms
///
/// No terms yield the zero vector.
pub fn weighted_sum(dimension: usize, weighted: &[(f32, Vec<f32>)]) -> Array1<f32> {
    let mut sum = Array1::<f32>::zeros(dimension);
    for (multiplier, vector) in weighted {
        sum.scaled_add(*multiplier, &ArrayView1::from(vector.as_slice()));
    }
    sum
}

/// `positive - negative`, not renormalized
pub fn combine(positive: &Array1<f32>, negative: &Array1<f32>) -> Array1<f32> {
    positive - negative
}

/// Score candidates against `query` and keep the best `top_k`
///
/// Candidates arrive in storage order; the stable sort keeps that order among
/// equal scores.
pub struct Ranker<'q> {
    query: ArrayView1<'q, f32>,
    results: Vec<SearchResult>,
}

impl<'q> Ranker<'q> {
    pub fn new(query: &'q Array1<f32>) -> Self {
        Self {
            query: query.view(),
            results: Vec::new(),
        }
    }

    /// Score one stored vector; vectors of another dimension are ignored
    pub fn push(&mut self, filepath: &str, vector: &[f32]) {
        if vector.len() != self.query.len() {
            tracing::warn!(
                "Skipping {}: stored vector has {} dimensions, query has {}",
                filepath,
                vector.len(),
                self.query.len()
            );
            return;
        }
        let score = self.query.dot(&ArrayView1::from(vector));
        self.results.push(SearchResult {
            filepath: filepath.to_string(),
            score,
        });
    }

    pub fn finish(mut self, top_k: usize) -> Vec<SearchResult> {
        self.results.sort_by(|a, b| b.score.total_cmp(&a.score));
        self.results.truncate(top_k);
        self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_weighted_sum_and_combine() {
        let night = vec![1.0, 0.0, 0.0];
        let fence = vec![0.0, 1.0, 0.0];
        let cat = vec![0.0, 0.0, 1.0];

        let positive = weighted_sum(3, &[(2.0, night), (1.0, cat)]);
        let negative = weighted_sum(3, &[(0.5, fence)]);
        assert_eq!(combine(&positive, &negative), array![2.0, -0.5, 1.0]);
    }

    #[test]
    fn test_empty_class_is_zero() {
        assert_eq!(weighted_sum(4, &[]), Array1::<f32>::zeros(4));
    }

    #[test]
    fn test_ranking_descends_and_truncates() {
        let query = array![1.0f32, 0.0];
        let mut ranker = Ranker::new(&query);
        ranker.push("/a", &[0.2, 0.9]);
        ranker.push("/b", &[0.9, 0.1]);
        ranker.push("/c", &[0.5, 0.5]);

        let results = ranker.finish(2);
        let paths: Vec<_> = results.iter().map(|r| r.filepath.as_str()).collect();
        assert_eq!(paths, vec!["/b", "/c"]);
        assert!((results[0].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_ties_keep_storage_order() {
        let query = array![1.0f32, 0.0];
        let mut ranker = Ranker::new(&query);
        for path in ["/1", "/2", "/3"] {
            ranker.push(path, &[0.5, 0.0]);
        }
        let paths: Vec<_> = ranker
            .finish(10)
            .into_iter()
            .map(|r| r.filepath)
            .collect();
        assert_eq!(paths, vec!["/1", "/2", "/3"]);
    }

    #[test]
    fn test_wrong_dimension_skipped() {
        let query = array![1.0f32, 0.0];
        let mut ranker = Ranker::new(&query);
        ranker.push("/bad", &[1.0, 0.0, 0.0]);
        assert!(ranker.finish(10).is_empty());
    }
}
