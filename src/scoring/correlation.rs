//! Factor correlation matrices

use serde::{Deserialize, Serialize};

use super::stats::{self, aligned_pairs, Series};

/// Pair of factors whose absolute correlation exceeds a threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedundantPair {
    pub first: String,
    pub second: String,
    pub correlation: f64,
}

/// Symmetric rank-correlation matrix keyed by factor id.
///
/// The diagonal is 1, or NaN for a constant series. Pairs that cannot be
/// measured (too little overlap, no variance) are NaN.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    ids: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    /// Build from position-aligned value series, keeping input order
    pub fn from_values(series: &[(String, Vec<f64>)], min_samples: usize) -> Self {
        Self::build(series, min_samples, |a, b| aligned_pairs(a, b))
    }

    /// Build from timestamp-indexed series, aligning each pair on shared timestamps
    pub fn from_series(series: &[(String, Series)], min_samples: usize) -> Self {
        Self::build(series, min_samples, |a, b| a.align(b))
    }

    fn build<T>(
        series: &[(String, T)],
        min_samples: usize,
        align: impl Fn(&T, &T) -> (Vec<f64>, Vec<f64>),
    ) -> Self {
        let n = series.len();
        let mut values = vec![vec![f64::NAN; n]; n];

        for i in 0..n {
            let (own, _) = align(&series[i].1, &series[i].1);
            values[i][i] = if stats::std_dev(&own) > f64::EPSILON {
                1.0
            } else {
                f64::NAN
            };

            for j in (i + 1)..n {
                let (a, b) = align(&series[i].1, &series[j].1);
                let corr = if a.len() >= min_samples.max(2) {
                    stats::spearman(&a, &b).unwrap_or(f64::NAN)
                } else {
                    f64::NAN
                };
                values[i][j] = corr;
                values[j][i] = corr;
            }
        }

        Self {
            ids: series.iter().map(|(id, _)| id.clone()).collect(),
            values,
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|x| x == id)
    }

    /// Correlation between two factors; `None` if either is unknown
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        Some(self.values[self.position(a)?][self.position(b)?])
    }

    pub fn at(&self, i: usize, j: usize) -> f64 {
        self.values[i][j]
    }

    /// All pairs with |corr| strictly above `threshold`
    pub fn redundant_pairs(&self, threshold: f64) -> Vec<RedundantPair> {
        let mut pairs = Vec::new();
        for i in 0..self.len() {
            for j in (i + 1)..self.len() {
                let c = self.values[i][j];
                if c.is_finite() && c.abs() > threshold {
                    pairs.push(RedundantPair {
                        first: self.ids[i].clone(),
                        second: self.ids[j].clone(),
                        correlation: c,
                    });
                }
            }
        }
        pairs
    }
}
