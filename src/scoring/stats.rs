//! Descriptive statistics and correlation primitives

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Arithmetic mean, NaN for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1), 0 for fewer than two values
pub fn std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Finite values only
pub fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

/// Zip two position-aligned series, dropping pairs with a non-finite member
pub fn aligned_pairs(x: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y.iter())
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(a, b)| (*a, *b))
        .unzip()
}

/// 1-based ranks, ties share their average rank
pub fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut out = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            out[order[k]] = avg;
        }
        i = j + 1;
    }
    out
}

/// Percentile rank of each value in [0, 1]; a lone value sits at 0.5
pub fn percentile_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n == 1 {
        return vec![0.5];
    }
    ranks(values)
        .into_iter()
        .map(|r| (r - 1.0) / (n - 1) as f64)
        .collect()
}

/// Pearson correlation; `None` when either side has no variance
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let (x, y) = (&x[..n], &y[..n]);
    let mx = mean(x);
    let my = mean(y);

    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for i in 0..n {
        let dx = x[i] - mx;
        let dy = y[i] - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    if vx <= f64::EPSILON || vy <= f64::EPSILON {
        return None;
    }
    Some((cov / (vx.sqrt() * vy.sqrt())).clamp(-1.0, 1.0))
}

/// Spearman rank correlation
pub fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    pearson(&ranks(&x[..n]), &ranks(&y[..n]))
}

/// Timestamp-indexed series
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Series {
    pub index: Vec<DateTime<Utc>>,
    pub values: Vec<f64>,
}

impl Series {
    pub fn new(index: Vec<DateTime<Utc>>, values: Vec<f64>) -> Self {
        Self { index, values }
    }

    pub fn len(&self) -> usize {
        self.index.len().min(self.values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Intersect on timestamps, then drop pairs with a non-finite member
    pub fn align(&self, other: &Series) -> (Vec<f64>, Vec<f64>) {
        let lookup: HashMap<&DateTime<Utc>, f64> = other
            .index
            .iter()
            .zip(other.values.iter().copied())
            .collect();

        self.index
            .iter()
            .zip(self.values.iter().copied())
            .filter_map(|(ts, a)| lookup.get(ts).map(|b| (a, *b)))
            .filter(|(a, b)| a.is_finite() && b.is_finite())
            .unzip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_ranks_with_ties() {
        assert_eq!(ranks(&[10.0, 20.0, 20.0, 5.0]), vec![2.0, 3.5, 3.5, 1.0]);
    }

    #[test]
    fn test_percentile_ranks_span_unit_interval() {
        let p = percentile_ranks(&[3.0, 1.0, 2.0]);
        assert_eq!(p, vec![1.0, 0.0, 0.5]);
        assert_eq!(percentile_ranks(&[7.0]), vec![0.5]);
    }

    #[test]
    fn test_pearson_and_spearman() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 4.0, 6.0, 8.0, 10.0];
        assert!((pearson(&x, &y).unwrap() - 1.0).abs() < 1e-12);

        // monotone but non-linear: spearman is exactly 1
        let z = [1.0, 8.0, 27.0, 64.0, 125.0];
        assert!((spearman(&x, &z).unwrap() - 1.0).abs() < 1e-12);
        assert!(pearson(&x, &z).unwrap() < 1.0);

        assert!(pearson(&x, &[3.0; 5]).is_none());
    }

    #[test]
    fn test_aligned_pairs_drops_nan() {
        let (a, b) = aligned_pairs(&[1.0, f64::NAN, 3.0], &[1.0, 2.0, f64::INFINITY]);
        assert_eq!(a, vec![1.0]);
        assert_eq!(b, vec![1.0]);
    }

    #[test]
    fn test_series_align_intersects_index() {
        let t0 = Utc::now();
        let ts = |i: i64| t0 + Duration::days(i);
        let a = Series::new(vec![ts(0), ts(1), ts(2)], vec![1.0, 2.0, 3.0]);
        let b = Series::new(vec![ts(1), ts(2), ts(3)], vec![20.0, f64::NAN, 40.0]);
        let (x, y) = a.align(&b);
        assert_eq!(x, vec![2.0]);
        assert_eq!(y, vec![20.0]);
    }

    #[test]
    fn test_std_and_median() {
        assert_eq!(std_dev(&[1.0]), 0.0);
        assert!((std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.138089935).abs() < 1e-6);
        assert_eq!(median(&[3.0, 1.0, 2.0, 4.0]), 2.5);
    }
}
