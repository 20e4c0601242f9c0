//! Correlation/Redundancy Analyzer - prune a factor library down to
//! non-redundant members

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::config::CorrelationConfig;
use crate::scoring::CorrelationMatrix;

/// A factor's value series with its quality score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredSeries {
    pub id: String,
    pub score: f64,
    pub values: Vec<f64>,
}

impl ScoredSeries {
    pub fn new(id: &str, score: f64, values: Vec<f64>) -> Self {
        Self {
            id: id.to_string(),
            score,
            values,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CorrelationAnalyzer {
    config: CorrelationConfig,
}

impl CorrelationAnalyzer {
    pub fn new(config: CorrelationConfig) -> Self {
        Self { config }
    }

    pub fn matrix(&self, factors: &[ScoredSeries]) -> CorrelationMatrix {
        let series: Vec<(String, Vec<f64>)> = factors
            .iter()
            .map(|f| (f.id.clone(), f.values.clone()))
            .collect();
        CorrelationMatrix::from_values(&series, self.config.min_samples)
    }

    fn redundant(&self, corr: f64) -> bool {
        corr.is_finite() && corr.abs() > self.config.threshold
    }

    /// Ids left after dropping the lower scorer of every pair above the
    /// threshold (equal scores drop the later one), in input order
    pub fn filter_redundant(&self, factors: &[ScoredSeries]) -> Vec<String> {
        let matrix = self.matrix(factors);
        let mut dropped = HashSet::new();

        for i in 0..factors.len() {
            for j in (i + 1)..factors.len() {
                let corr = matrix.at(i, j);
                if !self.redundant(corr) {
                    continue;
                }
                let loser = if factors[j].score > factors[i].score { i } else { j };
                debug!(
                    "Redundant pair {} / {} (corr {:.3}), dropping {}",
                    factors[i].id, factors[j].id, corr, factors[loser].id
                );
                dropped.insert(loser);
            }
        }

        factors
            .iter()
            .enumerate()
            .filter(|(i, _)| !dropped.contains(i))
            .map(|(_, f)| f.id.clone())
            .collect()
    }

    /// Greedy pick by descending score, accepting a factor only when it is
    /// below the threshold against every accepted one; at most `max_n`
    pub fn select_diverse(&self, factors: &[ScoredSeries], max_n: usize) -> Vec<String> {
        let matrix = self.matrix(factors);
        let mut order: Vec<usize> = (0..factors.len()).collect();
        order.sort_by(|&a, &b| factors[b].score.total_cmp(&factors[a].score));

        let mut accepted: Vec<usize> = Vec::new();
        for i in order {
            if accepted.len() >= max_n {
                break;
            }
            if accepted.iter().all(|&k| !self.redundant(matrix.at(i, k))) {
                accepted.push(i);
            }
        }
        accepted.into_iter().map(|i| factors[i].id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(n: usize) -> Vec<f64> {
        (0..n).map(|i| ((i * 37) % 23) as f64).collect()
    }

    fn library() -> Vec<ScoredSeries> {
        let a = base(60);
        // same ranks as `a`
        let twin: Vec<f64> = a.iter().map(|v| v * 2.0 + 1.0).collect();
        let other: Vec<f64> = (0..60).map(|i| ((i * 11) % 7) as f64).collect();
        vec![
            ScoredSeries::new("a", 0.8, a),
            ScoredSeries::new("twin", 0.9, twin),
            ScoredSeries::new("other", 0.7, other),
        ]
    }

    #[test]
    fn test_filter_drops_lower_scorer() {
        let analyzer = CorrelationAnalyzer::default();
        assert_eq!(analyzer.filter_redundant(&library()), vec!["twin", "other"]);
    }

    #[test]
    fn test_filter_tie_keeps_first_seen() {
        let analyzer = CorrelationAnalyzer::default();
        let mut lib = library();
        lib[1].score = 0.8;
        assert_eq!(analyzer.filter_redundant(&lib), vec!["a", "other"]);
    }

    #[test]
    fn test_select_diverse_respects_limit() {
        let analyzer = CorrelationAnalyzer::default();
        assert_eq!(analyzer.select_diverse(&library(), 5), vec!["twin", "other"]);
        assert_eq!(analyzer.select_diverse(&library(), 1), vec!["twin"]);
        assert!(analyzer.select_diverse(&library(), 0).is_empty());
    }

    #[test]
    fn test_short_series_are_never_redundant() {
        let analyzer = CorrelationAnalyzer::default();
        let lib = vec![
            ScoredSeries::new("x", 0.5, vec![1.0, 2.0, 3.0]),
            ScoredSeries::new("y", 0.6, vec![1.0, 2.0, 3.0]),
        ];
        assert_eq!(analyzer.filter_redundant(&lib).len(), 2);
    }
}
