//! Scoring Engine - statistical metrics for factors and strategies
//!
//! Pure functions live in the submodules; [`ScoringEngine`] binds them to a
//! [`ScoringConfig`] so callers don't thread sample minimums and annualisation
//! through every call.

pub mod correlation;
pub mod health;
pub mod metrics;
pub mod stats;

pub use correlation::{CorrelationMatrix, RedundantPair};
pub use health::{
    detect_degradation, health_score, ic_decay_rate, DecaySeverity, DegradationReport,
    HealthInputs, RemediationAction,
};
pub use metrics::IcMethod;
pub use stats::Series;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ScoringConfig;
use crate::error::Result;

/// Health snapshot of one factor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorHealth {
    pub ic: f64,
    pub ir: f64,
    pub sharpe: f64,
    pub turnover: f64,
    pub health_score: f64,
    pub ic_decay_rate: f64,
    pub degradation: DegradationReport,
}

/// Config-bound facade over the scoring functions
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn ic(&self, factor: &[f64], returns: &[f64]) -> Result<f64> {
        metrics::information_coefficient(factor, returns, self.config.ic_method, self.config.min_samples)
    }

    pub fn rolling_ic(&self, factor: &[f64], returns: &[f64]) -> Vec<f64> {
        metrics::rolling_ic(factor, returns, self.config.rolling_window, self.config.ic_method)
    }

    /// IR of the rolling IC series
    pub fn ir(&self, factor: &[f64], returns: &[f64]) -> f64 {
        metrics::information_ratio(&self.rolling_ic(factor, returns))
    }

    pub fn sharpe(&self, returns: &[f64]) -> Result<f64> {
        metrics::sharpe_ratio(
            returns,
            self.config.periods_per_year,
            self.config.risk_free_rate,
            self.config.min_samples,
        )
    }

    pub fn sortino(&self, returns: &[f64]) -> Result<f64> {
        metrics::sortino_ratio(
            returns,
            self.config.periods_per_year,
            self.config.risk_free_rate,
            self.config.min_samples,
        )
    }

    pub fn max_drawdown(&self, returns: &[f64]) -> Result<f64> {
        metrics::max_drawdown(returns)
    }

    pub fn win_rate(&self, returns: &[f64]) -> Result<f64> {
        metrics::win_rate(returns)
    }

    pub fn turnover(&self, values: &[f64]) -> Result<f64> {
        metrics::turnover(values, self.config.min_samples)
    }

    /// Full health check of a factor against forward returns.
    ///
    /// The factor trades a z-score position for the Sharpe component; a
    /// degenerate Sharpe or turnover counts as zero health contribution.
    pub fn factor_health(&self, factor: &[f64], returns: &[f64]) -> Result<FactorHealth> {
        let ic = self.ic(factor, returns)?;
        let ics = self.rolling_ic(factor, returns);
        let ir = metrics::information_ratio(&ics);

        let direction = if ic < 0.0 { -1.0 } else { 1.0 };
        let positions: Vec<f64> = metrics::zscore_positions(factor, self.config.rolling_window)
            .into_iter()
            .map(|p| p * direction)
            .collect();
        let pnl = metrics::strategy_returns(&positions, returns);
        let sharpe = self.sharpe(&pnl).unwrap_or(0.0);
        let turnover = self.turnover(factor).unwrap_or(1.0);

        let health = health_score(&HealthInputs {
            ic,
            ir,
            sharpe,
            turnover,
        });
        let decay = ic_decay_rate(&ics);
        let degradation = detect_degradation(health, decay);

        debug!(
            "Factor health: ic={:.4} ir={:.2} sharpe={:.2} health={:.3} severity={:?}",
            ic, ir, sharpe, health, degradation.severity
        );

        Ok(FactorHealth {
            ic,
            ir,
            sharpe,
            turnover,
            health_score: health,
            ic_decay_rate: decay,
            degradation,
        })
    }

    /// Recompute the correlation matrix from factor id -> value series
    pub fn correlation_matrix(&self, series: &[(String, Vec<f64>)]) -> CorrelationMatrix {
        CorrelationMatrix::from_values(series, self.config.min_samples)
    }

    /// Redundant pairs at the configured threshold
    pub fn redundant_pairs(&self, matrix: &CorrelationMatrix) -> Vec<RedundantPair> {
        matrix.redundant_pairs(self.config.redundancy_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_health_predictive_factor() {
        let engine = ScoringEngine::default();
        let factor: Vec<f64> = (0..200).map(|i| ((i * 37) % 23) as f64 - 11.0).collect();
        let returns: Vec<f64> = factor.iter().map(|f| f * 0.001).collect();

        let h = engine.factor_health(&factor, &returns).unwrap();
        assert!((h.ic - 1.0).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&h.health_score));
        assert!((0.0..=1.0).contains(&h.ic_decay_rate));
    }

    #[test]
    fn test_factor_health_requires_samples() {
        let engine = ScoringEngine::default();
        assert!(engine.factor_health(&[1.0; 5], &[0.1; 5]).is_err());
    }
}
