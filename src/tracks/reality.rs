//! Reality Track - single backtest-style pass over ordinary history

use std::sync::Arc;
use tracing::debug;

use super::{saturate, TrackTester, NEUTRAL_SCORE};
use crate::config::RealityConfig;
use crate::evaluator::FactorEvaluator;
use crate::market::MarketSlice;
use crate::scoring::{metrics, stats, ScoringEngine};
use crate::types::{ArenaData, Candidate, CandidateKind, RealityResult, TrackKind, TrackResult};

/// Scores a candidate on the supplied history:
/// 0.25 |IC| + 0.20 |IR| + 0.20 Sharpe + 0.20 (1 - drawdown) + 0.15 win rate,
/// each normalised against its saturation constant.
pub struct RealityTester {
    scoring: ScoringEngine,
    config: RealityConfig,
    evaluator: Arc<dyn FactorEvaluator>,
}

impl RealityTester {
    pub fn new(
        scoring: ScoringEngine,
        config: RealityConfig,
        evaluator: Arc<dyn FactorEvaluator>,
    ) -> Self {
        Self {
            scoring,
            config,
            evaluator,
        }
    }

    /// Run the reality formula on one market slice
    pub fn evaluate_slice(&self, candidate: &Candidate, slice: &MarketSlice) -> RealityResult {
        let values = match self.evaluator.evaluate(&candidate.formula, &slice.frame) {
            Ok(v) => v,
            Err(e) => {
                debug!("Reality: evaluation of {} failed: {}", candidate.id, e);
                return neutral_result(vec!["evaluation".to_string()]);
            }
        };
        self.score_values(candidate.kind, &values, &slice.returns)
    }

    /// Score pre-computed factor values (or strategy positions) against returns
    pub fn score_values(&self, kind: CandidateKind, values: &[f64], returns: &[f64]) -> RealityResult {
        let mut degraded = Vec::new();
        let (aligned, _) = stats::aligned_pairs(values, returns);

        let ic = match self.scoring.ic(values, returns) {
            Ok(ic) => Some(ic),
            Err(e) => {
                debug!("Reality: {}", e);
                degraded.push("ic".to_string());
                None
            }
        };
        let ir = self.scoring.ir(values, returns);

        let positions: Vec<f64> = match kind {
            CandidateKind::Factor => {
                let direction = if ic.unwrap_or(0.0) < 0.0 { -1.0 } else { 1.0 };
                metrics::zscore_positions(values, self.config.position_lookback)
                    .into_iter()
                    .map(|p| p * direction)
                    .collect()
            }
            CandidateKind::Strategy => values.iter().map(|v| v.clamp(-1.0, 1.0)).collect(),
        };
        let pnl = metrics::strategy_returns(&positions, returns);

        let mut measure = |name: &str, r: crate::error::Result<f64>| -> Option<f64> {
            match r {
                Ok(v) => Some(v),
                Err(e) => {
                    debug!("Reality: {}", e);
                    degraded.push(name.to_string());
                    None
                }
            }
        };
        let sharpe = measure("sharpe", self.scoring.sharpe(&pnl));
        let sortino = measure("sortino", self.scoring.sortino(&pnl));
        let drawdown = measure("max_drawdown", self.scoring.max_drawdown(&pnl));
        let win_rate = measure("win_rate", self.scoring.win_rate(&pnl));
        let turnover = measure("turnover", self.scoring.turnover(&positions));

        let ic_part = ic.map_or(NEUTRAL_SCORE, |v| saturate(v.abs(), self.config.ic_saturation));
        let ir_part = saturate(ir.abs(), self.config.ir_saturation);
        let sharpe_part = sharpe.map_or(NEUTRAL_SCORE, |v| saturate(v.max(0.0), self.config.sharpe_saturation));
        let dd_part = drawdown.map_or(NEUTRAL_SCORE, |dd| {
            stats::clamp01(1.0 - dd / self.config.drawdown_saturation)
        });
        let win_part = win_rate.unwrap_or(NEUTRAL_SCORE);

        let score = stats::clamp01(
            0.25 * ic_part + 0.20 * ir_part + 0.20 * sharpe_part + 0.20 * dd_part + 0.15 * win_part,
        );

        RealityResult {
            ic: ic.unwrap_or(0.0),
            ir,
            sharpe: sharpe.unwrap_or(0.0),
            sortino: sortino.unwrap_or(0.0),
            max_drawdown: drawdown.unwrap_or(0.0),
            win_rate: win_rate.unwrap_or(NEUTRAL_SCORE),
            turnover: turnover.unwrap_or(0.0),
            sample_count: aligned.len(),
            score,
            degraded,
        }
    }
}

fn neutral_result(degraded: Vec<String>) -> RealityResult {
    RealityResult {
        win_rate: NEUTRAL_SCORE,
        score: NEUTRAL_SCORE,
        degraded,
        ..Default::default()
    }
}

impl TrackTester for RealityTester {
    fn kind(&self) -> TrackKind {
        TrackKind::Reality
    }

    fn test(&self, candidate: &Candidate, data: &ArenaData) -> TrackResult {
        let result = self.evaluate_slice(candidate, &data.primary);
        debug!(
            "Reality track for {}: score={:.3} ic={:.4} sharpe={:.2} dd={:.3}",
            candidate.id, result.score, result.ic, result.sharpe, result.max_drawdown
        );
        TrackResult::Reality(result)
    }
}
