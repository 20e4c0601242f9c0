//! Cross-Market Track - generalisation across market regimes
//!
//! Each configured regime is scored with the reality formula on that
//! regime's history. A regime with no usable history scores the neutral 0.5.

use tracing::debug;

use super::{RealityTester, TrackTester, NEUTRAL_SCORE};
use crate::config::CrossMarketConfig;
use crate::scoring::stats;
use crate::types::{
    ArenaData, Candidate, CrossMarketResult, MarketOutcome, MarketRegime, TrackKind, TrackResult,
};

pub struct CrossMarketTester {
    reality: RealityTester,
    config: CrossMarketConfig,
    min_samples: usize,
}

impl CrossMarketTester {
    /// `min_samples` is the minimum row count for a regime's history to be used
    pub fn new(reality: RealityTester, config: CrossMarketConfig, min_samples: usize) -> Self {
        Self {
            reality,
            config,
            min_samples,
        }
    }

    fn score_market(&self, candidate: &Candidate, data: &ArenaData, regime: MarketRegime) -> MarketOutcome {
        let unavailable = MarketOutcome {
            regime,
            available: false,
            score: NEUTRAL_SCORE,
            ic: None,
            sharpe: None,
        };

        let slice = match data.markets.get(&regime) {
            Some(slice) => slice,
            None => return unavailable,
        };
        if let Err(e) = slice.validate(self.min_samples) {
            debug!("Cross-market: {} history unusable: {}", regime.as_str(), e);
            return unavailable;
        }

        let result = self.reality.evaluate_slice(candidate, slice);
        MarketOutcome {
            regime,
            available: true,
            score: result.score,
            ic: Some(result.ic),
            sharpe: Some(result.sharpe),
        }
    }

    pub fn run(&self, candidate: &Candidate, data: &ArenaData) -> CrossMarketResult {
        let markets: Vec<MarketOutcome> = self
            .config
            .regimes
            .iter()
            .map(|regime| self.score_market(candidate, data, *regime))
            .collect();

        let degraded: Vec<String> = markets
            .iter()
            .filter(|m| !m.available)
            .map(|m| m.regime.as_str().to_string())
            .collect();

        let scores: Vec<f64> = markets.iter().map(|m| m.score).collect();
        if scores.is_empty() {
            return CrossMarketResult {
                mean_score: NEUTRAL_SCORE,
                min_score: NEUTRAL_SCORE,
                adaptability: 1.0,
                score: NEUTRAL_SCORE,
                degraded: vec!["regimes".to_string()],
                ..Default::default()
            };
        }

        let mean_score = stats::mean(&scores);
        let min_score = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let adaptability = adaptability(&scores);
        let score = stats::clamp01(self.config.mean_weight * mean_score + self.config.min_weight * min_score);

        CrossMarketResult {
            markets,
            mean_score,
            min_score,
            adaptability,
            score,
            degraded,
        }
    }
}

/// 1 - coefficient of variation, clamped to [0, 1]
fn adaptability(scores: &[f64]) -> f64 {
    let mean = stats::mean(scores);
    if !mean.is_finite() || mean <= 0.0 {
        return 0.0;
    }
    let spread = if scores.len() < 2 { 0.0 } else { stats::std_dev(scores) };
    stats::clamp01(1.0 - spread / mean)
}

impl TrackTester for CrossMarketTester {
    fn kind(&self) -> TrackKind {
        TrackKind::CrossMarket
    }

    fn test(&self, candidate: &Candidate, data: &ArenaData) -> TrackResult {
        let result = self.run(candidate, data);
        debug!(
            "Cross-market track for {}: score={:.3} mean={:.3} min={:.3} adaptability={:.3}",
            candidate.id, result.score, result.mean_score, result.min_score, result.adaptability
        );
        TrackResult::CrossMarket(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealityConfig;
    use crate::evaluator::BuiltinEvaluator;
    use crate::market::{MarketFrame, MarketSlice, CLOSE, VOLUME};
    use crate::scoring::ScoringEngine;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn tester() -> CrossMarketTester {
        let reality = RealityTester::new(
            ScoringEngine::default(),
            RealityConfig::default(),
            Arc::new(BuiltinEvaluator::new()),
        );
        CrossMarketTester::new(reality, CrossMarketConfig::default(), 20)
    }

    fn slice(n: usize, strength: f64) -> MarketSlice {
        let t0 = Utc::now();
        let signal: Vec<f64> = (0..n).map(|i| ((i * 37) % 23) as f64 - 11.0).collect();
        let returns: Vec<f64> = signal.iter().map(|s| s * 0.001 * strength).collect();
        let frame = MarketFrame::new((0..n).map(|i| t0 + Duration::days(i as i64)).collect())
            .with_column(CLOSE, (0..n).map(|i| 100.0 + i as f64).collect())
            .unwrap()
            .with_column(VOLUME, vec![500.0; n])
            .unwrap()
            .with_column("signal", signal)
            .unwrap();
        MarketSlice::new(frame, returns)
    }

    #[test]
    fn test_missing_markets_are_neutral() {
        let c = Candidate::factor("f1", "signal", "column:signal", "test");
        let data = ArenaData::new(slice(120, 1.0));
        let r = tester().run(&c, &data);

        assert_eq!(r.markets.len(), 4);
        assert!(r.markets.iter().all(|m| !m.available && m.score == NEUTRAL_SCORE));
        assert_eq!(r.score, NEUTRAL_SCORE);
        assert_eq!(r.adaptability, 1.0);
        assert_eq!(r.degraded.len(), 4);
    }

    #[test]
    fn test_score_biased_toward_worst_market() {
        let c = Candidate::factor("f2", "signal", "column:signal", "test");
        let data = ArenaData::new(slice(120, 1.0))
            .with_market(MarketRegime::Bull, slice(60, 1.0))
            .with_market(MarketRegime::Bear, slice(60, -1.0));
        let r = tester().run(&c, &data);

        let expected = 0.6 * r.mean_score + 0.4 * r.min_score;
        assert!((r.score - expected).abs() < 1e-12);
        assert!(r.score <= r.mean_score);
        assert!((0.0..=1.0).contains(&r.adaptability));
        assert!(r.markets.iter().filter(|m| m.available).count() == 2);
    }

    #[test]
    fn test_short_market_history_is_unavailable() {
        let c = Candidate::factor("f3", "signal", "column:signal", "test");
        let data = ArenaData::new(slice(120, 1.0)).with_market(MarketRegime::Sideways, slice(10, 1.0));
        let r = tester().run(&c, &data);
        let sideways = r.markets.iter().find(|m| m.regime == MarketRegime::Sideways).unwrap();
        assert!(!sideways.available);
        assert_eq!(sideways.score, NEUTRAL_SCORE);
    }

    #[test]
    fn test_adaptability() {
        assert_eq!(adaptability(&[0.5, 0.5]), 1.0);
        assert_eq!(adaptability(&[0.0, 0.0]), 0.0);
        assert!(adaptability(&[0.9, 0.1]) < 0.5);
    }
}
