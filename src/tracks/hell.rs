//! Hell Track - synthetic stress scenarios
//!
//! Each scenario finds the stretch of history it is built around, perturbs
//! that stretch, re-evaluates the candidate on the perturbed frame and
//! measures how much predictive power survives. A scenario that cannot be
//! placed, or whose span is too short to measure, scores the neutral 0.5.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::debug;

use super::{saturate, TrackTester, NEUTRAL_SCORE};
use crate::config::HellConfig;
use crate::evaluator::FactorEvaluator;
use crate::market::{MarketSlice, CLOSE, VOLUME};
use crate::scoring::{metrics, stats, ScoringEngine};
use crate::types::{
    ArenaData, Candidate, CandidateKind, HellResult, ScenarioOutcome, StressScenario, TrackKind,
    TrackResult,
};

/// IC at which a scenario earns full performance
const SCENARIO_IC_SATURATION: f64 = 0.15;

pub struct HellTester {
    scoring: ScoringEngine,
    config: HellConfig,
    evaluator: Arc<dyn FactorEvaluator>,
}

/// A placed stress window `[start, end)`
#[derive(Debug, Clone, Copy)]
struct Window {
    start: usize,
    end: usize,
}

impl HellTester {
    pub fn new(scoring: ScoringEngine, config: HellConfig, evaluator: Arc<dyn FactorEvaluator>) -> Self {
        Self {
            scoring,
            config,
            evaluator,
        }
    }

    fn window_len(&self, scenario: StressScenario) -> usize {
        match scenario {
            StressScenario::SustainedCrash => self.config.crash_bars,
            StressScenario::FlashCrash => self.config.flash_bars,
            StressScenario::VolumeCollapse => self.config.volume_bars,
            StressScenario::VolatilitySpike => self.config.volatility_bars,
            StressScenario::CorrelationBreakdown => self.config.breakdown_bars,
        }
        .max(1)
    }

    /// Locate the stretch of history a scenario is anchored on
    fn detect(&self, scenario: StressScenario, slice: &MarketSlice, values: &[f64]) -> Option<Window> {
        let n = slice.len();
        let len = self.window_len(scenario);
        if n < len + 1 {
            return None;
        }
        let returns = &slice.returns;
        let starts = 0..=(n - len);

        let best_by = |score: &dyn Fn(usize) -> Option<f64>, lowest: bool| -> Option<Window> {
            let mut best: Option<(usize, f64)> = None;
            for s in starts.clone() {
                if let Some(v) = score(s) {
                    let better = match best {
                        None => true,
                        Some((_, b)) => if lowest { v < b } else { v > b },
                    };
                    if better {
                        best = Some((s, v));
                    }
                }
            }
            best.map(|(start, _)| Window { start, end: start + len })
        };

        let window_mean = |data: &[f64], s: usize| -> Option<f64> {
            let w = stats::finite(&data[s..s + len]);
            (!w.is_empty()).then(|| stats::mean(&w))
        };

        match scenario {
            StressScenario::SustainedCrash => best_by(&|s| window_mean(returns, s), true),
            StressScenario::FlashCrash => {
                best_by(&|s| returns[s].is_finite().then_some(returns[s]), true)
            }
            StressScenario::VolumeCollapse => {
                let volume = slice.frame.column(VOLUME)?;
                best_by(&|s| window_mean(volume, s), true)
            }
            StressScenario::VolatilitySpike => best_by(
                &|s| {
                    let w = stats::finite(&returns[s..s + len]);
                    (w.len() >= 2).then(|| stats::std_dev(&w))
                },
                false,
            ),
            StressScenario::CorrelationBreakdown if values.len() != n => None,
            StressScenario::CorrelationBreakdown => best_by(
                &|s| {
                    let (f, r) = stats::aligned_pairs(&values[s..s + len], &returns[s..s + len]);
                    if f.len() < 3 {
                        return None;
                    }
                    stats::spearman(&f, &r).map(f64::abs)
                },
                false,
            ),
        }
    }

    /// Copy of the slice with the scenario applied inside `window`
    fn perturb(&self, scenario: StressScenario, slice: &MarketSlice, window: Window) -> MarketSlice {
        let mut out = slice.clone();
        let Window { start, end } = window;
        let returns = &mut out.returns;

        match scenario {
            StressScenario::SustainedCrash => {
                for r in returns[start..end].iter_mut().filter(|r| r.is_finite()) {
                    *r = (*r + self.config.crash_drift).max(-0.95);
                }
            }
            StressScenario::FlashCrash => {
                let drop = self.config.flash_drop.clamp(0.0, 0.95);
                returns[start] = -drop;
                let rebound_bars = end - start - 1;
                if rebound_bars > 0 {
                    // claw back half of the drop over the rest of the window
                    let per_bar = (1.0 / (1.0 - drop)).powf(0.5 / rebound_bars as f64) - 1.0;
                    for r in returns[start + 1..end].iter_mut() {
                        *r = per_bar;
                    }
                }
                if let Some(volume) = out.frame.column_mut(VOLUME) {
                    for v in volume[start..end].iter_mut() {
                        *v *= 3.0;
                    }
                }
            }
            StressScenario::VolumeCollapse => {
                if let Some(volume) = out.frame.column_mut(VOLUME) {
                    for v in volume[start..end].iter_mut() {
                        *v *= self.config.volume_factor;
                    }
                }
            }
            StressScenario::VolatilitySpike => {
                let m = stats::mean(&stats::finite(&returns[start..end]));
                if m.is_finite() {
                    for r in returns[start..end].iter_mut().filter(|r| r.is_finite()) {
                        *r = (m + (*r - m) * self.config.volatility_multiplier).max(-0.95);
                    }
                }
            }
            StressScenario::CorrelationBreakdown => {
                let mut rng = StdRng::seed_from_u64(self.config.seed);
                returns[start..end].shuffle(&mut rng);
            }
        }

        rebuild_prices(&mut out, slice, start);
        out
    }

    fn run_scenario(
        &self,
        scenario: StressScenario,
        candidate: &Candidate,
        slice: &MarketSlice,
        values: &[f64],
        direction: f64,
        degraded: &mut Vec<String>,
    ) -> ScenarioOutcome {
        let undetected = ScenarioOutcome {
            scenario,
            detected: false,
            window: None,
            ic: None,
            performance: NEUTRAL_SCORE,
            survived: NEUTRAL_SCORE > self.config.performance_floor,
            drawdown: None,
            recovery_bars: None,
        };

        let window = match self.detect(scenario, slice, values) {
            Some(w) => w,
            None => {
                debug!("Hell: {} not detected for {}", scenario.as_str(), candidate.id);
                return undetected;
            }
        };

        let stressed = self.perturb(scenario, slice, window);
        let stressed_values = match self.evaluator.evaluate(&candidate.formula, &stressed.frame) {
            Ok(v) if v.len() == slice.len() => Ok(v),
            Ok(v) => Err(format!("evaluator returned {} rows for {}", v.len(), slice.len())),
            Err(e) => Err(e.to_string()),
        };
        let stressed_values = match stressed_values {
            Ok(v) => v,
            Err(e) => {
                debug!("Hell: re-evaluation under {} failed: {}", scenario.as_str(), e);
                degraded.push(format!("{}.evaluation", scenario.as_str()));
                return ScenarioOutcome {
                    detected: true,
                    window: Some((window.start, window.end)),
                    ..undetected
                };
            }
        };

        let span_end = (window.end + self.config.aftermath_bars).min(slice.len());
        let span = window.start..span_end;
        let local_ic = metrics::information_coefficient(
            &stressed_values[span.clone()],
            &stressed.returns[span.clone()],
            self.scoring.config().ic_method,
            self.config.min_scenario_samples,
        );

        let (ic, performance) = match local_ic {
            Ok(ic) => (
                Some(ic),
                stats::clamp01(0.5 + 0.5 * (direction * ic) / SCENARIO_IC_SATURATION),
            ),
            Err(e) => {
                debug!("Hell: {} span too short: {}", scenario.as_str(), e);
                (None, NEUTRAL_SCORE)
            }
        };

        let (drawdown, recovery_bars) = match candidate.kind {
            CandidateKind::Factor => (None, None),
            CandidateKind::Strategy => {
                let positions: Vec<f64> = stressed_values.iter().map(|v| v.clamp(-1.0, 1.0)).collect();
                let (drawdown, recovery) = stress_path(&positions, &stressed.returns, window);
                (Some(drawdown), recovery)
            }
        };

        ScenarioOutcome {
            scenario,
            detected: true,
            window: Some((window.start, window.end)),
            ic,
            performance,
            survived: performance > self.config.performance_floor,
            drawdown,
            recovery_bars,
        }
    }

    fn run(&self, candidate: &Candidate, slice: &MarketSlice) -> HellResult {
        let mut degraded = Vec::new();

        let values = match self.evaluator.evaluate(&candidate.formula, &slice.frame) {
            Ok(v) if v.len() == slice.len() && slice.returns.len() == slice.len() => v,
            Ok(_) => {
                debug!("Hell: misaligned input for {}", candidate.id);
                return HellResult {
                    survival_rate: NEUTRAL_SCORE,
                    mean_performance: NEUTRAL_SCORE,
                    score: NEUTRAL_SCORE,
                    degraded: vec!["alignment".to_string()],
                    ..Default::default()
                };
            }
            Err(e) => {
                debug!("Hell: evaluation of {} failed: {}", candidate.id, e);
                return HellResult {
                    survival_rate: NEUTRAL_SCORE,
                    mean_performance: NEUTRAL_SCORE,
                    score: NEUTRAL_SCORE,
                    degraded: vec!["evaluation".to_string()],
                    ..Default::default()
                };
            }
        };

        // scenario performance is measured in the direction the factor normally works
        let direction = match self.scoring.ic(&values, &slice.returns) {
            Ok(ic) if ic < 0.0 => -1.0,
            Ok(_) => 1.0,
            Err(_) => {
                degraded.push("baseline_ic".to_string());
                1.0
            }
        };

        let scenarios: Vec<ScenarioOutcome> = StressScenario::ALL
            .iter()
            .map(|s| self.run_scenario(*s, candidate, slice, &values, direction, &mut degraded))
            .collect();

        let total = scenarios.len() as f64;
        let survival_rate = scenarios.iter().filter(|s| s.survived).count() as f64 / total;
        let mean_performance = scenarios.iter().map(|s| s.performance).sum::<f64>() / total;

        let (recovery_score, worst_drawdown, score) = match candidate.kind {
            CandidateKind::Factor => (None, None, 0.5 * survival_rate + 0.5 * mean_performance),
            CandidateKind::Strategy => {
                let measured: Vec<&ScenarioOutcome> =
                    scenarios.iter().filter(|s| s.drawdown.is_some()).collect();
                let horizon = self.config.recovery_horizon.max(1) as f64;
                let recovery = if measured.is_empty() {
                    NEUTRAL_SCORE
                } else {
                    measured
                        .iter()
                        .map(|s| recovery_score(s.recovery_bars, horizon))
                        .sum::<f64>()
                        / measured.len() as f64
                };
                let worst = measured
                    .iter()
                    .filter_map(|s| s.drawdown)
                    .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))));
                let dd_part = worst.map_or(NEUTRAL_SCORE, |dd| {
                    1.0 - saturate(dd, self.config.drawdown_saturation)
                });
                let score = 0.35 * survival_rate + 0.35 * mean_performance + 0.15 * recovery + 0.15 * dd_part;
                (Some(recovery), worst, score)
            }
        };

        HellResult {
            scenarios,
            survival_rate,
            mean_performance,
            recovery_score,
            worst_drawdown,
            score: stats::clamp01(score),
            degraded,
        }
    }
}

/// Drawdown inside the stress window and bars from its trough until the
/// equity held going into the window is regained
fn stress_path(positions: &[f64], returns: &[f64], window: Window) -> (f64, Option<usize>) {
    let pnl: Vec<f64> = metrics::strategy_returns(positions, returns)[window.start..]
        .iter()
        .map(|p| if p.is_finite() { *p } else { 0.0 })
        .collect();
    let curve = metrics::equity_curve(&pnl);
    let stressed = &curve[..(window.end - window.start).min(curve.len())];
    let drawdown = metrics::drawdown_of_curve(stressed);
    let trough = stressed
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    (drawdown, metrics::recovery_bars(&curve, trough))
}

/// 1 for an instant recovery, falling to 0 at `horizon` bars or never
fn recovery_score(bars: Option<usize>, horizon: f64) -> f64 {
    match bars {
        Some(bars) => stats::clamp01(1.0 - bars as f64 / horizon),
        None => 0.0,
    }
}

/// Recompute close (and open/high/low proportionally) from `start` using the
/// perturbed forward returns, so the frame and returns stay consistent
fn rebuild_prices(stressed: &mut MarketSlice, original: &MarketSlice, start: usize) {
    let Some(orig_close) = original.frame.column(CLOSE) else {
        return;
    };
    let n = orig_close.len();
    let mut close = orig_close.to_vec();
    for t in start..n.saturating_sub(1) {
        let r = stressed.returns[t];
        let ratio = if r.is_finite() {
            1.0 + r
        } else if orig_close[t] != 0.0 {
            orig_close[t + 1] / orig_close[t]
        } else {
            1.0
        };
        close[t + 1] = close[t] * ratio;
    }

    for name in ["open", "high", "low"] {
        if let Some(col) = stressed.frame.column_mut(name) {
            for t in start..n {
                if orig_close[t] != 0.0 {
                    col[t] *= close[t] / orig_close[t];
                }
            }
        }
    }
    if let Some(col) = stressed.frame.column_mut(CLOSE) {
        *col = close;
    }
}

impl TrackTester for HellTester {
    fn kind(&self) -> TrackKind {
        TrackKind::Hell
    }

    fn test(&self, candidate: &Candidate, data: &ArenaData) -> TrackResult {
        let result = self.run(candidate, &data.primary);
        debug!(
            "Hell track for {}: score={:.3} survival={:.2} mean={:.3}",
            candidate.id, result.score, result.survival_rate, result.mean_performance
        );
        TrackResult::Hell(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::BuiltinEvaluator;
    use crate::market::{forward_returns, MarketFrame};
    use chrono::{Duration, Utc};

    fn tester() -> HellTester {
        HellTester::new(
            ScoringEngine::default(),
            HellConfig::default(),
            Arc::new(BuiltinEvaluator::new()),
        )
    }

    fn slice(n: usize) -> MarketSlice {
        let t0 = Utc::now();
        let close: Vec<f64> = (0..n)
            .map(|i| 100.0 * (1.0 + 0.1 * ((i as f64) / 7.0).sin()) + i as f64 * 0.05)
            .collect();
        let returns = forward_returns(&close);
        let volume: Vec<f64> = (0..n).map(|i| 1_000.0 + ((i * 31) % 17) as f64 * 10.0).collect();
        let frame = MarketFrame::new((0..n).map(|i| t0 + Duration::days(i as i64)).collect())
            .with_column(CLOSE, close)
            .unwrap()
            .with_column(VOLUME, volume)
            .unwrap();
        MarketSlice::new(frame, returns)
    }

    #[test]
    fn test_factor_hell_bounds() {
        let c = Candidate::factor("f1", "mom", "momentum_5", "momentum");
        let r = tester().run(&c, &slice(200));
        assert_eq!(r.scenarios.len(), StressScenario::ALL.len());
        assert!((0.0..=1.0).contains(&r.survival_rate));
        assert!((0.0..=1.0).contains(&r.mean_performance));
        assert!((0.0..=1.0).contains(&r.score));
        assert!(r.scenarios.iter().all(|s| (0.0..=1.0).contains(&s.performance)));
        assert!(r.recovery_score.is_none());
        let expected = 0.5 * r.survival_rate + 0.5 * r.mean_performance;
        assert!((r.score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_short_history_is_neutral() {
        let c = Candidate::factor("f1", "mom", "momentum_5", "momentum");
        let r = tester().run(&c, &slice(20));
        // crash window of 40 bars cannot be placed in 20 rows
        let crash = r
            .scenarios
            .iter()
            .find(|s| s.scenario == StressScenario::SustainedCrash)
            .unwrap();
        assert!(!crash.detected);
        assert_eq!(crash.performance, NEUTRAL_SCORE);
        assert!(crash.survived);
    }

    #[test]
    fn test_strategy_folds_in_recovery_and_drawdown() {
        let c = Candidate::strategy("s1", "trend", "position:momentum_5", "trend");
        let r = tester().run(&c, &slice(200));
        assert!(r.recovery_score.is_some());
        assert!(r.worst_drawdown.is_some());
        let dd = r.worst_drawdown.unwrap();
        assert!((0.0..=1.0).contains(&dd));
        assert!((0.0..=1.0).contains(&r.score));
    }

    #[test]
    fn test_sustained_crash_lowers_prices() {
        let t = tester();
        let s = slice(200);
        let w = Window { start: 50, end: 90 };
        let stressed = t.perturb(StressScenario::SustainedCrash, &s, w);
        let before = s.frame.column(CLOSE).unwrap()[90];
        let after = stressed.frame.column(CLOSE).unwrap()[90];
        assert!(after < before);
        // rows before the window are untouched
        assert_eq!(
            s.frame.column(CLOSE).unwrap()[..=50],
            stressed.frame.column(CLOSE).unwrap()[..=50]
        );
    }

    /// History with the given per-bar returns and a matching close column
    fn slice_from_returns(returns: Vec<f64>) -> MarketSlice {
        let t0 = Utc::now();
        let mut price = 100.0;
        let close: Vec<f64> = returns
            .iter()
            .map(|r| {
                let c = price;
                price *= 1.0 + r;
                c
            })
            .collect();
        let n = returns.len();
        let frame = MarketFrame::new((0..n).map(|i| t0 + Duration::days(i as i64)).collect())
            .with_column(CLOSE, close)
            .unwrap()
            .with_column(VOLUME, vec![1_000.0; n])
            .unwrap();
        MarketSlice::new(frame, returns)
    }

    #[test]
    fn test_flash_crash_recovery_counts_from_pre_crash_equity() {
        let t = tester();
        let window = Window { start: 10, end: 15 };
        let long = vec![1.0; 40];

        // -10% then half clawed back inside the window, +2% per bar afterwards
        let rebound = slice_from_returns(vec![0.02; 40]);
        let stressed = t.perturb(StressScenario::FlashCrash, &rebound, window);
        let (drawdown, bars) = stress_path(&long, &stressed.returns, window);
        assert!((drawdown - 0.10).abs() < 1e-9);
        // equity regains 1.0 on the third +2% bar after the window
        assert_eq!(bars, Some(7));
        assert!((recovery_score(bars, 60.0) - (1.0 - 7.0 / 60.0)).abs() < 1e-12);

        let flat = slice_from_returns(vec![0.0; 40]);
        let stressed = t.perturb(StressScenario::FlashCrash, &flat, window);
        let (drawdown, bars) = stress_path(&long, &stressed.returns, window);
        assert!((drawdown - 0.10).abs() < 1e-9);
        assert_eq!(bars, None);
        assert_eq!(recovery_score(bars, 60.0), 0.0);
    }

    #[test]
    fn test_unstressed_path_recovers_instantly() {
        let window = Window { start: 5, end: 10 };
        let (drawdown, bars) = stress_path(&[1.0; 20], &[0.01; 20], window);
        assert_eq!(drawdown, 0.0);
        assert_eq!(bars, Some(0));
        assert_eq!(recovery_score(bars, 60.0), 1.0);
    }

    #[test]
    fn test_volume_collapse_only_touches_volume() {
        let t = tester();
        let s = slice(200);
        let stressed = t.perturb(StressScenario::VolumeCollapse, &s, Window { start: 10, end: 40 });
        assert_eq!(s.frame.column(CLOSE), stressed.frame.column(CLOSE));
        let v0 = s.frame.column(VOLUME).unwrap()[20];
        let v1 = stressed.frame.column(VOLUME).unwrap()[20];
        assert!((v1 - v0 * 0.2).abs() < 1e-9);
    }
}
