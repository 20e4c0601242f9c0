//! Decision Engine - arena-validated factors to weighted trade recommendations
//!
//! A cycle ranks every factor's values across the instrument universe, turns
//! the tails into BUY/SELL candidates, drops candidates whose source factors
//! are redundant on the same instrument, settles BUY/SELL conflicts, merges
//! duplicates and finally applies the risk budget.

mod types;

pub use types::{IntegratedFactor, MarketSnapshot, Recommendation, TradeAction};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::config::DecisionConfig;
use crate::error::{Error, Result};
use crate::evaluator::FactorEvaluator;
use crate::market::CLOSE;
use crate::scoring::{stats, CorrelationMatrix};
use crate::types::{Candidate, CandidateKind, MarketRegime, TestResult};

/// (factor id, instrument) -> evaluated factor series
type SeriesCache = HashMap<(String, String), Vec<f64>>;

pub struct DecisionEngine {
    config: DecisionConfig,
    /// Minimum overlap for a per-instrument factor correlation
    min_samples: usize,
    evaluator: Arc<dyn FactorEvaluator>,
    factors: Vec<IntegratedFactor>,
    /// Fallback factor correlations when no series are available
    correlations: Option<CorrelationMatrix>,
    cycle: u64,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig, min_samples: usize, evaluator: Arc<dyn FactorEvaluator>) -> Self {
        Self {
            config,
            min_samples,
            evaluator,
            factors: Vec::new(),
            correlations: None,
            cycle: 0,
        }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    pub fn factors(&self) -> &[IntegratedFactor] {
        &self.factors
    }

    pub fn factor(&self, id: &str) -> Option<&IntegratedFactor> {
        self.factors.iter().find(|f| f.id == id)
    }

    fn factor_mut(&mut self, id: &str) -> Result<&mut IntegratedFactor> {
        self.factors
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| Error::validation(format!("factor {} is not integrated", id)))
    }

    /// Admit a factor that passed the arena. Re-integrating replaces the
    /// previous entry.
    pub fn integrate(&mut self, candidate: &Candidate, result: &TestResult) -> Result<()> {
        if candidate.kind != CandidateKind::Factor {
            return Err(Error::validation(format!("{} is not a factor", candidate.id)));
        }
        if result.candidate_id != candidate.id {
            return Err(Error::validation(format!(
                "result for {} does not belong to {}",
                result.candidate_id, candidate.id
            )));
        }
        if !result.passed {
            return Err(Error::validation(format!(
                "{} did not pass the arena (score {:.3})",
                candidate.id, result.overall_score
            )));
        }

        let (min_w, max_w) = (self.config.min_factor_weight, self.config.max_factor_weight);
        let baseline_ic = result.reality().map(|r| r.ic.abs()).unwrap_or(0.0);
        let regime_weights: BTreeMap<MarketRegime, f64> = result
            .cross_market()
            .map(|cm| {
                cm.markets
                    .iter()
                    .filter(|m| m.available)
                    .map(|m| (m.regime, m.score.clamp(min_w, max_w)))
                    .collect()
            })
            .unwrap_or_default();

        let factor = IntegratedFactor {
            id: candidate.id.clone(),
            name: candidate.name.clone(),
            formula: candidate.formula.clone(),
            arena_score: result.overall_score,
            certified: false,
            weight: max_w,
            base_weight: max_w,
            baseline_ic,
            current_ic: baseline_ic,
            current_sharpe: self.config.expected_sharpe,
            regime_weights,
            integrated_at: Utc::now(),
            outcomes: VecDeque::new(),
            last_adapted_cycle: None,
        };

        info!(
            "Decision: integrated factor {} (arena {:.3}, baseline IC {:.4})",
            factor.id, factor.arena_score, factor.baseline_ic
        );
        match self.factors.iter_mut().find(|f| f.id == factor.id) {
            Some(existing) => *existing = factor,
            None => self.factors.push(factor),
        }
        Ok(())
    }

    /// Grant the certification bonus
    pub fn certify(&mut self, factor_id: &str) -> Result<()> {
        self.factor_mut(factor_id)?.certified = true;
        Ok(())
    }

    pub fn remove(&mut self, factor_id: &str) -> Option<IntegratedFactor> {
        let pos = self.factors.iter().position(|f| f.id == factor_id)?;
        Some(self.factors.remove(pos))
    }

    /// Correlations used when a cycle cannot measure them from series
    pub fn set_factor_correlations(&mut self, matrix: CorrelationMatrix) {
        self.correlations = Some(matrix);
    }

    /// Record whether a factor's call turned out right
    pub fn record_outcome(&mut self, factor_id: &str, hit: bool) -> Result<()> {
        let window = self.config.hit_rate_window.max(1);
        let factor = self.factor_mut(factor_id)?;
        factor.outcomes.push_back(hit);
        while factor.outcomes.len() > window {
            factor.outcomes.pop_front();
        }
        Ok(())
    }

    /// Latest live IC and Sharpe for a factor
    pub fn update_performance(&mut self, factor_id: &str, ic: f64, sharpe: f64) -> Result<()> {
        if !ic.is_finite() || !sharpe.is_finite() {
            return Err(Error::validation(format!(
                "non-finite performance for {}: ic={} sharpe={}",
                factor_id, ic, sharpe
            )));
        }
        let factor = self.factor_mut(factor_id)?;
        factor.current_ic = ic;
        factor.current_sharpe = sharpe;
        Ok(())
    }

    /// Re-weight every factor for the active regime, at most once per cycle:
    ///
    /// new = mean(base * [0.4 IC/baseline + 0.3 hit/0.5 + 0.3 Sharpe/expected], regime weight)
    pub fn adapt_weights(&mut self, regime: MarketRegime) {
        let cycle = self.cycle;
        let (min_w, max_w) = (self.config.min_factor_weight, self.config.max_factor_weight);
        let expected_sharpe = self.config.expected_sharpe;

        for factor in self.factors.iter_mut() {
            if factor.last_adapted_cycle == Some(cycle) {
                continue;
            }
            let performance = 0.4 * ratio(factor.current_ic.abs(), factor.baseline_ic)
                + 0.3 * factor.hit_rate() / 0.5
                + 0.3 * ratio(factor.current_sharpe, expected_sharpe);
            let performance_weight = factor.base_weight * performance;
            let regime_weight = factor.regime_weight(regime);

            let mut weight = (performance_weight + regime_weight) / 2.0;
            if !weight.is_finite() {
                weight = factor.base_weight;
            }
            let weight = weight.clamp(min_w, max_w);
            if (weight - factor.weight).abs() > 1e-9 {
                debug!(
                    "Decision: factor {} weight {:.3} -> {:.3} ({})",
                    factor.id,
                    factor.weight,
                    weight,
                    regime.as_str()
                );
            }
            factor.weight = weight;
            factor.last_adapted_cycle = Some(cycle);
        }
    }

    /// Run one decision cycle
    pub fn generate_recommendations(&mut self, snapshot: &MarketSnapshot) -> Vec<Recommendation> {
        self.cycle += 1;
        let regime = snapshot
            .regime
            .unwrap_or_else(|| self.classify_regime(snapshot));
        self.adapt_weights(regime);

        let mut cache = SeriesCache::new();
        let mut by_instrument: BTreeMap<String, Vec<Recommendation>> = BTreeMap::new();
        for factor in &self.factors {
            for rec in self.factor_signals(factor, snapshot, regime, &mut cache) {
                by_instrument.entry(rec.instrument.clone()).or_default().push(rec);
            }
        }
        let raw: usize = by_instrument.values().map(|v| v.len()).sum();

        let mut recommendations: Vec<Recommendation> = by_instrument
            .into_iter()
            .filter_map(|(instrument, recs)| {
                let kept = self.decorrelate(&instrument, recs, &cache);
                resolve_conflicts(&instrument, kept)
            })
            .collect();

        self.apply_risk_budget(&mut recommendations);

        info!(
            "Decision cycle {}: {} factors, {} raw signals -> {} recommendations ({})",
            self.cycle,
            self.factors.len(),
            raw,
            recommendations.len(),
            regime.as_str()
        );
        recommendations
    }

    /// BUY/SELL candidates from one factor's cross-sectional ranking
    fn factor_signals(
        &self,
        factor: &IntegratedFactor,
        snapshot: &MarketSnapshot,
        regime: MarketRegime,
        cache: &mut SeriesCache,
    ) -> Vec<Recommendation> {
        let values = self.factor_values(factor, snapshot, cache);
        if values.len() < 2 {
            debug!("Decision: {} has {} ranked instruments, skipping", factor.id, values.len());
            return Vec::new();
        }

        let raw: Vec<f64> = values.iter().map(|(_, v)| *v).collect();
        let percentiles = stats::percentile_ranks(&raw);
        let hit_rate = factor.hit_rate();
        let bonus = if factor.certified { 1.0 } else { 0.0 };

        let mut out = Vec::new();
        for ((instrument, _), pct) in values.into_iter().zip(percentiles) {
            let action = if pct > self.config.buy_percentile {
                TradeAction::Buy
            } else if pct < self.config.sell_percentile && snapshot.holdings.contains(&instrument) {
                TradeAction::Sell
            } else {
                continue;
            };

            let strength = ((pct - 0.5).abs() * 2.0).min(1.0);
            let confidence =
                stats::clamp01(0.4 * factor.arena_score + 0.3 * strength + 0.2 * hit_rate + 0.1 * bonus);
            let target_weight = (self.config.base_allocation
                * factor.weight
                * (0.5 + strength)
                * (0.5 + confidence)
                * (0.5 + factor.arena_score))
                .clamp(self.config.min_instrument_weight, self.config.max_instrument_weight);

            let direction = if action == TradeAction::Buy { 1.0 } else { -1.0 };
            let frame = snapshot.instruments.get(&instrument);
            let volatility = frame
                .and_then(|f| f.column(CLOSE))
                .map(|close| recent_volatility(close, self.config.regime_lookback))
                .unwrap_or(0.0);
            let expected_return = direction * strength * factor.current_ic.abs() * volatility;

            out.push(Recommendation {
                reference_price: frame.and_then(|f| f.last_close()),
                reason: format!(
                    "{} at {:.0}th percentile on {}",
                    action.as_str(),
                    pct * 100.0,
                    factor.name
                ),
                instrument,
                action,
                target_weight,
                confidence,
                signal_strength: strength,
                expected_return,
                source_factors: vec![factor.id.clone()],
                regime,
                generated_at: snapshot.timestamp,
            });
        }
        out
    }

    /// Instrument values for a factor: snapshot-supplied, else the last
    /// finite evaluated value per instrument
    fn factor_values(
        &self,
        factor: &IntegratedFactor,
        snapshot: &MarketSnapshot,
        cache: &mut SeriesCache,
    ) -> Vec<(String, f64)> {
        if let Some(values) = snapshot.factor_values.get(&factor.id) {
            return values
                .iter()
                .filter(|(_, v)| v.is_finite())
                .map(|(k, v)| (k.clone(), *v))
                .collect();
        }

        let mut out = Vec::new();
        for (instrument, frame) in &snapshot.instruments {
            match self.evaluator.evaluate(&factor.formula, frame) {
                Ok(series) => {
                    if let Some(last) = series.iter().rev().find(|v| v.is_finite()) {
                        out.push((instrument.clone(), *last));
                    }
                    cache.insert((factor.id.clone(), instrument.clone()), series);
                }
                Err(e) => debug!("Decision: {} on {}: {}", factor.id, instrument, e),
            }
        }
        out
    }

    /// Correlation of two source factors on one instrument; `None` if unknown
    fn source_correlation(&self, a: &str, b: &str, instrument: &str, cache: &SeriesCache) -> Option<f64> {
        let key = |id: &str| (id.to_string(), instrument.to_string());
        if let (Some(x), Some(y)) = (cache.get(&key(a)), cache.get(&key(b))) {
            let (x, y) = stats::aligned_pairs(x, y);
            if x.len() >= self.min_samples.max(2) {
                if let Some(c) = stats::spearman(&x, &y) {
                    return Some(c);
                }
            }
        }
        self.correlations
            .as_ref()
            .and_then(|m| m.get(a, b))
            .filter(|c| c.is_finite())
    }

    /// Keep the most confident recommendation, then each further one whose
    /// sources are below the correlation threshold with every kept source
    fn decorrelate(
        &self,
        instrument: &str,
        mut recs: Vec<Recommendation>,
        cache: &SeriesCache,
    ) -> Vec<Recommendation> {
        recs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut kept: Vec<Recommendation> = Vec::new();
        for rec in recs {
            let redundant_with = kept.iter().find_map(|k| {
                k.source_factors.iter().find_map(|ks| {
                    rec.source_factors.iter().find_map(|rs| {
                        self.source_correlation(ks, rs, instrument, cache)
                            .filter(|c| c.abs() >= self.config.decorrelation_threshold)
                            .map(|c| (ks.clone(), c))
                    })
                })
            });
            match redundant_with {
                Some((source, c)) => debug!(
                    "Decision: dropped {} on {} (corr {:.2} with {})",
                    rec.source_factors.join(","),
                    instrument,
                    c,
                    source
                ),
                None => kept.push(rec),
            }
        }
        kept
    }

    /// Scale BUY weights down uniformly when they exceed the risk budget
    fn apply_risk_budget(&self, recs: &mut [Recommendation]) {
        let total: f64 = recs
            .iter()
            .filter(|r| r.action == TradeAction::Buy)
            .map(|r| r.target_weight)
            .sum();
        if total <= self.config.risk_budget || total <= 0.0 {
            return;
        }
        let scale = self.config.risk_budget / total;
        info!(
            "Decision: BUY weight {:.3} over budget {:.3}, scaling by {:.3}",
            total, self.config.risk_budget, scale
        );
        for rec in recs.iter_mut().filter(|r| r.action == TradeAction::Buy) {
            rec.target_weight *= scale;
        }
    }

    /// Regime of the equal-weighted universe over the trailing lookback
    fn classify_regime(&self, snapshot: &MarketSnapshot) -> MarketRegime {
        let lookback = self.config.regime_lookback.max(2);
        let returns: Vec<Vec<f64>> = snapshot
            .instruments
            .values()
            .filter_map(|f| f.column(CLOSE))
            .map(|close| {
                let r = simple_returns(close);
                r[r.len().saturating_sub(lookback)..].to_vec()
            })
            .filter(|r| !r.is_empty())
            .collect();

        let len = match returns.iter().map(|r| r.len()).min() {
            Some(len) if len >= 2 => len,
            _ => return MarketRegime::Sideways,
        };
        let universe: Vec<f64> = (0..len)
            .map(|i| {
                let row: Vec<f64> = returns
                    .iter()
                    .map(|r| r[r.len() - len + i])
                    .filter(|v| v.is_finite())
                    .collect();
                if row.is_empty() {
                    f64::NAN
                } else {
                    stats::mean(&row)
                }
            })
            .collect();
        MarketRegime::classify(&universe, lookback)
    }
}

/// Settle one instrument's surviving recommendations into at most one
fn resolve_conflicts(instrument: &str, recs: Vec<Recommendation>) -> Option<Recommendation> {
    let (buys, sells): (Vec<_>, Vec<_>) = recs.into_iter().partition(|r| r.action == TradeAction::Buy);

    if !buys.is_empty() && !sells.is_empty() {
        let buy_conf: f64 = buys.iter().map(|r| r.confidence).sum();
        let sell_conf: f64 = sells.iter().map(|r| r.confidence).sum();
        let total = buy_conf + sell_conf;
        if total <= 0.0 || (buy_conf - sell_conf).abs() < 1e-12 {
            debug!("Decision: BUY/SELL standoff on {}, no recommendation", instrument);
            return None;
        }

        let (winners, win_conf) = if buy_conf > sell_conf {
            (buys, buy_conf)
        } else {
            (sells, sell_conf)
        };
        let scale = win_conf / total;
        let mut best = winners
            .into_iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;
        debug!(
            "Decision: {} conflict on {} resolved for {} (scale {:.3})",
            best.action.as_str(),
            instrument,
            best.source_factors.join(","),
            scale
        );
        best.target_weight *= scale;
        best.confidence *= scale;
        return Some(best);
    }

    let same_side = if buys.is_empty() { sells } else { buys };
    merge(same_side)
}

/// Confidence-weighted merge of same-direction recommendations
fn merge(mut recs: Vec<Recommendation>) -> Option<Recommendation> {
    if recs.len() <= 1 {
        return recs.pop();
    }
    let total_conf: f64 = recs.iter().map(|r| r.confidence).sum();
    let weighted = |f: fn(&Recommendation) -> f64| -> f64 {
        if total_conf > 0.0 {
            recs.iter().map(|r| r.confidence * f(r)).sum::<f64>() / total_conf
        } else {
            stats::mean(&recs.iter().map(f).collect::<Vec<_>>())
        }
    };
    let target_weight = weighted(|r| r.target_weight);
    let expected_return = weighted(|r| r.expected_return);
    let sources: Vec<String> = recs.iter().flat_map(|r| r.source_factors.clone()).collect();

    recs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut best = recs.into_iter().next()?;
    best.target_weight = target_weight;
    best.expected_return = expected_return;
    best.reason = format!("{} merged from {}", best.action.as_str(), sources.join(", "));
    best.source_factors = sources;
    Some(best)
}

fn ratio(value: f64, baseline: f64) -> f64 {
    if baseline > f64::EPSILON {
        value / baseline
    } else {
        1.0
    }
}

fn simple_returns(close: &[f64]) -> Vec<f64> {
    close
        .windows(2)
        .map(|w| if w[0] != 0.0 { w[1] / w[0] - 1.0 } else { f64::NAN })
        .collect()
}

fn recent_volatility(close: &[f64], lookback: usize) -> f64 {
    let returns = simple_returns(close);
    let tail = stats::finite(&returns[returns.len().saturating_sub(lookback)..]);
    stats::std_dev(&tail)
}
