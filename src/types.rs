//! Core types shared by the arena, tracks, pipeline and decision engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::market::MarketSlice;
use crate::scoring::stats;

/// What kind of candidate is under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    Factor,
    Strategy,
}

impl std::fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateKind::Factor => write!(f, "factor"),
            CandidateKind::Strategy => write!(f, "strategy"),
        }
    }
}

/// A factor or strategy produced by discovery/generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub name: String,
    /// Formula or code reference, resolved by the expression evaluator
    pub formula: String,
    pub kind: CandidateKind,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub tested: bool,
    /// Overall arena score in [0, 1], set once tested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Candidate {
    pub fn factor(id: &str, name: &str, formula: &str, category: &str) -> Self {
        Self::new(id, name, formula, category, CandidateKind::Factor)
    }

    pub fn strategy(id: &str, name: &str, formula: &str, category: &str) -> Self {
        Self::new(id, name, formula, category, CandidateKind::Strategy)
    }

    fn new(id: &str, name: &str, formula: &str, category: &str, kind: CandidateKind) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            formula: formula.to_string(),
            kind,
            category: category.to_string(),
            created_at: Utc::now(),
            tested: false,
            score: None,
        }
    }
}

/// Categorical market condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    Bull,
    Bear,
    Sideways,
    HighVolatility,
}

impl MarketRegime {
    pub const ALL: [MarketRegime; 4] = [
        MarketRegime::Bull,
        MarketRegime::Bear,
        MarketRegime::Sideways,
        MarketRegime::HighVolatility,
    ];

    /// Classify the trailing window of a return series.
    ///
    /// Annualised volatility above 40% wins over direction; otherwise the
    /// cumulative return decides between bull (> 5%), bear (< -5%) and
    /// sideways.
    pub fn classify(returns: &[f64], lookback: usize) -> MarketRegime {
        let clean: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
        if clean.len() < 2 {
            return MarketRegime::Sideways;
        }
        let window = &clean[clean.len().saturating_sub(lookback.max(2))..];

        let vol = stats::std_dev(window) * (252f64).sqrt();
        if vol > 0.40 {
            return MarketRegime::HighVolatility;
        }

        let cumulative = window.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0;
        if cumulative > 0.05 {
            MarketRegime::Bull
        } else if cumulative < -0.05 {
            MarketRegime::Bear
        } else {
            MarketRegime::Sideways
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::Bull => "bull",
            MarketRegime::Bear => "bear",
            MarketRegime::Sideways => "sideways",
            MarketRegime::HighVolatility => "high_volatility",
        }
    }
}

/// Input bundle for one arena run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaData {
    /// Primary history used by the reality and hell tracks
    pub primary: MarketSlice,
    /// Per-regime histories for the cross-market track
    #[serde(default)]
    pub markets: BTreeMap<MarketRegime, MarketSlice>,
}

impl ArenaData {
    pub fn new(primary: MarketSlice) -> Self {
        Self {
            primary,
            markets: BTreeMap::new(),
        }
    }

    pub fn with_market(mut self, regime: MarketRegime, slice: MarketSlice) -> Self {
        self.markets.insert(regime, slice);
        self
    }
}

/// Which track produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Reality,
    Hell,
    CrossMarket,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Reality => "reality",
            TrackKind::Hell => "hell",
            TrackKind::CrossMarket => "cross_market",
        }
    }
}

/// Reality track: ordinary historical conditions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealityResult {
    pub ic: f64,
    pub ir: f64,
    pub sharpe: f64,
    pub sortino: f64,
    /// Max drawdown as a fraction in [0, 1]
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub turnover: f64,
    pub sample_count: usize,
    pub score: f64,
    /// Metrics that fell back to the neutral default
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<String>,
}

/// Synthetic stress scenarios run by the hell track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressScenario {
    SustainedCrash,
    FlashCrash,
    VolumeCollapse,
    VolatilitySpike,
    CorrelationBreakdown,
}

impl StressScenario {
    pub const ALL: [StressScenario; 5] = [
        StressScenario::SustainedCrash,
        StressScenario::FlashCrash,
        StressScenario::VolumeCollapse,
        StressScenario::VolatilitySpike,
        StressScenario::CorrelationBreakdown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StressScenario::SustainedCrash => "sustained_crash",
            StressScenario::FlashCrash => "flash_crash",
            StressScenario::VolumeCollapse => "volume_collapse",
            StressScenario::VolatilitySpike => "volatility_spike",
            StressScenario::CorrelationBreakdown => "correlation_breakdown",
        }
    }
}

/// Outcome of one stress scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub scenario: StressScenario,
    pub detected: bool,
    /// Row range `[start, end)` of the stress window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<(usize, usize)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ic: Option<f64>,
    /// Performance in [0, 1]; 0.5 when undetected or not measurable
    pub performance: f64,
    pub survived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drawdown: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_bars: Option<usize>,
}

/// Hell track: synthetic stress periods
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HellResult {
    pub scenarios: Vec<ScenarioOutcome>,
    pub survival_rate: f64,
    pub mean_performance: f64,
    /// Strategy only: speed of equity recovery in [0, 1]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_score: Option<f64>,
    /// Strategy only: worst drawdown across stress windows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worst_drawdown: Option<f64>,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<String>,
}

/// Per-market outcome on the cross-market track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOutcome {
    pub regime: MarketRegime,
    pub available: bool,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ic: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sharpe: Option<f64>,
}

/// Cross-market track: generalisation across regimes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossMarketResult {
    pub markets: Vec<MarketOutcome>,
    pub mean_score: f64,
    pub min_score: f64,
    pub adaptability: f64,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<String>,
}

/// Output of a single track tester
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "track", rename_all = "snake_case")]
pub enum TrackResult {
    Reality(RealityResult),
    Hell(HellResult),
    CrossMarket(CrossMarketResult),
}

impl TrackResult {
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackResult::Reality(_) => TrackKind::Reality,
            TrackResult::Hell(_) => TrackKind::Hell,
            TrackResult::CrossMarket(_) => TrackKind::CrossMarket,
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            TrackResult::Reality(r) => r.score,
            TrackResult::Hell(r) => r.score,
            TrackResult::CrossMarket(r) => r.score,
        }
    }

    /// Neutral stand-in for a track whose task did not produce a result
    pub fn neutral(kind: TrackKind) -> Self {
        let degraded = vec!["track".to_string()];
        match kind {
            TrackKind::Reality => TrackResult::Reality(RealityResult {
                score: 0.5,
                win_rate: 0.5,
                degraded,
                ..Default::default()
            }),
            TrackKind::Hell => TrackResult::Hell(HellResult {
                survival_rate: 0.5,
                mean_performance: 0.5,
                score: 0.5,
                degraded,
                ..Default::default()
            }),
            TrackKind::CrossMarket => TrackResult::CrossMarket(CrossMarketResult {
                mean_score: 0.5,
                min_score: 0.5,
                adaptability: 1.0,
                score: 0.5,
                degraded,
                ..Default::default()
            }),
        }
    }

    /// Flattened `track.metric` pairs for the detailed metrics map
    pub fn metrics(&self) -> Vec<(String, f64)> {
        let prefix = self.kind().as_str();
        let pairs: Vec<(&str, f64)> = match self {
            TrackResult::Reality(r) => vec![
                ("ic", r.ic),
                ("ir", r.ir),
                ("sharpe", r.sharpe),
                ("sortino", r.sortino),
                ("max_drawdown", r.max_drawdown),
                ("win_rate", r.win_rate),
                ("turnover", r.turnover),
                ("score", r.score),
            ],
            TrackResult::Hell(r) => {
                let mut v = vec![
                    ("survival_rate", r.survival_rate),
                    ("mean_performance", r.mean_performance),
                    ("score", r.score),
                ];
                if let Some(rec) = r.recovery_score {
                    v.push(("recovery_score", rec));
                }
                if let Some(dd) = r.worst_drawdown {
                    v.push(("worst_drawdown", dd));
                }
                v
            }
            TrackResult::CrossMarket(r) => vec![
                ("mean_score", r.mean_score),
                ("min_score", r.min_score),
                ("adaptability", r.adaptability),
                ("score", r.score),
            ],
        };
        pairs
            .into_iter()
            .map(|(k, v)| (format!("{}.{}", prefix, k), v))
            .collect()
    }
}

/// Aggregated verdict of one arena run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub candidate_id: String,
    pub candidate_kind: CandidateKind,
    pub tracks: Vec<TrackResult>,
    /// Overall score in [0, 1]
    pub overall_score: f64,
    pub passed: bool,
    /// Threshold in force when the verdict was rendered
    pub threshold: f64,
    pub tested_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub detailed_metrics: BTreeMap<String, f64>,
}

impl TestResult {
    pub fn track(&self, kind: TrackKind) -> Option<&TrackResult> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn reality(&self) -> Option<&RealityResult> {
        self.tracks.iter().find_map(|t| match t {
            TrackResult::Reality(r) => Some(r),
            _ => None,
        })
    }

    pub fn hell(&self) -> Option<&HellResult> {
        self.tracks.iter().find_map(|t| match t {
            TrackResult::Hell(r) => Some(r),
            _ => None,
        })
    }

    pub fn cross_market(&self) -> Option<&CrossMarketResult> {
        self.tracks.iter().find_map(|t| match t {
            TrackResult::CrossMarket(r) => Some(r),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regime_classification() {
        assert_eq!(MarketRegime::classify(&[0.01; 30], 60), MarketRegime::Bull);
        assert_eq!(MarketRegime::classify(&[-0.01; 30], 60), MarketRegime::Bear);
        assert_eq!(MarketRegime::classify(&[0.0; 30], 60), MarketRegime::Sideways);

        let choppy: Vec<f64> = (0..60).map(|i| if i % 2 == 0 { 0.05 } else { -0.05 }).collect();
        assert_eq!(MarketRegime::classify(&choppy, 60), MarketRegime::HighVolatility);

        assert_eq!(MarketRegime::classify(&[f64::NAN], 60), MarketRegime::Sideways);
    }

    #[test]
    fn test_neutral_tracks_are_half() {
        for kind in [TrackKind::Reality, TrackKind::Hell, TrackKind::CrossMarket] {
            let t = TrackResult::neutral(kind);
            assert_eq!(t.kind(), kind);
            assert_eq!(t.score(), 0.5);
        }
    }

    #[test]
    fn test_track_metrics_prefixed() {
        let t = TrackResult::neutral(TrackKind::Hell);
        let m = t.metrics();
        assert!(m.iter().any(|(k, _)| k == "hell.survival_rate"));
        assert!(m.iter().all(|(k, _)| k.starts_with("hell.")));
    }
}
