//! Decision engine data types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::market::MarketFrame;
use crate::types::MarketRegime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
            TradeAction::Hold => "HOLD",
        }
    }
}

/// An arena-validated factor admitted to live decisions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegratedFactor {
    pub id: String,
    pub name: String,
    pub formula: String,
    pub arena_score: f64,
    /// Certified factors earn the confidence bonus
    pub certified: bool,
    /// Current weight in [min_factor_weight, max_factor_weight]
    pub weight: f64,
    pub base_weight: f64,
    /// |IC| measured in the arena
    pub baseline_ic: f64,
    /// Latest live IC, defaults to the baseline
    pub current_ic: f64,
    /// Latest live Sharpe, defaults to the expected Sharpe
    pub current_sharpe: f64,
    /// Weight table per market regime
    pub regime_weights: BTreeMap<MarketRegime, f64>,
    pub integrated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) outcomes: VecDeque<bool>,
    #[serde(skip)]
    pub(crate) last_adapted_cycle: Option<u64>,
}

impl IntegratedFactor {
    /// Fraction of recent calls that were right, 0.5 before any outcome
    pub fn hit_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.5;
        }
        self.outcomes.iter().filter(|hit| **hit).count() as f64 / self.outcomes.len() as f64
    }

    pub fn regime_weight(&self, regime: MarketRegime) -> f64 {
        self.regime_weights
            .get(&regime)
            .copied()
            .unwrap_or(self.base_weight)
    }
}

/// Market state for one decision cycle
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Instrument -> recent history
    pub instruments: BTreeMap<String, MarketFrame>,
    /// Factor id -> instrument -> precomputed value; overrides evaluation
    pub factor_values: HashMap<String, BTreeMap<String, f64>>,
    /// Instruments currently held (SELL candidates)
    pub holdings: HashSet<String>,
    /// Active regime; classified from the instruments when absent
    pub regime: Option<MarketRegime>,
}

impl MarketSnapshot {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    pub fn with_instrument(mut self, symbol: &str, frame: MarketFrame) -> Self {
        self.instruments.insert(symbol.to_string(), frame);
        self
    }

    pub fn with_factor_values(mut self, factor_id: &str, values: BTreeMap<String, f64>) -> Self {
        self.factor_values.insert(factor_id.to_string(), values);
        self
    }

    pub fn with_holding(mut self, symbol: &str) -> Self {
        self.holdings.insert(symbol.to_string());
        self
    }

    pub fn with_regime(mut self, regime: MarketRegime) -> Self {
        self.regime = Some(regime);
        self
    }
}

/// Trade recommendation for one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub instrument: String,
    pub action: TradeAction,
    /// Portfolio weight to trade
    pub target_weight: f64,
    pub confidence: f64,
    /// Distance of the percentile rank from the median, in [0, 1]
    pub signal_strength: f64,
    pub expected_return: f64,
    /// Factors behind this recommendation
    pub source_factors: Vec<String>,
    /// Last close of the instrument when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_price: Option<Decimal>,
    pub regime: MarketRegime,
    pub reason: String,
    pub generated_at: DateTime<Utc>,
}
