//! Arena Configuration
//!
//! Every threshold and weight the arena, tracks and decision engine use lives
//! here with a documented default. Values load from an optional file layered
//! under `ARENA__`-prefixed environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::scoring::IcMethod;
use crate::types::MarketRegime;

/// Top-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub scoring: ScoringConfig,
    pub reality: RealityConfig,
    pub hell: HellConfig,
    pub cross_market: CrossMarketConfig,
    pub arena: ArenaConfig,
    pub decision: DecisionConfig,
    pub correlation: CorrelationConfig,
}

impl Settings {
    /// Load from an optional file, then `ARENA__SECTION__KEY` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix("ARENA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values outside their meaningful range
    pub fn validate(&self) -> Result<()> {
        unit("arena.pass_threshold", self.arena.pass_threshold)?;
        unit("arena.strategy_max_drawdown", self.arena.strategy_max_drawdown)?;
        unit("hell.performance_floor", self.hell.performance_floor)?;
        unit("decision.buy_percentile", self.decision.buy_percentile)?;
        unit("decision.sell_percentile", self.decision.sell_percentile)?;
        unit("decision.decorrelation_threshold", self.decision.decorrelation_threshold)?;
        unit("correlation.threshold", self.correlation.threshold)?;
        unit("scoring.redundancy_threshold", self.scoring.redundancy_threshold)?;

        if self.decision.sell_percentile >= self.decision.buy_percentile {
            return Err(Error::Config(format!(
                "decision.sell_percentile ({}) must be below buy_percentile ({})",
                self.decision.sell_percentile, self.decision.buy_percentile
            )));
        }
        if self.decision.min_instrument_weight > self.decision.max_instrument_weight {
            return Err(Error::Config(
                "decision.min_instrument_weight exceeds max_instrument_weight".to_string(),
            ));
        }
        if self.decision.min_factor_weight > self.decision.max_factor_weight {
            return Err(Error::Config(
                "decision.min_factor_weight exceeds max_factor_weight".to_string(),
            ));
        }
        if self.arena.batch_concurrency == 0 {
            return Err(Error::Config("arena.batch_concurrency must be > 0".to_string()));
        }
        if self.scoring.min_samples < 2 {
            return Err(Error::Config("scoring.min_samples must be >= 2".to_string()));
        }
        if self.cross_market.regimes.len() > 4 {
            return Err(Error::Config(
                "cross_market.regimes accepts at most four regimes".to_string(),
            ));
        }
        let weight_sum = self.arena.strategy_reality_weight + self.arena.strategy_hell_weight;
        if (weight_sum - 1.0).abs() > 1e-9 {
            return Err(Error::Config(format!(
                "arena strategy weights must sum to 1, got {}",
                weight_sum
            )));
        }
        Ok(())
    }
}

fn unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!("{} must be within [0, 1], got {}", name, value)))
    }
}

/// Statistical scoring parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Minimum aligned samples for any metric
    pub min_samples: usize,
    pub ic_method: IcMethod,
    /// Window for rolling IC (feeds IR and decay rate)
    pub rolling_window: usize,
    pub periods_per_year: f64,
    /// Annual risk-free rate
    pub risk_free_rate: f64,
    /// |corr| above which two factors count as redundant
    pub redundancy_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_samples: 20,
            ic_method: IcMethod::Spearman,
            rolling_window: 20,
            periods_per_year: 252.0,
            risk_free_rate: 0.0,
            redundancy_threshold: 0.9,
        }
    }
}

/// Reality track saturation constants
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RealityConfig {
    pub ic_saturation: f64,
    pub ir_saturation: f64,
    pub sharpe_saturation: f64,
    pub drawdown_saturation: f64,
    /// Trailing window for factor z-score positions
    pub position_lookback: usize,
}

impl Default for RealityConfig {
    fn default() -> Self {
        Self {
            ic_saturation: 0.15,
            ir_saturation: 3.0,
            sharpe_saturation: 2.0,
            drawdown_saturation: 0.30,
            position_lookback: 20,
        }
    }
}

/// Hell track scenario shapes
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HellConfig {
    /// Performance at or below this counts as not surviving
    pub performance_floor: f64,
    /// Minimum samples in a scenario evaluation span
    pub min_scenario_samples: usize,
    /// Bars after a stress window included in its evaluation span
    pub aftermath_bars: usize,
    pub crash_bars: usize,
    /// Extra per-bar return applied during the sustained crash
    pub crash_drift: f64,
    pub flash_bars: usize,
    /// Single-bar drop at the start of the flash crash
    pub flash_drop: f64,
    pub volume_bars: usize,
    pub volume_factor: f64,
    pub volatility_bars: usize,
    pub volatility_multiplier: f64,
    pub breakdown_bars: usize,
    /// Seed for the correlation-breakdown shuffle
    pub seed: u64,
    pub drawdown_saturation: f64,
    /// Bars after which a strategy that has not recovered scores zero
    pub recovery_horizon: usize,
}

impl Default for HellConfig {
    fn default() -> Self {
        Self {
            performance_floor: 0.3,
            min_scenario_samples: 15,
            aftermath_bars: 20,
            crash_bars: 40,
            crash_drift: -0.01,
            flash_bars: 5,
            flash_drop: 0.10,
            volume_bars: 30,
            volume_factor: 0.2,
            volatility_bars: 30,
            volatility_multiplier: 3.0,
            breakdown_bars: 30,
            seed: 42,
            drawdown_saturation: 0.30,
            recovery_horizon: 60,
        }
    }
}

/// Cross-market track settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CrossMarketConfig {
    /// Regimes evaluated (at most four)
    pub regimes: Vec<MarketRegime>,
    pub mean_weight: f64,
    pub min_weight: f64,
}

impl Default for CrossMarketConfig {
    fn default() -> Self {
        Self {
            regimes: MarketRegime::ALL.to_vec(),
            mean_weight: 0.6,
            min_weight: 0.4,
        }
    }
}

/// Arena gate and orchestration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Overall score must exceed this to pass
    pub pass_threshold: f64,
    pub min_factor_samples: usize,
    pub min_strategy_samples: usize,
    /// Minimum rows for cross-market slices
    pub min_sub_test_samples: usize,
    pub factor_soft_target_secs: u64,
    pub strategy_soft_target_secs: u64,
    pub strategy_min_sharpe: f64,
    pub strategy_max_drawdown: f64,
    pub strategy_reality_weight: f64,
    pub strategy_hell_weight: f64,
    /// Concurrent candidates in batch mode
    pub batch_concurrency: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            pass_threshold: 0.7,
            min_factor_samples: 100,
            min_strategy_samples: 100,
            min_sub_test_samples: 20,
            factor_soft_target_secs: 30,
            strategy_soft_target_secs: 60,
            strategy_min_sharpe: 1.5,
            strategy_max_drawdown: 0.15,
            strategy_reality_weight: 0.6,
            strategy_hell_weight: 0.4,
            batch_concurrency: 4,
        }
    }
}

/// Decision engine settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub buy_percentile: f64,
    pub sell_percentile: f64,
    /// Base allocation per recommendation
    pub base_allocation: f64,
    pub min_instrument_weight: f64,
    pub max_instrument_weight: f64,
    /// Source factors at or above this correlation are redundant per instrument
    pub decorrelation_threshold: f64,
    /// Upper bound of total BUY weight
    pub risk_budget: f64,
    pub min_factor_weight: f64,
    pub max_factor_weight: f64,
    pub expected_sharpe: f64,
    /// Outcomes kept for the rolling hit rate
    pub hit_rate_window: usize,
    /// Trailing returns used to detect the active regime
    pub regime_lookback: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            buy_percentile: 0.8,
            sell_percentile: 0.2,
            base_allocation: 0.05,
            min_instrument_weight: 0.01,
            max_instrument_weight: 0.10,
            decorrelation_threshold: 0.7,
            risk_budget: 1.0,
            min_factor_weight: 0.1,
            max_factor_weight: 1.0,
            expected_sharpe: 1.5,
            hit_rate_window: 50,
            regime_lookback: 60,
        }
    }
}

/// Redundancy analyzer settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub threshold: f64,
    pub min_samples: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            min_samples: 20,
        }
    }
}
