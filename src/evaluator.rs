//! Factor expression evaluation
//!
//! Formula evaluation is an external capability. The arena and decision
//! engine only see the [`FactorEvaluator`] trait; [`BuiltinEvaluator`] covers
//! a fixed catalogue of named formulas for demos and tests.

use crate::error::{Error, Result};
use crate::market::{MarketFrame, CLOSE, VOLUME};
use crate::scoring::stats;

/// Turns a formula into one value per frame row (NaN where undefined)
pub trait FactorEvaluator: Send + Sync {
    fn evaluate(&self, formula: &str, frame: &MarketFrame) -> Result<Vec<f64>>;
}

/// Catalogue of named formulas:
///
/// - `momentum_N`, `reversal_N`, `volatility_N`, `volume_ratio_N`
/// - `column:<name>` for a raw column
/// - `position:<formula>` for the sign of any of the above, used as strategy positions
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEvaluator;

impl BuiltinEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl FactorEvaluator for BuiltinEvaluator {
    fn evaluate(&self, formula: &str, frame: &MarketFrame) -> Result<Vec<f64>> {
        let formula = formula.trim();

        if let Some(inner) = formula.strip_prefix("position:") {
            let values = self.evaluate(inner, frame)?;
            return Ok(values
                .into_iter()
                .map(|v| {
                    if !v.is_finite() {
                        f64::NAN
                    } else if v > 0.0 {
                        1.0
                    } else if v < 0.0 {
                        -1.0
                    } else {
                        0.0
                    }
                })
                .collect());
        }

        if let Some(name) = formula.strip_prefix("column:") {
            return column(frame, name).map(|c| c.to_vec());
        }

        let (name, period) = split_period(formula)?;
        match name {
            "momentum" => momentum(column(frame, CLOSE)?, period),
            "reversal" => Ok(momentum(column(frame, CLOSE)?, period)?
                .into_iter()
                .map(|v| -v)
                .collect()),
            "volatility" => volatility(column(frame, CLOSE)?, period),
            "volume_ratio" => volume_ratio(column(frame, VOLUME)?, period),
            other => Err(Error::computation(format!("unknown formula '{}'", other))),
        }
    }
}

fn column<'a>(frame: &'a MarketFrame, name: &str) -> Result<&'a [f64]> {
    frame
        .column(name)
        .ok_or_else(|| Error::computation(format!("frame has no column '{}'", name)))
}

fn split_period(formula: &str) -> Result<(&str, usize)> {
    let (name, period) = formula
        .rsplit_once('_')
        .ok_or_else(|| Error::computation(format!("unknown formula '{}'", formula)))?;
    let period: usize = period
        .parse()
        .map_err(|_| Error::computation(format!("invalid period in '{}'", formula)))?;
    if period == 0 {
        return Err(Error::computation(format!("zero period in '{}'", formula)));
    }
    Ok((name, period))
}

fn momentum(close: &[f64], period: usize) -> Result<Vec<f64>> {
    Ok((0..close.len())
        .map(|t| {
            if t < period || close[t - period] == 0.0 {
                f64::NAN
            } else {
                close[t] / close[t - period] - 1.0
            }
        })
        .collect())
}

fn volatility(close: &[f64], period: usize) -> Result<Vec<f64>> {
    let rets: Vec<f64> = (0..close.len())
        .map(|t| {
            if t == 0 || close[t - 1] == 0.0 {
                f64::NAN
            } else {
                close[t] / close[t - 1] - 1.0
            }
        })
        .collect();
    Ok((0..close.len())
        .map(|t| {
            if t < period {
                return f64::NAN;
            }
            let window = stats::finite(&rets[t + 1 - period..=t]);
            if window.len() < 2 {
                f64::NAN
            } else {
                stats::std_dev(&window)
            }
        })
        .collect())
}

fn volume_ratio(volume: &[f64], period: usize) -> Result<Vec<f64>> {
    Ok((0..volume.len())
        .map(|t| {
            if t + 1 < period {
                return f64::NAN;
            }
            let avg = stats::mean(&volume[t + 1 - period..=t]);
            if avg > 0.0 {
                volume[t] / avg
            } else {
                f64::NAN
            }
        })
        .collect())
}
