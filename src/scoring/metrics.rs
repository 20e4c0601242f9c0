//! Performance metrics over factor values and return series
//!
//! All functions align their inputs by position and drop incomplete pairs.
//! Anything short of `min_samples` fails with [`Error::Computation`].

use serde::{Deserialize, Serialize};

use super::stats::{self, aligned_pairs, finite};
use crate::error::{Error, Result};

/// Correlation flavour used for IC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IcMethod {
    /// Rank correlation
    #[default]
    Spearman,
    /// Linear correlation
    Pearson,
}

fn correlate(x: &[f64], y: &[f64], method: IcMethod) -> Option<f64> {
    match method {
        IcMethod::Spearman => stats::spearman(x, y),
        IcMethod::Pearson => stats::pearson(x, y),
    }
}

fn require(n: usize, min_samples: usize, what: &str) -> Result<()> {
    if n < min_samples {
        return Err(Error::computation(format!(
            "{}: insufficient samples ({} < {})",
            what, n, min_samples
        )));
    }
    Ok(())
}

/// Information coefficient of factor values against forward returns.
///
/// Zero-variance input yields 0 rather than an error.
pub fn information_coefficient(
    factor: &[f64],
    returns: &[f64],
    method: IcMethod,
    min_samples: usize,
) -> Result<f64> {
    let (f, r) = aligned_pairs(factor, returns);
    require(f.len(), min_samples, "ic")?;
    Ok(correlate(&f, &r, method).unwrap_or(0.0))
}

/// IC over each trailing window of `window` aligned pairs
pub fn rolling_ic(factor: &[f64], returns: &[f64], window: usize, method: IcMethod) -> Vec<f64> {
    let (f, r) = aligned_pairs(factor, returns);
    if window < 2 || f.len() < window {
        return Vec::new();
    }
    (window..=f.len())
        .map(|end| correlate(&f[end - window..end], &r[end - window..end], method).unwrap_or(0.0))
        .collect()
}

/// Mean over standard deviation of an IC series; 0 when undefined
pub fn information_ratio(ic_series: &[f64]) -> f64 {
    let ics = finite(ic_series);
    if ics.len() < 2 {
        return 0.0;
    }
    let sd = stats::std_dev(&ics);
    if sd <= f64::EPSILON {
        return 0.0;
    }
    stats::mean(&ics) / sd
}

/// Annualised Sharpe ratio
pub fn sharpe_ratio(
    returns: &[f64],
    periods_per_year: f64,
    risk_free_rate: f64,
    min_samples: usize,
) -> Result<f64> {
    let r = finite(returns);
    require(r.len(), min_samples, "sharpe")?;
    let sd = stats::std_dev(&r);
    if sd <= f64::EPSILON {
        return Err(Error::computation("sharpe: zero volatility"));
    }
    let excess = stats::mean(&r) - risk_free_rate / periods_per_year;
    Ok(excess / sd * periods_per_year.sqrt())
}

/// Annualised Sortino ratio (downside deviation below the risk-free rate)
pub fn sortino_ratio(
    returns: &[f64],
    periods_per_year: f64,
    risk_free_rate: f64,
    min_samples: usize,
) -> Result<f64> {
    let r = finite(returns);
    require(r.len(), min_samples, "sortino")?;
    let target = risk_free_rate / periods_per_year;
    let downside = (r.iter().map(|x| (x - target).min(0.0).powi(2)).sum::<f64>() / r.len() as f64).sqrt();
    if downside <= f64::EPSILON {
        return Err(Error::computation("sortino: no downside deviation"));
    }
    Ok((stats::mean(&r) - target) / downside * periods_per_year.sqrt())
}

/// Equity curve compounded from returns, starting at 1.0
pub fn equity_curve(returns: &[f64]) -> Vec<f64> {
    let mut equity = 1.0;
    finite(returns)
        .into_iter()
        .map(|r| {
            equity *= 1.0 + r;
            equity
        })
        .collect()
}

/// Largest peak-to-trough loss of the compounded equity, in [0, 1]
pub fn max_drawdown(returns: &[f64]) -> Result<f64> {
    let curve = equity_curve(returns);
    if curve.is_empty() {
        return Err(Error::computation("max_drawdown: empty return series"));
    }
    Ok(drawdown_of_curve(&curve))
}

pub(crate) fn drawdown_of_curve(curve: &[f64]) -> f64 {
    let mut peak = 1.0f64;
    let mut worst = 0.0f64;
    for &e in curve {
        peak = peak.max(e);
        if peak > 0.0 {
            worst = worst.max((peak - e) / peak);
        }
    }
    stats::clamp01(worst)
}

/// Fraction of non-flat periods with a positive return
pub fn win_rate(returns: &[f64]) -> Result<f64> {
    let active: Vec<f64> = finite(returns).into_iter().filter(|r| *r != 0.0).collect();
    if active.is_empty() {
        return Err(Error::computation("win_rate: no active periods"));
    }
    let wins = active.iter().filter(|r| **r > 0.0).count();
    Ok(wins as f64 / active.len() as f64)
}

/// How often the factor crosses its median, in [0, 1]
pub fn turnover(values: &[f64], min_samples: usize) -> Result<f64> {
    let v = finite(values);
    require(v.len(), min_samples, "turnover")?;
    let med = stats::median(&v);
    let sides: Vec<bool> = v.iter().map(|x| *x >= med).collect();
    let flips = sides.windows(2).filter(|w| w[0] != w[1]).count();
    Ok(flips as f64 / (sides.len() - 1) as f64)
}

/// Period returns of holding `positions[t]` over `returns[t]`
pub fn strategy_returns(positions: &[f64], returns: &[f64]) -> Vec<f64> {
    positions
        .iter()
        .zip(returns.iter())
        .map(|(p, r)| {
            if p.is_finite() && r.is_finite() {
                p * r
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Trailing z-score of factor values mapped to positions in [-1, 1].
///
/// Rows without enough history are NaN.
pub fn zscore_positions(values: &[f64], lookback: usize) -> Vec<f64> {
    let lookback = lookback.max(2);
    let min_history = (lookback / 2).max(2);
    (0..values.len())
        .map(|t| {
            if !values[t].is_finite() {
                return f64::NAN;
            }
            let start = (t + 1).saturating_sub(lookback);
            let window = finite(&values[start..=t]);
            if window.len() < min_history {
                return f64::NAN;
            }
            let sd = stats::std_dev(&window);
            if sd <= f64::EPSILON {
                return 0.0;
            }
            ((values[t] - stats::mean(&window)) / sd / 2.0).clamp(-1.0, 1.0)
        })
        .collect()
}

/// Bars after `from` until the curve regains its peak up to `from`.
///
/// The peak includes the 1.0 starting equity the curve compounds from, so a
/// loss on the first bar still has to be won back.
pub fn recovery_bars(curve: &[f64], from: usize) -> Option<usize> {
    if curve.is_empty() {
        return None;
    }
    let from = from.min(curve.len() - 1);
    let peak = curve[..=from].iter().copied().fold(1.0, f64::max);
    curve[from..]
        .iter()
        .position(|e| *e >= peak)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn test_ic_perfect_and_degenerate() {
        let f = linear(30);
        let r: Vec<f64> = f.iter().map(|x| x * 0.001).collect();
        let ic = information_coefficient(&f, &r, IcMethod::Spearman, 20).unwrap();
        assert!((ic - 1.0).abs() < 1e-12);

        // constant factor: degenerate, not an error
        let ic = information_coefficient(&[1.0; 30], &r, IcMethod::Pearson, 20).unwrap();
        assert_eq!(ic, 0.0);
    }

    #[test]
    fn test_ic_insufficient_samples() {
        let err = information_coefficient(&linear(10), &linear(10), IcMethod::Spearman, 20).unwrap_err();
        assert!(matches!(err, Error::Computation(_)));
    }

    #[test]
    fn test_information_ratio() {
        assert_eq!(information_ratio(&[0.1]), 0.0);
        assert_eq!(information_ratio(&[0.1, 0.1, 0.1]), 0.0);
        let ir = information_ratio(&[0.1, 0.2, 0.3]);
        assert!((ir - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_ic_length() {
        let f = linear(30);
        let ics = rolling_ic(&f, &f, 20, IcMethod::Spearman);
        assert_eq!(ics.len(), 11);
        assert!(ics.iter().all(|ic| (ic - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_sharpe_requires_volatility() {
        assert!(sharpe_ratio(&[0.01; 30], 252.0, 0.0, 20).is_err());
        let r: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 0.02 } else { -0.01 }).collect();
        let s = sharpe_ratio(&r, 252.0, 0.0, 20).unwrap();
        assert!(s > 0.0);
        assert!(sortino_ratio(&r, 252.0, 0.0, 20).unwrap() > s);
    }

    #[test]
    fn test_max_drawdown() {
        let dd = max_drawdown(&[0.1, -0.5, 0.2]).unwrap();
        assert!((dd - 0.5).abs() < 1e-12);
        assert_eq!(max_drawdown(&[0.01, 0.02]).unwrap(), 0.0);
        assert!(max_drawdown(&[f64::NAN]).is_err());
    }

    #[test]
    fn test_win_rate_and_turnover() {
        assert_eq!(win_rate(&[0.1, -0.1, 0.0, 0.2]).unwrap(), 2.0 / 3.0);
        assert!(win_rate(&[0.0, 0.0]).is_err());

        let alternating: Vec<f64> = (0..20).map(|i| (i % 2) as f64).collect();
        assert_eq!(turnover(&alternating, 10).unwrap(), 1.0);
        assert_eq!(turnover(&linear(20), 10).unwrap(), 1.0 / 19.0);
    }

    #[test]
    fn test_zscore_positions_bounded() {
        let values: Vec<f64> = (0..50).map(|i| ((i * 7) % 11) as f64).collect();
        let pos = zscore_positions(&values, 20);
        assert!(pos[0].is_nan());
        assert!(pos[20..].iter().all(|p| (-1.0..=1.0).contains(p)));
    }

    #[test]
    fn test_recovery_bars() {
        let curve = equity_curve(&[0.1, -0.2, 0.1, 0.2]);
        // peak 1.1 at 0, trough at 1, regained at 3
        assert_eq!(recovery_bars(&curve, 1), Some(2));
        let falling = equity_curve(&[0.1, -0.2, -0.1]);
        assert_eq!(recovery_bars(&falling, 1), None);
    }

    #[test]
    fn test_recovery_from_first_bar_loss() {
        // the curve's first point is already below the 1.0 start
        let curve = equity_curve(&[-0.1, 0.05, 0.05, 0.05]);
        assert_eq!(recovery_bars(&curve, 0), Some(3));
        let flat_after = equity_curve(&[-0.1, 0.0, 0.0]);
        assert_eq!(recovery_bars(&flat_after, 0), None);
    }
}
