//! Factor health scoring and decay classification

use serde::{Deserialize, Serialize};

use super::stats::{self, clamp01, finite};

/// Saturation ceilings for the health sub-scores
const IC_FULL_MARKS: f64 = 0.1;
const IR_FULL_MARKS: f64 = 1.0;
const SHARPE_FULL_MARKS: f64 = 2.0;
/// Turnover up to this level is considered reasonable
const TURNOVER_COMFORT: f64 = 0.5;

/// Raw inputs to the health score
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HealthInputs {
    pub ic: f64,
    pub ir: f64,
    pub sharpe: f64,
    pub turnover: f64,
}

/// Weighted health in [0, 1]:
/// 0.40 IC stability, 0.25 IR, 0.20 Sharpe, 0.15 turnover reasonableness.
pub fn health_score(inputs: &HealthInputs) -> f64 {
    let ic_score = clamp01(inputs.ic.abs() / IC_FULL_MARKS);
    let ir_score = clamp01(inputs.ir.abs() / IR_FULL_MARKS);
    let sharpe_score = clamp01(inputs.sharpe.max(0.0) / SHARPE_FULL_MARKS);
    let turnover_score = if inputs.turnover <= TURNOVER_COMFORT {
        1.0
    } else {
        clamp01(1.0 - (inputs.turnover - TURNOVER_COMFORT) / (1.0 - TURNOVER_COMFORT))
    };

    clamp01(0.40 * ic_score + 0.25 * ir_score + 0.20 * sharpe_score + 0.15 * turnover_score)
}

/// Relative loss of |IC| from the early half of the series to the recent half, in [0, 1]
pub fn ic_decay_rate(ic_series: &[f64]) -> f64 {
    let ics = finite(ic_series);
    if ics.len() < 4 {
        return 0.0;
    }
    let (early, recent) = ics.split_at(ics.len() / 2);
    let early = stats::mean(early).abs();
    let recent = stats::mean(recent).abs();
    if early <= f64::EPSILON {
        return 0.0;
    }
    clamp01((early - recent) / early)
}

/// Degradation severity ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecaySeverity {
    None,
    Mild,
    Moderate,
    Severe,
}

/// What to do about a decaying factor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum RemediationAction {
    Continue,
    ReduceWeight { fraction: f64 },
    PauseAndRetest,
    RetireToRiskSignal,
}

impl DecaySeverity {
    pub fn remediation(&self) -> RemediationAction {
        match self {
            DecaySeverity::None => RemediationAction::Continue,
            DecaySeverity::Mild => RemediationAction::ReduceWeight { fraction: 0.3 },
            DecaySeverity::Moderate => RemediationAction::PauseAndRetest,
            DecaySeverity::Severe => RemediationAction::RetireToRiskSignal,
        }
    }
}

/// Result of a degradation check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationReport {
    pub severity: DecaySeverity,
    pub is_decaying: bool,
    pub action: RemediationAction,
    pub health_score: f64,
    pub ic_decay_rate: f64,
}

/// Classify factor degradation from health and IC decay.
///
/// Health below 0.3 is severe, below 0.5 moderate, below 0.7 mild. A decay
/// rate above 0.6 escalates to at least moderate.
pub fn detect_degradation(health_score: f64, ic_decay_rate: f64) -> DegradationReport {
    let mut severity = if health_score < 0.3 {
        DecaySeverity::Severe
    } else if health_score < 0.5 {
        DecaySeverity::Moderate
    } else if health_score < 0.7 {
        DecaySeverity::Mild
    } else {
        DecaySeverity::None
    };

    if ic_decay_rate > 0.6 && severity < DecaySeverity::Moderate {
        severity = DecaySeverity::Moderate;
    }

    DegradationReport {
        severity,
        is_decaying: severity != DecaySeverity::None,
        action: severity.remediation(),
        health_score,
        ic_decay_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_saturates() {
        let strong = HealthInputs {
            ic: 0.2,
            ir: 2.0,
            sharpe: 3.0,
            turnover: 0.2,
        };
        assert!((health_score(&strong) - 1.0).abs() < 1e-12);

        let dead = HealthInputs {
            ic: 0.0,
            ir: 0.0,
            sharpe: -1.0,
            turnover: 1.0,
        };
        assert_eq!(health_score(&dead), 0.0);
    }

    #[test]
    fn test_health_weights() {
        // only IC at half marks, turnover fine
        let h = health_score(&HealthInputs {
            ic: 0.05,
            ir: 0.0,
            sharpe: 0.0,
            turnover: 0.1,
        });
        assert!((h - (0.40 * 0.5 + 0.15)).abs() < 1e-12);
    }

    #[test]
    fn test_severe_when_health_low() {
        let r = detect_degradation(0.25, 0.0);
        assert_eq!(r.severity, DecaySeverity::Severe);
        assert!(r.is_decaying);
        assert_eq!(r.action, RemediationAction::RetireToRiskSignal);
    }

    #[test]
    fn test_healthy_factor_not_decaying() {
        let r = detect_degradation(0.9, 0.1);
        assert_eq!(r.severity, DecaySeverity::None);
        assert!(!r.is_decaying);
        assert_eq!(r.action, RemediationAction::Continue);
    }

    #[test]
    fn test_ladder_and_decay_escalation() {
        assert_eq!(detect_degradation(0.45, 0.0).severity, DecaySeverity::Moderate);
        assert_eq!(detect_degradation(0.65, 0.0).severity, DecaySeverity::Mild);
        assert_eq!(
            detect_degradation(0.65, 0.0).action,
            RemediationAction::ReduceWeight { fraction: 0.3 }
        );
        assert_eq!(detect_degradation(0.9, 0.7).severity, DecaySeverity::Moderate);
        // escalation never lowers severity
        assert_eq!(detect_degradation(0.2, 0.7).severity, DecaySeverity::Severe);
    }

    #[test]
    fn test_ic_decay_rate() {
        assert_eq!(ic_decay_rate(&[0.1, 0.1]), 0.0);
        let decaying = [0.10, 0.10, 0.02, 0.02];
        assert!((ic_decay_rate(&decaying) - 0.8).abs() < 1e-9);
        let improving = [0.02, 0.02, 0.10, 0.10];
        assert_eq!(ic_decay_rate(&improving), 0.0);
    }
}
