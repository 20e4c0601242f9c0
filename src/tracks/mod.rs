//! Track testers - independent evaluation tracks run by the arena
//!
//! Each tester owns its configuration and produces an immutable
//! [`TrackResult`]. Testers never fail: internal computation errors are
//! replaced by the neutral 0.5 and listed in the result's `degraded` field.

pub mod cross_market;
pub mod hell;
pub mod reality;

pub use cross_market::CrossMarketTester;
pub use hell::HellTester;
pub use reality::RealityTester;

use crate::types::{ArenaData, Candidate, TrackKind, TrackResult};

/// Neutral substitute for any metric that could not be computed
pub const NEUTRAL_SCORE: f64 = 0.5;

/// A single arena track
pub trait TrackTester: Send + Sync {
    fn kind(&self) -> TrackKind;

    fn test(&self, candidate: &Candidate, data: &ArenaData) -> TrackResult;
}

/// Scale `value` against a saturation constant into [0, 1]
pub(crate) fn saturate(value: f64, saturation: f64) -> f64 {
    if !value.is_finite() || saturation <= 0.0 {
        return 0.0;
    }
    (value / saturation).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturate() {
        assert_eq!(saturate(0.075, 0.15), 0.5);
        assert_eq!(saturate(0.3, 0.15), 1.0);
        assert_eq!(saturate(-1.0, 0.15), 0.0);
        assert_eq!(saturate(f64::NAN, 0.15), 0.0);
    }
}
