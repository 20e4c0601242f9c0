//! Mocked evaluator, event sink and tracks for testing without real factor code

#![allow(dead_code)]

use chrono::{Duration, Utc};
use factor_arena::{
    market::{CLOSE, VOLUME},
    types::{HellResult, RealityResult},
    ArenaData, ArenaEvent, BuiltinEvaluator, Candidate, Error, EventSink, FactorEvaluator,
    MarketFrame, MarketSlice, Result, TrackKind, TrackResult, TrackTester,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

/// Builtin catalogue plus injected failures and a call counter
pub struct MockEvaluator {
    inner: BuiltinEvaluator,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl MockEvaluator {
    pub fn new() -> Self {
        Self {
            inner: BuiltinEvaluator::new(),
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_failure(mut self, formula: &str) -> Self {
        self.failing.insert(formula.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FactorEvaluator for MockEvaluator {
    fn evaluate(&self, formula: &str, frame: &MarketFrame) -> Result<Vec<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(formula) {
            return Err(Error::Computation(format!("simulated failure for {}", formula)));
        }
        self.inner.evaluate(formula, frame)
    }
}

/// Captures published events; optionally rejects them all
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ArenaEvent>>,
    reject: bool,
}

impl RecordingSink {
    pub fn rejecting() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn events(&self) -> Vec<ArenaEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: ArenaEvent) -> Result<()> {
        if self.reject {
            return Err(Error::Publish("sink offline".to_string()));
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Track returning a fixed score, with optional work time and an
/// in-flight gauge
pub struct FixedTrack {
    pub kind: TrackKind,
    pub score: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub work: StdDuration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FixedTrack {
    pub fn new(kind: TrackKind, score: f64) -> Self {
        Self {
            kind,
            score,
            sharpe: 2.0,
            max_drawdown: 0.05,
            work: StdDuration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_work(mut self, work: StdDuration) -> Self {
        self.work = work;
        self
    }

    pub fn with_risk(mut self, sharpe: f64, max_drawdown: f64) -> Self {
        self.sharpe = sharpe;
        self.max_drawdown = max_drawdown;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl TrackTester for FixedTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn test(&self, _candidate: &Candidate, _data: &ArenaData) -> TrackResult {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.work.is_zero() {
            std::thread::sleep(self.work);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.kind {
            TrackKind::Reality => TrackResult::Reality(RealityResult {
                score: self.score,
                sharpe: self.sharpe,
                max_drawdown: self.max_drawdown,
                win_rate: 0.5,
                ..Default::default()
            }),
            TrackKind::Hell => TrackResult::Hell(HellResult {
                score: self.score,
                survival_rate: 1.0,
                mean_performance: self.score,
                ..Default::default()
            }),
            TrackKind::CrossMarket => {
                let mut result = TrackResult::neutral(TrackKind::CrossMarket);
                if let TrackResult::CrossMarket(cm) = &mut result {
                    cm.score = self.score;
                    cm.degraded.clear();
                }
                result
            }
        }
    }
}

/// Deterministic signal in [-11, 11]
pub fn signal(n: usize) -> Vec<f64> {
    (0..n).map(|i| ((i * 37) % 23) as f64 - 11.0).collect()
}

/// History whose forward returns follow the `signal` column with the given
/// strength; a slow uptrend in close
pub fn market_slice(n: usize, strength: f64) -> MarketSlice {
    let t0 = Utc::now() - Duration::days(n as i64);
    let sig = signal(n);
    let returns: Vec<f64> = sig.iter().map(|s| s * 0.001 * strength).collect();

    let mut close = Vec::with_capacity(n);
    let mut price = 100.0;
    for r in &returns {
        close.push(price);
        price *= 1.0 + r;
    }

    let frame = MarketFrame::new((0..n).map(|i| t0 + Duration::days(i as i64)).collect())
        .with_column(CLOSE, close)
        .unwrap()
        .with_column(VOLUME, (0..n).map(|i| 1_000.0 + (i % 7) as f64 * 50.0).collect())
        .unwrap()
        .with_column("signal", sig)
        .unwrap();
    MarketSlice::new(frame, returns)
}
