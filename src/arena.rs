//! Arena Orchestrator - validate, fan out to the tracks, aggregate and gate
//!
//! Factors run the reality, hell and cross-market tracks and score their
//! mean. Strategies run reality and hell, weighted 0.6/0.4, and must also
//! clear the Sharpe and drawdown gates.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::{ArenaConfig, Settings};
use crate::error::{Error, Result};
use crate::evaluator::FactorEvaluator;
use crate::events::{ArenaEvent, EventKind, EventPriority, EventSink};
use crate::scoring::{stats, ScoringEngine};
use crate::tracks::{CrossMarketTester, HellTester, RealityTester, TrackTester};
use crate::types::{ArenaData, Candidate, CandidateKind, TestResult, TrackKind, TrackResult};

pub struct Arena {
    config: ArenaConfig,
    /// f64 bits, mutable at runtime
    threshold: AtomicU64,
    factor_tracks: Vec<Arc<dyn TrackTester>>,
    strategy_tracks: Vec<Arc<dyn TrackTester>>,
    events: Arc<dyn EventSink>,
}

impl Arena {
    /// Build an arena with the standard track set
    pub fn new(
        settings: &Settings,
        evaluator: Arc<dyn FactorEvaluator>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let scoring = ScoringEngine::new(settings.scoring.clone());
        let reality = || {
            RealityTester::new(scoring.clone(), settings.reality.clone(), evaluator.clone())
        };
        let hell: Arc<dyn TrackTester> = Arc::new(HellTester::new(
            scoring.clone(),
            settings.hell.clone(),
            evaluator.clone(),
        ));
        let reality_track: Arc<dyn TrackTester> = Arc::new(reality());
        let cross_market: Arc<dyn TrackTester> = Arc::new(CrossMarketTester::new(
            reality(),
            settings.cross_market.clone(),
            settings.arena.min_sub_test_samples,
        ));

        Self::with_tracks(
            settings.arena.clone(),
            vec![reality_track.clone(), hell.clone(), cross_market],
            vec![reality_track, hell],
            events,
        )
    }

    /// Build an arena from explicit track sets
    pub fn with_tracks(
        config: ArenaConfig,
        factor_tracks: Vec<Arc<dyn TrackTester>>,
        strategy_tracks: Vec<Arc<dyn TrackTester>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let threshold = AtomicU64::new(config.pass_threshold.to_bits());
        Self {
            config,
            threshold,
            factor_tracks,
            strategy_tracks,
            events,
        }
    }

    pub fn threshold(&self) -> f64 {
        f64::from_bits(self.threshold.load(Ordering::Relaxed))
    }

    /// Change the pass threshold for subsequent runs
    pub fn set_threshold(&self, threshold: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Config(format!(
                "pass threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        info!("Arena pass threshold set to {:.3}", threshold);
        self.threshold.store(threshold.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn tracks_for(&self, kind: CandidateKind) -> &[Arc<dyn TrackTester>] {
        match kind {
            CandidateKind::Factor => &self.factor_tracks,
            CandidateKind::Strategy => &self.strategy_tracks,
        }
    }

    /// Reject inputs the tracks cannot work with
    pub fn validate(&self, candidate: &Candidate, data: &ArenaData) -> Result<()> {
        let min_samples = match candidate.kind {
            CandidateKind::Factor => self.config.min_factor_samples,
            CandidateKind::Strategy => self.config.min_strategy_samples,
        };
        data.primary
            .validate(min_samples)
            .map_err(|e| Error::validation(format!("{} {}: {}", candidate.kind, candidate.id, e)))?;

        if candidate.kind == CandidateKind::Factor {
            for (regime, slice) in &data.markets {
                slice.validate(self.config.min_sub_test_samples).map_err(|e| {
                    Error::validation(format!("{} market data: {}", regime.as_str(), e))
                })?;
            }
        }
        Ok(())
    }

    /// Run every applicable track on one candidate and render the verdict.
    ///
    /// Validation errors return before any track starts. Once past
    /// validation a complete result is always produced; a track whose task
    /// died contributes its neutral result.
    pub async fn test_candidate(
        &self,
        candidate: &mut Candidate,
        data: Arc<ArenaData>,
    ) -> Result<TestResult> {
        self.validate(candidate, &data)?;

        let started = Instant::now();
        info!("Arena: testing {} {} ({})", candidate.kind, candidate.id, candidate.name);

        let shared = Arc::new(candidate.clone());
        let tracks = self.tracks_for(candidate.kind);
        let tasks: Vec<_> = tracks
            .iter()
            .map(|track| {
                let track = track.clone();
                let candidate = shared.clone();
                let data = data.clone();
                tokio::task::spawn_blocking(move || track.test(&candidate, &data))
            })
            .collect();

        let joined = futures::future::join_all(tasks).await;
        let results: Vec<TrackResult> = joined
            .into_iter()
            .zip(tracks.iter())
            .map(|(joined, track)| match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(
                        "Arena: {} track task for {} failed: {}",
                        track.kind().as_str(),
                        candidate.id,
                        e
                    );
                    TrackResult::neutral(track.kind())
                }
            })
            .collect();

        let overall_score = self.aggregate(candidate.kind, &results);
        let threshold = self.threshold();
        let passed = overall_score > threshold && self.passes_strategy_gates(candidate.kind, &results);

        let mut detailed_metrics: BTreeMap<String, f64> =
            results.iter().flat_map(|r| r.metrics()).collect();
        detailed_metrics.insert("overall_score".to_string(), overall_score);

        candidate.tested = true;
        candidate.score = Some(overall_score);

        let elapsed = started.elapsed();
        let result = TestResult {
            candidate_id: candidate.id.clone(),
            candidate_kind: candidate.kind,
            tracks: results,
            overall_score,
            passed,
            threshold,
            tested_at: Utc::now(),
            elapsed_ms: elapsed.as_millis() as u64,
            detailed_metrics,
        };

        info!(
            "Arena: {} {} scored {:.3} (threshold {:.3}) -> {} in {}ms",
            candidate.kind,
            candidate.id,
            overall_score,
            threshold,
            if passed { "PASSED" } else { "FAILED" },
            result.elapsed_ms
        );

        let soft_target = match candidate.kind {
            CandidateKind::Factor => self.config.factor_soft_target_secs,
            CandidateKind::Strategy => self.config.strategy_soft_target_secs,
        };
        if over_soft_target(elapsed, soft_target) {
            warn!(
                "Arena: {} took {:.1}s, over the {}s target",
                candidate.id,
                elapsed.as_secs_f64(),
                soft_target
            );
        }

        self.publish(&result);
        Ok(result)
    }

    /// Test many candidates with bounded concurrency.
    ///
    /// Candidates that fail validation are logged and left out; the rest
    /// come back marked, in input order.
    pub async fn test_batch(
        self: &Arc<Self>,
        candidates: Vec<Candidate>,
        data: Arc<ArenaData>,
    ) -> Vec<(Candidate, TestResult)> {
        let total = candidates.len();
        let semaphore = Arc::new(Semaphore::new(self.config.batch_concurrency.max(1)));

        let mut handles = Vec::with_capacity(total);
        for mut candidate in candidates {
            let arena = self.clone();
            let data = data.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::validation(format!("batch admission closed: {}", e)))?;
                let result = arena.test_candidate(&mut candidate, data).await?;
                Ok::<_, Error>((candidate, result))
            }));
        }

        let mut tested = Vec::with_capacity(total);
        for handle in handles {
            match handle.await {
                Ok(Ok(pair)) => tested.push(pair),
                Ok(Err(e)) => warn!("Arena batch: candidate excluded: {}", e),
                Err(e) => warn!("Arena batch: candidate task failed: {}", e),
            }
        }

        info!(
            "Arena batch: {}/{} candidates tested, {} passed",
            tested.len(),
            total,
            tested.iter().filter(|(_, r)| r.passed).count()
        );
        tested
    }

    fn aggregate(&self, kind: CandidateKind, results: &[TrackResult]) -> f64 {
        match kind {
            CandidateKind::Factor => {
                let scores: Vec<f64> = results.iter().map(|r| r.score()).collect();
                if scores.is_empty() {
                    return 0.0;
                }
                stats::clamp01(stats::mean(&scores))
            }
            CandidateKind::Strategy => {
                let score_of = |kind: TrackKind| {
                    results
                        .iter()
                        .find(|r| r.kind() == kind)
                        .map(|r| r.score())
                        .unwrap_or(0.0)
                };
                stats::clamp01(
                    self.config.strategy_reality_weight * score_of(TrackKind::Reality)
                        + self.config.strategy_hell_weight * score_of(TrackKind::Hell),
                )
            }
        }
    }

    fn passes_strategy_gates(&self, kind: CandidateKind, results: &[TrackResult]) -> bool {
        if kind == CandidateKind::Factor {
            return true;
        }
        let reality = results.iter().find_map(|r| match r {
            TrackResult::Reality(r) => Some(r),
            _ => None,
        });
        match reality {
            Some(r) => {
                let ok = r.sharpe > self.config.strategy_min_sharpe
                    && r.max_drawdown < self.config.strategy_max_drawdown;
                if !ok {
                    debug!(
                        "Strategy gate: sharpe={:.2} (> {}) dd={:.3} (< {})",
                        r.sharpe,
                        self.config.strategy_min_sharpe,
                        r.max_drawdown,
                        self.config.strategy_max_drawdown
                    );
                }
                ok
            }
            None => false,
        }
    }

    fn publish(&self, result: &TestResult) {
        let kind = match result.candidate_kind {
            CandidateKind::Factor => EventKind::FactorTested,
            CandidateKind::Strategy => EventKind::StrategyTested,
        };
        let priority = if result.passed {
            EventPriority::High
        } else {
            EventPriority::Normal
        };
        let event = ArenaEvent::new(
            kind,
            "arena",
            serde_json::json!({
                "candidate_id": result.candidate_id,
                "overall_score": result.overall_score,
                "passed": result.passed,
                "threshold": result.threshold,
            }),
        )
        .with_priority(priority);

        if let Err(e) = self.events.publish(event) {
            warn!("Arena: could not publish result for {}: {}", result.candidate_id, e);
        }
    }
}

/// True only once a run has strictly exceeded its target
fn over_soft_target(elapsed: Duration, target_secs: u64) -> bool {
    elapsed.as_secs_f64() > target_secs as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventSink;
    use crate::market::{MarketFrame, MarketSlice, CLOSE, VOLUME};
    use crate::types::{HellResult, RealityResult};
    use chrono::Duration as ChronoDuration;

    struct FixedTrack {
        kind: TrackKind,
        score: f64,
    }

    impl TrackTester for FixedTrack {
        fn kind(&self) -> TrackKind {
            self.kind
        }

        fn test(&self, _candidate: &Candidate, _data: &ArenaData) -> TrackResult {
            match self.kind {
                TrackKind::Reality => TrackResult::Reality(RealityResult {
                    score: self.score,
                    sharpe: 2.0,
                    max_drawdown: 0.05,
                    ..Default::default()
                }),
                TrackKind::Hell => TrackResult::Hell(HellResult {
                    score: self.score,
                    ..Default::default()
                }),
                TrackKind::CrossMarket => {
                    let mut r = TrackResult::neutral(TrackKind::CrossMarket);
                    if let TrackResult::CrossMarket(cm) = &mut r {
                        cm.score = self.score;
                    }
                    r
                }
            }
        }
    }

    struct PanickingTrack;

    impl TrackTester for PanickingTrack {
        fn kind(&self) -> TrackKind {
            TrackKind::Hell
        }

        fn test(&self, _candidate: &Candidate, _data: &ArenaData) -> TrackResult {
            panic!("scenario blew up")
        }
    }

    fn fixed(kind: TrackKind, score: f64) -> Arc<dyn TrackTester> {
        Arc::new(FixedTrack { kind, score })
    }

    fn data(n: usize) -> Arc<ArenaData> {
        let t0 = Utc::now();
        let frame = MarketFrame::new((0..n).map(|i| t0 + ChronoDuration::days(i as i64)).collect())
            .with_column(CLOSE, (0..n).map(|i| 100.0 + i as f64).collect())
            .unwrap()
            .with_column(VOLUME, vec![1_000.0; n])
            .unwrap();
        Arc::new(ArenaData::new(MarketSlice::new(frame, vec![0.001; n])))
    }

    fn arena(factor: Vec<Arc<dyn TrackTester>>, strategy: Vec<Arc<dyn TrackTester>>) -> Arena {
        Arena::with_tracks(ArenaConfig::default(), factor, strategy, Arc::new(NullEventSink))
    }

    #[tokio::test]
    async fn test_factor_mean_aggregation() {
        let arena = arena(
            vec![
                fixed(TrackKind::Reality, 0.9),
                fixed(TrackKind::Hell, 0.6),
                fixed(TrackKind::CrossMarket, 0.9),
            ],
            vec![],
        );
        let mut c = Candidate::factor("f1", "mom", "momentum_5", "momentum");
        let r = arena.test_candidate(&mut c, data(120)).await.unwrap();

        assert!((r.overall_score - 0.8).abs() < 1e-12);
        assert!(r.passed);
        assert!(c.tested);
        assert_eq!(c.score, Some(r.overall_score));
        assert_eq!(r.tracks.len(), 3);
        assert!(r.detailed_metrics.contains_key("hell.score"));
    }

    #[tokio::test]
    async fn test_strategy_weighted_aggregation() {
        let arena = arena(
            vec![],
            vec![fixed(TrackKind::Reality, 1.0), fixed(TrackKind::Hell, 0.5)],
        );
        let mut c = Candidate::strategy("s1", "trend", "position:momentum_5", "trend");
        let r = arena.test_candidate(&mut c, data(120)).await.unwrap();
        assert!((r.overall_score - 0.8).abs() < 1e-12);
        assert!(r.passed);
    }

    #[tokio::test]
    async fn test_short_history_rejected_before_tracks() {
        let arena = arena(vec![fixed(TrackKind::Reality, 0.9)], vec![]);
        let mut c = Candidate::factor("f2", "mom", "momentum_5", "momentum");
        let err = arena.test_candidate(&mut c, data(99)).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!c.tested);
        assert_eq!(c.score, None);
    }

    #[tokio::test]
    async fn test_panicked_track_is_neutral() {
        let arena = arena(
            vec![fixed(TrackKind::Reality, 0.9), Arc::new(PanickingTrack)],
            vec![],
        );
        let mut c = Candidate::factor("f3", "mom", "momentum_5", "momentum");
        let r = arena.test_candidate(&mut c, data(120)).await.unwrap();
        assert_eq!(r.hell().unwrap().score, 0.5);
        assert!((r.overall_score - 0.7).abs() < 1e-12);
        // strictly greater than the threshold is required
        assert!(!r.passed);
    }

    #[test]
    fn test_soft_target_must_be_exceeded() {
        assert!(!over_soft_target(Duration::from_secs(30), 30));
        assert!(!over_soft_target(Duration::from_millis(29_999), 30));
        assert!(over_soft_target(Duration::from_millis(30_400), 30));
        assert!(over_soft_target(Duration::from_secs(61), 60));
    }

    #[tokio::test]
    async fn test_set_threshold_bounds() {
        let arena = arena(vec![], vec![]);
        assert_eq!(arena.threshold(), 0.7);
        arena.set_threshold(0.8).unwrap();
        assert_eq!(arena.threshold(), 0.8);
        assert!(arena.set_threshold(1.2).is_err());
        assert_eq!(arena.threshold(), 0.8);
    }
}
