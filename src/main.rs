//! Factor Arena - demo run over a synthetic market
//!
//! 1. Builds a seeded synthetic history with one informative column
//! 2. Runs a batch of factor candidates through the arena
//! 3. Walks each candidate through discovery and the factor arena stage
//! 4. Feeds the survivors to the decision engine for one cycle

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use factor_arena::market::{forward_returns, CLOSE, VOLUME};
use factor_arena::{
    Arena, ArenaData, ArenaStageRunner, BuiltinEvaluator, Candidate, ChannelEventSink,
    DecisionEngine, FactorEvaluator, MarketFrame, MarketRegime, MarketSlice, MarketSnapshot,
    PipelineManager, Settings, StageRunner, ValidationStage,
};

/// Discovery is external; this runner only records what was submitted
struct DiscoveryRunner {
    formulas: BTreeMap<String, String>,
}

#[async_trait::async_trait]
impl StageRunner for DiscoveryRunner {
    fn stage(&self) -> ValidationStage {
        ValidationStage::Discovery
    }

    async fn run(&self, entity_id: &str) -> anyhow::Result<serde_json::Value> {
        let formula = self
            .formulas
            .get(entity_id)
            .ok_or_else(|| anyhow::anyhow!("{} was never discovered", entity_id))?;
        Ok(serde_json::json!({ "formula": formula }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting Factor Arena demo...");

    let config_path = std::env::var("ARENA_CONFIG").ok().map(PathBuf::from);
    let settings = Settings::load(config_path.as_deref())?;
    info!(
        "Pass threshold {:.2}, batch concurrency {}",
        settings.arena.pass_threshold, settings.arena.batch_concurrency
    );

    let evaluator: Arc<dyn FactorEvaluator> = Arc::new(BuiltinEvaluator::new());
    let (events, mut event_rx) = ChannelEventSink::new(64);
    let events = Arc::new(events);

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            info!("Event [{}] from {}: {}", event.kind.as_str(), event.source, event.payload);
        }
    });

    let mut rng = StdRng::seed_from_u64(7);
    let primary = synthetic_slice(&mut rng, 400, 0.004)?;
    let data = Arc::new(
        ArenaData::new(primary)
            .with_market(MarketRegime::Bull, synthetic_slice(&mut rng, 120, 0.004)?)
            .with_market(MarketRegime::HighVolatility, synthetic_slice(&mut rng, 120, 0.006)?),
    );

    let candidates = vec![
        Candidate::factor("flow", "Order flow", "column:flow", "microstructure"),
        Candidate::factor("mom_10", "Momentum 10", "momentum_10", "momentum"),
        Candidate::factor("rev_5", "Reversal 5", "reversal_5", "mean_reversion"),
        Candidate::factor("vol_20", "Volatility 20", "volatility_20", "volatility"),
    ];

    let arena = Arc::new(Arena::new(&settings, evaluator.clone(), events.clone()));
    let tested = arena.test_batch(candidates.clone(), data.clone()).await;
    for (candidate, result) in &tested {
        info!(
            "{:<8} score={:.3} passed={}",
            candidate.id, result.overall_score, result.passed
        );
    }

    let pipeline = PipelineManager::new(events.clone());
    let discovery: Arc<dyn StageRunner> = Arc::new(DiscoveryRunner {
        formulas: candidates
            .iter()
            .map(|c| (c.id.clone(), c.formula.clone()))
            .collect(),
    });
    let factor_stage = Arc::new(ArenaStageRunner::new(
        ValidationStage::FactorArena,
        arena.clone(),
        data.clone(),
    )?);
    let runners: Vec<Arc<dyn StageRunner>> = vec![discovery, factor_stage.clone()];

    let mut engine = DecisionEngine::new(
        settings.decision.clone(),
        settings.scoring.min_samples,
        evaluator.clone(),
    );

    for candidate in &candidates {
        pipeline.start_pipeline(&candidate.id, "factor").await?;
        factor_stage.register(&candidate.id, candidate.clone()).await;

        match pipeline.run_pipeline(&candidate.id, &runners).await {
            Ok(progress) => {
                info!(
                    "{} reached {:?} ({:.0}% complete)",
                    candidate.id,
                    progress.current_stage,
                    progress.completion_percentage() * 100.0
                );
                let result = tested.iter().find(|(c, _)| c.id == candidate.id);
                if let Some((tested_candidate, result)) = result {
                    if let Err(e) = engine.integrate(tested_candidate, result) {
                        warn!("Not integrated: {}", e);
                    }
                }
            }
            Err(e) => warn!("{} stopped: {}", candidate.id, e),
        }
    }

    let mut snapshot = MarketSnapshot::new(Utc::now());
    for i in 0..6 {
        let slice = synthetic_slice(&mut rng, 80, 0.004)?;
        snapshot = snapshot.with_instrument(&format!("SYN{}", i), slice.frame);
    }
    let snapshot = snapshot.with_holding("SYN0");

    let recommendations = engine.generate_recommendations(&snapshot);
    if recommendations.is_empty() {
        info!("No recommendations this cycle");
    }
    for rec in &recommendations {
        info!(
            "{} {} weight={:.3} confidence={:.2} ({})",
            rec.action.as_str(),
            rec.instrument,
            rec.target_weight,
            rec.confidence,
            rec.reason
        );
    }

    Ok(())
}

/// Random-walk prices whose next return partly follows the `flow` column
fn synthetic_slice(rng: &mut StdRng, n: usize, noise: f64) -> anyhow::Result<MarketSlice> {
    let t0 = Utc::now() - Duration::days(n as i64);
    let flow: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let mut close = Vec::with_capacity(n);
    let mut price = 100.0;
    for i in 0..n {
        close.push(price);
        let drift = 0.003 * flow[i];
        price *= 1.0 + drift + rng.gen_range(-noise..noise);
    }
    let volume: Vec<f64> = (0..n).map(|_| rng.gen_range(5_000.0..15_000.0)).collect();

    let returns = forward_returns(&close);
    let frame = MarketFrame::new((0..n).map(|i| t0 + Duration::days(i as i64)).collect())
        .with_column(CLOSE, close)?
        .with_column(VOLUME, volume)?
        .with_column("flow", flow)?;
    Ok(MarketSlice::new(frame, returns))
}
