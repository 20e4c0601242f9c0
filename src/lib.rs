//! Factor Arena Library
//!
//! Multi-track validation of trading factors and strategies, the staged
//! validation pipeline that promotes them, and the decision engine that
//! turns validated factors into trade recommendations.

pub mod arena;
pub mod config;
pub mod correlation;
pub mod decision;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod market;
pub mod pipeline;
pub mod scoring;
pub mod tracks;
pub mod types;

// Re-export main types for convenience
pub use arena::Arena;
pub use config::{
    ArenaConfig, CorrelationConfig, CrossMarketConfig, DecisionConfig, HellConfig, RealityConfig,
    ScoringConfig, Settings,
};
pub use correlation::{CorrelationAnalyzer, ScoredSeries};
pub use decision::{DecisionEngine, IntegratedFactor, MarketSnapshot, Recommendation, TradeAction};
pub use error::{Error, Result};
pub use evaluator::{BuiltinEvaluator, FactorEvaluator};
pub use events::{ArenaEvent, ChannelEventSink, EventKind, EventPriority, EventSink, NullEventSink};
pub use market::{Candle, MarketFrame, MarketSlice};
pub use pipeline::{
    ArenaStageRunner, PipelineManager, PipelineProgress, RunStatus, StageRunner, StageState,
    ValidationRecord, ValidationStage,
};
pub use scoring::{CorrelationMatrix, FactorHealth, ScoringEngine};
pub use tracks::{CrossMarketTester, HellTester, RealityTester, TrackTester};
pub use types::{
    ArenaData, Candidate, CandidateKind, MarketRegime, TestResult, TrackKind, TrackResult,
};
