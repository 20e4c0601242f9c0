//! Stage runners - the work performed inside a pipeline stage

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use tokio::sync::RwLock;
use tracing::debug;

use super::ValidationStage;
use crate::arena::Arena;
use crate::error::{Error, Result};
use crate::types::{ArenaData, Candidate};

/// Executes one pipeline stage for an entity
#[async_trait::async_trait]
pub trait StageRunner: Send + Sync {
    fn stage(&self) -> ValidationStage;

    /// Stage payload on success; any error fails the stage
    async fn run(&self, entity_id: &str) -> anyhow::Result<serde_json::Value>;
}

/// Runs registered candidates through the arena as the factor or strategy
/// arena stage. A candidate that does not pass fails the stage.
pub struct ArenaStageRunner {
    stage: ValidationStage,
    arena: Arc<Arena>,
    data: Arc<ArenaData>,
    candidates: RwLock<HashMap<String, Candidate>>,
}

impl ArenaStageRunner {
    pub fn new(stage: ValidationStage, arena: Arc<Arena>, data: Arc<ArenaData>) -> Result<Self> {
        match stage {
            ValidationStage::FactorArena | ValidationStage::StrategyArena => Ok(Self {
                stage,
                arena,
                data,
                candidates: RwLock::new(HashMap::new()),
            }),
            other => Err(Error::Config(format!(
                "arena runner cannot serve the {} stage",
                other.as_str()
            ))),
        }
    }

    /// Register the candidate tested for `entity_id`
    pub async fn register(&self, entity_id: &str, candidate: Candidate) {
        self.candidates
            .write()
            .await
            .insert(entity_id.to_string(), candidate);
    }

    /// Current state of a registered candidate (marked once tested)
    pub async fn candidate(&self, entity_id: &str) -> Option<Candidate> {
        self.candidates.read().await.get(entity_id).cloned()
    }
}

#[async_trait::async_trait]
impl StageRunner for ArenaStageRunner {
    fn stage(&self) -> ValidationStage {
        self.stage
    }

    async fn run(&self, entity_id: &str) -> anyhow::Result<serde_json::Value> {
        let mut candidate = self
            .candidate(entity_id)
            .await
            .ok_or_else(|| anyhow!("no candidate registered for {}", entity_id))?;

        let result = self.arena.test_candidate(&mut candidate, self.data.clone()).await?;
        self.register(entity_id, candidate).await;

        debug!(
            "Arena stage {} for {}: score={:.3} passed={}",
            self.stage.as_str(),
            entity_id,
            result.overall_score,
            result.passed
        );
        if !result.passed {
            bail!(
                "scored {:.3}, not above threshold {:.3}",
                result.overall_score,
                result.threshold
            );
        }
        Ok(serde_json::to_value(&result)?)
    }
}
