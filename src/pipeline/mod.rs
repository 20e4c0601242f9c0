//! Validation Pipeline Manager
//!
//! Every entity walks the seven stages in a fixed order. A stage can start
//! only when it is the sole successor of the current stage and every earlier
//! stage is completed. A failed stage ends the run; the caller resubmits with
//! [`PipelineManager::start_pipeline`], which replaces the failed run.

pub mod runner;

pub use runner::{ArenaStageRunner, StageRunner};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{ArenaEvent, EventKind, EventPriority, EventSink, NullEventSink};

/// Pipeline stages in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Discovery,
    FactorArena,
    StrategyGeneration,
    StrategyArena,
    Simulation,
    Z2HCertification,
    StrategyLibrary,
}

impl ValidationStage {
    pub const ALL: [ValidationStage; 7] = [
        ValidationStage::Discovery,
        ValidationStage::FactorArena,
        ValidationStage::StrategyGeneration,
        ValidationStage::StrategyArena,
        ValidationStage::Simulation,
        ValidationStage::Z2HCertification,
        ValidationStage::StrategyLibrary,
    ];

    /// Position in the canonical order
    pub fn index(&self) -> usize {
        match self {
            ValidationStage::Discovery => 0,
            ValidationStage::FactorArena => 1,
            ValidationStage::StrategyGeneration => 2,
            ValidationStage::StrategyArena => 3,
            ValidationStage::Simulation => 4,
            ValidationStage::Z2HCertification => 5,
            ValidationStage::StrategyLibrary => 6,
        }
    }

    /// The single legal successor
    pub fn next(&self) -> Option<ValidationStage> {
        match self {
            ValidationStage::Discovery => Some(ValidationStage::FactorArena),
            ValidationStage::FactorArena => Some(ValidationStage::StrategyGeneration),
            ValidationStage::StrategyGeneration => Some(ValidationStage::StrategyArena),
            ValidationStage::StrategyArena => Some(ValidationStage::Simulation),
            ValidationStage::Simulation => Some(ValidationStage::Z2HCertification),
            ValidationStage::Z2HCertification => Some(ValidationStage::StrategyLibrary),
            ValidationStage::StrategyLibrary => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStage::Discovery => "discovery",
            ValidationStage::FactorArena => "factor_arena",
            ValidationStage::StrategyGeneration => "strategy_generation",
            ValidationStage::StrategyArena => "strategy_arena",
            ValidationStage::Simulation => "simulation",
            ValidationStage::Z2HCertification => "z2h_certification",
            ValidationStage::StrategyLibrary => "strategy_library",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One stage of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub stage: ValidationStage,
    pub state: StageState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ValidationRecord {
    fn started(stage: ValidationStage) -> Self {
        Self {
            stage,
            state: StageState::InProgress,
            started_at: Some(Utc::now()),
            finished_at: None,
            duration_ms: None,
            result: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Snapshot of an entity's pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineProgress {
    pub run_id: Uuid,
    pub entity_id: String,
    pub entity_type: String,
    /// Most recently started stage
    pub current_stage: Option<ValidationStage>,
    /// One record per started stage, appended in canonical order
    pub records: Vec<ValidationRecord>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
}

impl PipelineProgress {
    fn new(entity_id: &str, entity_type: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            entity_id: entity_id.to_string(),
            entity_type: entity_type.to_string(),
            current_stage: None,
            records: Vec::new(),
            status: RunStatus::Running,
            started_at: Utc::now(),
        }
    }

    /// Record of a stage, if it has been started in this run
    pub fn record(&self, stage: ValidationStage) -> Option<&ValidationRecord> {
        self.records.iter().find(|r| r.stage == stage)
    }

    fn record_mut(&mut self, stage: ValidationStage) -> Option<&mut ValidationRecord> {
        self.records.iter_mut().find(|r| r.stage == stage)
    }

    /// Pending unless the stage has a record
    pub fn stage_state(&self, stage: ValidationStage) -> StageState {
        self.record(stage).map_or(StageState::Pending, |r| r.state)
    }

    pub fn completed_stages(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.state == StageState::Completed)
            .count()
    }

    /// Completed stages over total stages, in [0, 1]
    pub fn completion_percentage(&self) -> f64 {
        self.completed_stages() as f64 / ValidationStage::ALL.len() as f64
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }

    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Tracks pipeline runs, one active run per entity
#[derive(Clone)]
pub struct PipelineManager {
    runs: Arc<RwLock<HashMap<String, PipelineProgress>>>,
    events: Arc<dyn EventSink>,
}

impl Default for PipelineManager {
    fn default() -> Self {
        Self::new(Arc::new(NullEventSink))
    }
}

impl PipelineManager {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Open a run for an entity. A failed run is replaced with a fresh one;
    /// a running or completed run is left alone and reported as an error.
    pub async fn start_pipeline(&self, entity_id: &str, entity_type: &str) -> Result<Uuid> {
        let mut runs = self.runs.write().await;
        if let Some(existing) = runs.get(entity_id) {
            if !existing.is_failed() {
                warn!("Pipeline: {} already has run {}", entity_id, existing.run_id);
                return Err(Error::StageTransition {
                    entity_id: entity_id.to_string(),
                    from: existing.current_stage,
                    to: ValidationStage::Discovery,
                    reason: format!("run {} is {:?}", existing.run_id, existing.status),
                });
            }
            info!("Pipeline: resubmitting {} after failed run {}", entity_id, existing.run_id);
        }

        let progress = PipelineProgress::new(entity_id, entity_type);
        let run_id = progress.run_id;
        runs.insert(entity_id.to_string(), progress);
        info!("Pipeline: started run {} for {} {}", run_id, entity_type, entity_id);
        Ok(run_id)
    }

    pub async fn start_stage(&self, entity_id: &str, stage: ValidationStage) -> Result<()> {
        let mut runs = self.runs.write().await;
        let progress = runs
            .get_mut(entity_id)
            .ok_or_else(|| transition_error(entity_id, None, stage, "no pipeline run"))?;

        if let Err(reason) = check_transition(progress, stage) {
            warn!(
                "Pipeline: rejected {:?} -> {:?} for {}: {}",
                progress.current_stage, stage, entity_id, reason
            );
            return Err(transition_error(entity_id, progress.current_stage, stage, &reason));
        }

        progress.records.push(ValidationRecord::started(stage));
        progress.current_stage = Some(stage);
        info!("Pipeline: {} entered {}", entity_id, stage.as_str());
        Ok(())
    }

    /// Close an in-progress stage with its result payload
    pub async fn complete_stage(
        &self,
        entity_id: &str,
        stage: ValidationStage,
        result: serde_json::Value,
    ) -> Result<()> {
        let duration_ms = {
            let mut runs = self.runs.write().await;
            let progress = runs
                .get_mut(entity_id)
                .ok_or_else(|| transition_error(entity_id, None, stage, "no pipeline run"))?;
            let current = progress.current_stage;
            let record = match progress.record_mut(stage) {
                Some(record) if record.state == StageState::InProgress => record,
                other => {
                    let state = other.map_or(StageState::Pending, |r| r.state);
                    return Err(transition_error(
                        entity_id,
                        current,
                        stage,
                        &format!("stage is {:?}, not in progress", state),
                    ));
                }
            };

            let now = Utc::now();
            let duration_ms = record
                .started_at
                .map(|s| (now - s).num_milliseconds().max(0) as u64)
                .unwrap_or(0);
            record.state = StageState::Completed;
            record.finished_at = Some(now);
            record.duration_ms = Some(duration_ms);
            record.result = Some(result);

            if stage.next().is_none() {
                progress.status = RunStatus::Completed;
                info!("Pipeline: {} reached {}", entity_id, stage.as_str());
            }
            duration_ms
        };

        info!("Pipeline: {} completed {} in {}ms", entity_id, stage.as_str(), duration_ms);
        self.notify(EventKind::StageCompleted, entity_id, stage, None);
        Ok(())
    }

    /// Close an in-progress stage as failed; the whole run fails with it
    pub async fn fail_stage(&self, entity_id: &str, stage: ValidationStage, error: &str) -> Result<()> {
        {
            let mut runs = self.runs.write().await;
            let progress = runs
                .get_mut(entity_id)
                .ok_or_else(|| transition_error(entity_id, None, stage, "no pipeline run"))?;
            let current = progress.current_stage;
            let record = match progress.record_mut(stage) {
                Some(record) if record.state == StageState::InProgress => record,
                other => {
                    let state = other.map_or(StageState::Pending, |r| r.state);
                    return Err(transition_error(
                        entity_id,
                        current,
                        stage,
                        &format!("stage is {:?}, not in progress", state),
                    ));
                }
            };

            let now = Utc::now();
            record.duration_ms = record
                .started_at
                .map(|s| (now - s).num_milliseconds().max(0) as u64);
            record.state = StageState::Failed;
            record.finished_at = Some(now);
            record.error = Some(error.to_string());
            progress.status = RunStatus::Failed;
        }

        warn!("Pipeline: {} failed {}: {}", entity_id, stage.as_str(), error);
        self.notify(EventKind::StageFailed, entity_id, stage, Some(error));
        Ok(())
    }

    pub async fn progress(&self, entity_id: &str) -> Option<PipelineProgress> {
        self.runs.read().await.get(entity_id).cloned()
    }

    /// Run one stage through its runner. The run lock is not held while the
    /// runner works.
    pub async fn execute_stage(
        &self,
        entity_id: &str,
        runner: &dyn StageRunner,
    ) -> Result<serde_json::Value> {
        let stage = runner.stage();
        self.start_stage(entity_id, stage).await?;

        match runner.run(entity_id).await {
            Ok(value) => {
                self.complete_stage(entity_id, stage, value.clone()).await?;
                Ok(value)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                self.fail_stage(entity_id, stage, &message).await?;
                Err(Error::StageExecution {
                    entity_id: entity_id.to_string(),
                    stage,
                    message,
                })
            }
        }
    }

    /// Drive an entity through the given runners in order, stopping at the
    /// first failure
    pub async fn run_pipeline(
        &self,
        entity_id: &str,
        runners: &[Arc<dyn StageRunner>],
    ) -> Result<PipelineProgress> {
        for runner in runners {
            self.execute_stage(entity_id, runner.as_ref()).await?;
        }
        self.progress(entity_id)
            .await
            .ok_or_else(|| Error::validation(format!("no pipeline run for {}", entity_id)))
    }

    fn notify(&self, kind: EventKind, entity_id: &str, stage: ValidationStage, error: Option<&str>) {
        let priority = if error.is_some() {
            EventPriority::High
        } else {
            EventPriority::Low
        };
        let event = ArenaEvent::new(
            kind,
            "pipeline",
            serde_json::json!({
                "entity_id": entity_id,
                "stage": stage.as_str(),
                "error": error,
            }),
        )
        .with_priority(priority);
        if let Err(e) = self.events.publish(event) {
            warn!("Pipeline: could not publish {} event: {}", kind.as_str(), e);
        }
    }
}

/// Legal iff `stage` is the sole successor of the current stage (or
/// Discovery on a fresh run) and every earlier stage is completed
fn check_transition(progress: &PipelineProgress, stage: ValidationStage) -> std::result::Result<(), String> {
    match progress.status {
        RunStatus::Running => {}
        RunStatus::Failed => return Err(format!("run {} has failed", progress.run_id)),
        RunStatus::Completed => return Err(format!("run {} is complete", progress.run_id)),
    }

    match progress.current_stage {
        None if stage != ValidationStage::Discovery => {
            return Err("a fresh run must start at discovery".to_string());
        }
        None => {}
        Some(current) => {
            if current.next() != Some(stage) {
                return Err(format!("{} is not the successor of {}", stage.as_str(), current.as_str()));
            }
        }
    }

    if let Some(unfinished) = ValidationStage::ALL[..stage.index()]
        .iter()
        .find(|s| progress.stage_state(**s) != StageState::Completed)
    {
        return Err(format!("{} is not completed", unfinished.as_str()));
    }
    Ok(())
}

fn transition_error(
    entity_id: &str,
    from: Option<ValidationStage>,
    to: ValidationStage,
    reason: &str,
) -> Error {
    Error::StageTransition {
        entity_id: entity_id.to_string(),
        from,
        to,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn walk_to(manager: &PipelineManager, entity: &str, last: ValidationStage) {
        for stage in ValidationStage::ALL.iter().take(last.index() + 1) {
            manager.start_stage(entity, *stage).await.unwrap();
            manager
                .complete_stage(entity, *stage, serde_json::json!({"ok": true}))
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_stage_order() {
        for (i, stage) in ValidationStage::ALL.iter().enumerate() {
            assert_eq!(stage.index(), i);
            assert_eq!(stage.next(), ValidationStage::ALL.get(i + 1).copied());
        }
    }

    #[tokio::test]
    async fn test_skipping_stages_rejected() {
        let manager = PipelineManager::default();
        manager.start_pipeline("f1", "factor").await.unwrap();
        walk_to(&manager, "f1", ValidationStage::Discovery).await;

        let err = manager
            .start_stage("f1", ValidationStage::Simulation)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::StageTransition {
                from: Some(ValidationStage::Discovery),
                to: ValidationStage::Simulation,
                ..
            }
        ));

        let progress = manager.progress("f1").await.unwrap();
        assert_eq!(progress.current_stage, Some(ValidationStage::Discovery));
        assert_eq!(progress.stage_state(ValidationStage::Simulation), StageState::Pending);
        assert!(progress.record(ValidationStage::Simulation).is_none());
        assert_eq!(progress.records.len(), 1);
    }

    #[tokio::test]
    async fn test_fresh_run_must_start_at_discovery() {
        let manager = PipelineManager::default();
        manager.start_pipeline("f2", "factor").await.unwrap();
        assert!(manager.start_stage("f2", ValidationStage::FactorArena).await.is_err());
        assert!(manager.start_stage("f2", ValidationStage::Discovery).await.is_ok());
        // successor cannot start while the current stage is still in progress
        assert!(manager.start_stage("f2", ValidationStage::FactorArena).await.is_err());
    }

    #[tokio::test]
    async fn test_full_walk_completes() {
        let manager = PipelineManager::default();
        manager.start_pipeline("s1", "strategy").await.unwrap();
        walk_to(&manager, "s1", ValidationStage::StrategyLibrary).await;

        let progress = manager.progress("s1").await.unwrap();
        assert!(progress.is_complete());
        assert_eq!(progress.completion_percentage(), 1.0);
        assert_eq!(progress.records.len(), ValidationStage::ALL.len());
        assert!(progress.records.iter().all(|r| r.duration_ms.is_some()));
        assert!(manager.start_pipeline("s1", "strategy").await.is_err());
    }

    #[tokio::test]
    async fn test_failure_is_terminal_until_resubmitted() {
        let manager = PipelineManager::default();
        let first = manager.start_pipeline("f3", "factor").await.unwrap();
        walk_to(&manager, "f3", ValidationStage::Discovery).await;
        manager.start_stage("f3", ValidationStage::FactorArena).await.unwrap();
        manager
            .fail_stage("f3", ValidationStage::FactorArena, "score below threshold")
            .await
            .unwrap();

        let progress = manager.progress("f3").await.unwrap();
        assert!(progress.is_failed());
        assert!((progress.completion_percentage() - 1.0 / 7.0).abs() < 1e-12);
        assert_eq!(
            progress.record(ValidationStage::FactorArena).unwrap().error.as_deref(),
            Some("score below threshold")
        );
        assert!(manager
            .start_stage("f3", ValidationStage::StrategyGeneration)
            .await
            .is_err());

        let second = manager.start_pipeline("f3", "factor").await.unwrap();
        assert_ne!(first, second);
        let progress = manager.progress("f3").await.unwrap();
        assert_eq!(progress.completed_stages(), 0);
        assert_eq!(progress.current_stage, None);
        assert!(progress.records.is_empty());
    }

    #[tokio::test]
    async fn test_records_grow_one_per_started_stage() {
        let manager = PipelineManager::default();
        manager.start_pipeline("f5", "factor").await.unwrap();
        assert!(manager.progress("f5").await.unwrap().records.is_empty());

        walk_to(&manager, "f5", ValidationStage::Discovery).await;
        manager.start_stage("f5", ValidationStage::FactorArena).await.unwrap();
        let progress = manager.progress("f5").await.unwrap();
        let stages: Vec<ValidationStage> = progress.records.iter().map(|r| r.stage).collect();
        assert_eq!(stages, vec![ValidationStage::Discovery, ValidationStage::FactorArena]);
        assert_eq!(progress.stage_state(ValidationStage::FactorArena), StageState::InProgress);

        // a rejected start appends nothing
        assert!(manager.start_stage("f5", ValidationStage::Simulation).await.is_err());
        assert_eq!(manager.progress("f5").await.unwrap().records.len(), 2);
    }

    #[tokio::test]
    async fn test_complete_requires_in_progress() {
        let manager = PipelineManager::default();
        manager.start_pipeline("f4", "factor").await.unwrap();
        assert!(manager
            .complete_stage("f4", ValidationStage::Discovery, serde_json::Value::Null)
            .await
            .is_err());
        assert!(manager.start_stage("unknown", ValidationStage::Discovery).await.is_err());
    }
}
