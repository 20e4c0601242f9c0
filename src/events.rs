//! Arena event notification
//!
//! Only the publishing side lives here. Delivery is best effort: callers log
//! a failed publish and carry on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    FactorTested,
    StrategyTested,
    StageCompleted,
    StageFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::FactorTested => "factor_tested",
            EventKind::StrategyTested => "strategy_tested",
            EventKind::StageCompleted => "stage_completed",
            EventKind::StageFailed => "stage_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaEvent {
    pub kind: EventKind,
    pub source: String,
    pub payload: serde_json::Value,
    pub priority: EventPriority,
    pub timestamp: DateTime<Utc>,
}

impl ArenaEvent {
    pub fn new(kind: EventKind, source: &str, payload: serde_json::Value) -> Self {
        Self {
            kind,
            source: source.to_string(),
            payload,
            priority: EventPriority::Normal,
            timestamp: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Destination for arena events. Must not block.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ArenaEvent) -> Result<()>;
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn publish(&self, _event: ArenaEvent) -> Result<()> {
        Ok(())
    }
}

/// Bounded queue sink; a full or closed queue is reported as an error
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<ArenaEvent>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ArenaEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn publish(&self, event: ArenaEvent) -> Result<()> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(ev) => {
                Error::Publish(format!("queue full, dropped {}", ev.kind.as_str()))
            }
            mpsc::error::TrySendError::Closed(ev) => {
                Error::Publish(format!("queue closed, dropped {}", ev.kind.as_str()))
            }
        })
    }
}
