//! Market data frames consumed by the arena
//!
//! Historical data is supplied by an external collaborator. The core only
//! requires a `close` and a `volume` column plus an aligned forward-return
//! series; everything else is optional.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

pub const CLOSE: &str = "close";
pub const VOLUME: &str = "volume";

/// Columns every frame handed to the arena must carry
pub const REQUIRED_COLUMNS: [&str; 2] = [CLOSE, VOLUME];

/// Price candle as delivered by data retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Time-ordered table of named numeric columns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketFrame {
    timestamps: Vec<DateTime<Utc>>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl MarketFrame {
    pub fn new(timestamps: Vec<DateTime<Utc>>) -> Self {
        Self {
            timestamps,
            columns: BTreeMap::new(),
        }
    }

    /// Build a frame from candles, one row per candle
    pub fn from_candles(candles: &[Candle]) -> Self {
        let to_f64 = |d: Decimal| d.to_f64().unwrap_or(f64::NAN);

        let mut frame = Self::new(candles.iter().map(|c| c.timestamp).collect());
        frame.columns.insert("open".to_string(), candles.iter().map(|c| to_f64(c.open)).collect());
        frame.columns.insert("high".to_string(), candles.iter().map(|c| to_f64(c.high)).collect());
        frame.columns.insert("low".to_string(), candles.iter().map(|c| to_f64(c.low)).collect());
        frame.columns.insert(CLOSE.to_string(), candles.iter().map(|c| to_f64(c.close)).collect());
        frame.columns.insert(VOLUME.to_string(), candles.iter().map(|c| to_f64(c.volume)).collect());
        frame
    }

    /// Add a column, rejecting length mismatches
    pub fn with_column(mut self, name: &str, values: Vec<f64>) -> Result<Self> {
        self.insert_column(name, values)?;
        Ok(self)
    }

    pub fn insert_column(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        if values.len() != self.timestamps.len() {
            return Err(Error::validation(format!(
                "column '{}' has {} rows, frame has {}",
                name,
                values.len(),
                self.timestamps.len()
            )));
        }
        self.columns.insert(name.to_string(), values);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(|v| v.as_slice())
    }

    pub(crate) fn column_mut(&mut self, name: &str) -> Option<&mut Vec<f64>> {
        self.columns.get_mut(name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Names of required columns this frame is missing
    pub fn missing_columns(&self) -> Vec<&'static str> {
        REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| !self.has_column(c))
            .collect()
    }

    /// Last close as a decimal price, if representable
    pub fn last_close(&self) -> Option<Decimal> {
        self.column(CLOSE)
            .and_then(|c| c.last().copied())
            .filter(|v| v.is_finite())
            .and_then(Decimal::from_f64_retain)
    }
}

/// One market's history with its aligned forward returns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSlice {
    pub frame: MarketFrame,
    /// `returns[t]` is the return realised after row `t`
    pub returns: Vec<f64>,
}

impl MarketSlice {
    pub fn new(frame: MarketFrame, returns: Vec<f64>) -> Self {
        Self { frame, returns }
    }

    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    /// Check schema and alignment against a minimum row count
    pub fn validate(&self, min_samples: usize) -> Result<()> {
        let missing = self.frame.missing_columns();
        if !missing.is_empty() {
            return Err(Error::validation(format!(
                "missing required columns: {}",
                missing.join(", ")
            )));
        }
        if self.frame.len() != self.returns.len() {
            return Err(Error::validation(format!(
                "market data has {} rows but returns has {}",
                self.frame.len(),
                self.returns.len()
            )));
        }
        if self.frame.len() < min_samples {
            return Err(Error::validation(format!(
                "insufficient samples: {} < {}",
                self.frame.len(),
                min_samples
            )));
        }
        Ok(())
    }
}

/// Forward returns from a close series: `r[t] = close[t+1] / close[t] - 1`, last row NaN
pub fn forward_returns(close: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(close.len());
    for i in 0..close.len() {
        match close.get(i + 1) {
            Some(next) if close[i] != 0.0 => out.push(next / close[i] - 1.0),
            _ => out.push(f64::NAN),
        }
    }
    out
}
