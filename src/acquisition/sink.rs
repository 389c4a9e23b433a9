//! # Series Sink
//!
//! Append-only destination for acquired series. The acquisition worker is the
//! only writer; any number of readers may take snapshots while it runs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::Serialize;

use crate::decoder::SeriesContext;
use crate::error::{GathererError, Result};

/// Handle of a series created by a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SeriesId(pub u64);

/// Storage for acquired series
pub trait SeriesSink: Send {
    /// Open a new series
    ///
    /// # Arguments
    ///
    /// * `sequence` - 1-based series number within the session
    /// * `context` - Device context every sample of the series shares
    fn create_series(&mut self, sequence: u32, context: &SeriesContext) -> Result<SeriesId>;

    /// Append one sample at `offset` from the series' first sample
    fn append(&mut self, id: SeriesId, values: &[f64], offset: Duration) -> Result<()>;

    /// Close a series and keep its samples
    fn finalize(&mut self, id: SeriesId) -> Result<()>;

    /// Close a series and drop it
    fn discard(&mut self, id: SeriesId) -> Result<()>;
}

/// Series label shown to users, e.g. `"3) charge"`
pub fn series_label(sequence: u32, context: &SeriesContext) -> String {
    format!("{}) {}", sequence, context.mode)
}

/// One stored sample
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub values: Vec<f64>,
    pub offset: Duration,
}

/// Whether a series still receives samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesStatus {
    Open,
    Finalized,
}

/// A series held by [`MemorySeriesSink`]
#[derive(Debug, Clone)]
pub struct SeriesRecord {
    pub id: SeriesId,
    pub sequence: u32,
    pub label: String,
    pub context: SeriesContext,
    pub created_at: DateTime<Local>,
    pub status: SeriesStatus,
    pub samples: Vec<Sample>,
}

impl SeriesRecord {
    /// Duration covered by the samples
    pub fn span(&self) -> Duration {
        self.samples.last().map(|s| s.offset).unwrap_or_default()
    }

    pub fn summary(&self) -> SeriesSummary {
        SeriesSummary {
            label: self.label.clone(),
            channel: self.context.channel,
            mode: self.context.mode.clone(),
            created_at: self.created_at.to_rfc3339(),
            status: self.status,
            samples: self.samples.len(),
            span_ms: self.span().as_millis() as u64,
        }
    }
}

/// Serializable overview of a series
#[derive(Debug, Clone, Serialize)]
pub struct SeriesSummary {
    pub label: String,
    pub channel: u32,
    pub mode: String,
    pub created_at: String,
    pub status: SeriesStatus,
    pub samples: usize,
    pub span_ms: u64,
}

#[derive(Debug, Default)]
struct SinkState {
    next_id: u64,
    series: BTreeMap<SeriesId, SeriesRecord>,
}

/// In-memory sink shared between the worker and readers
#[derive(Debug, Clone, Default)]
pub struct MemorySeriesSink {
    state: Arc<RwLock<SinkState>>,
}

impl MemorySeriesSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored series, oldest first
    pub fn snapshot(&self) -> Vec<SeriesRecord> {
        self.state.read().series.values().cloned().collect()
    }

    /// Copy of the finalized series, oldest first
    pub fn finalized(&self) -> Vec<SeriesRecord> {
        self.state
            .read()
            .series
            .values()
            .filter(|s| s.status == SeriesStatus::Finalized)
            .cloned()
            .collect()
    }

    pub fn summaries(&self) -> Vec<SeriesSummary> {
        self.state.read().series.values().map(SeriesRecord::summary).collect()
    }

    fn with_open<F>(&self, id: SeriesId, f: F) -> Result<()>
    where
        F: FnOnce(&mut SeriesRecord),
    {
        let mut state = self.state.write();
        match state.series.get_mut(&id) {
            Some(series) if series.status == SeriesStatus::Open => {
                f(series);
                Ok(())
            }
            Some(_) => Err(GathererError::Sink(format!("series {} is already finalized", id.0))),
            None => Err(GathererError::Sink(format!("unknown series {}", id.0))),
        }
    }
}

impl SeriesSink for MemorySeriesSink {
    fn create_series(&mut self, sequence: u32, context: &SeriesContext) -> Result<SeriesId> {
        let mut state = self.state.write();
        state.next_id += 1;
        let id = SeriesId(state.next_id);

        state.series.insert(
            id,
            SeriesRecord {
                id,
                sequence,
                label: series_label(sequence, context),
                context: context.clone(),
                created_at: Local::now(),
                status: SeriesStatus::Open,
                samples: Vec::new(),
            },
        );
        Ok(id)
    }

    fn append(&mut self, id: SeriesId, values: &[f64], offset: Duration) -> Result<()> {
        self.with_open(id, |series| {
            series.samples.push(Sample {
                values: values.to_vec(),
                offset,
            })
        })
    }

    fn finalize(&mut self, id: SeriesId) -> Result<()> {
        self.with_open(id, |series| series.status = SeriesStatus::Finalized)
    }

    fn discard(&mut self, id: SeriesId) -> Result<()> {
        match self.state.write().series.remove(&id) {
            Some(_) => Ok(()),
            None => Err(GathererError::Sink(format!("unknown series {}", id.0))),
        }
    }
}
