//! Remote log shipping seam.
//!
//! The engine never talks to the network. A [`LogSink`] is injected into a
//! [`crate::task::listener::SinkListener`], which forwards each finished
//! record to it.

use crate::errors::TapedeckError;
use crate::task::record::ExecutionRecord;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkStatus {
    Accepted,
    Rejected { reason: String },
}

pub trait LogSink: Send + Sync {
    fn send_log(&self, record: &ExecutionRecord) -> Result<SinkStatus, TapedeckError>;
}

impl<S: LogSink + ?Sized> LogSink for Arc<S> {
    fn send_log(&self, record: &ExecutionRecord) -> Result<SinkStatus, TapedeckError> {
        (**self).send_log(record)
    }
}

/// Keeps every record it is sent. Optionally rejects them all.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<ExecutionRecord>>,
    reject_with: Option<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            reject_with: Some(reason.into()),
        }
    }

    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl LogSink for MemorySink {
    fn send_log(&self, record: &ExecutionRecord) -> Result<SinkStatus, TapedeckError> {
        if let Some(reason) = &self.reject_with {
            return Ok(SinkStatus::Rejected {
                reason: reason.clone(),
            });
        }
        self.records
            .lock()
            .map_err(|e| TapedeckError::Sink(e.to_string()))?
            .push(record.clone());
        Ok(SinkStatus::Accepted)
    }
}
