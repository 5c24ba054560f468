//! Consumers of finished execution records.

use crate::errors::TapedeckError;
use crate::sink::{LogSink, SinkStatus};
use crate::tape::RecordTape;
use crate::task::record::ExecutionRecord;
use std::sync::{Arc, Mutex};

/// Receives each finished record once, after the run completes.
///
/// Errors are logged by the task and never reach the caller of the run.
pub trait ExecutionListener: Send + Sync {
    fn on_record(&self, record: &ExecutionRecord) -> Result<(), TapedeckError>;
}

impl<F> ExecutionListener for F
where
    F: Fn(&ExecutionRecord) -> Result<(), TapedeckError> + Send + Sync,
{
    fn on_record(&self, record: &ExecutionRecord) -> Result<(), TapedeckError> {
        self(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Pushes records into a shared tape, evicting the oldest entries first so
/// the tape never grows past `max_length`.
pub struct TapeListener {
    tape: Arc<Mutex<RecordTape>>,
    max_length: Option<usize>,
}

impl TapeListener {
    pub fn new(tape: Arc<Mutex<RecordTape>>) -> Self {
        Self {
            tape,
            max_length: None,
        }
    }

    /// A zero cap is treated as one.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length.max(1));
        self
    }
}

impl ExecutionListener for TapeListener {
    fn on_record(&self, record: &ExecutionRecord) -> Result<(), TapedeckError> {
        let mut tape = self
            .tape
            .lock()
            .map_err(|e| TapedeckError::Io(format!("tape lock poisoned: {e}")))?;
        if let Some(max) = self.max_length {
            while tape.len() >= max && tape.shift().is_some() {}
        }
        tape.push_record(record);
        Ok(())
    }
}

/// Forwards records to a [`LogSink`]; a rejection is reported as an error.
pub struct SinkListener<S> {
    sink: S,
}

impl<S: LogSink> SinkListener<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

impl<S: LogSink> ExecutionListener for SinkListener<S> {
    fn on_record(&self, record: &ExecutionRecord) -> Result<(), TapedeckError> {
        match self.sink.send_log(record)? {
            SinkStatus::Accepted => Ok(()),
            SinkStatus::Rejected { reason } => Err(TapedeckError::Sink(reason)),
        }
    }
}
