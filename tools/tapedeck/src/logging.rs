use crate::errors::TapedeckError;
use crate::log_retention::prune_run_logs;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), TapedeckError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| TapedeckError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| TapedeckError::Serialize(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TapedeckError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| TapedeckError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| TapedeckError::Io(e.to_string()))?;

        prune_run_logs(&self.path, self.budget_bytes)?;

        Ok(())
    }
}

static RUN_LOGGER: OnceLock<Mutex<Option<Arc<JsonlLogger>>>> = OnceLock::new();

fn run_logger_slot() -> &'static Mutex<Option<Arc<JsonlLogger>>> {
    RUN_LOGGER.get_or_init(|| Mutex::new(None))
}

/// Route `append_run_log` events to `logger` until `clear_run_logger`.
pub fn init_run_logger(logger: JsonlLogger) {
    if let Ok(mut slot) = run_logger_slot().lock() {
        *slot = Some(Arc::new(logger));
    }
}

pub fn clear_run_logger() {
    if let Ok(mut slot) = run_logger_slot().lock() {
        *slot = None;
    }
}

/// Append one event to the run log. No-op when no logger is installed;
/// write failures are dropped.
pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let logger = match run_logger_slot().lock() {
        Ok(slot) => slot.clone(),
        Err(_) => return,
    };
    if let Some(logger) = logger {
        let _ = logger.append(&LogEvent {
            level,
            event_type,
            payload,
        });
    }
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

#[cfg(test)]
mod tests {
    use super::{truncate_json, JsonlLogger, LogEvent};
    use serde_json::json;

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.log");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 20;
        logger.budget_bytes = 1024;

        logger
            .append(&LogEvent {
                level: "info",
                event_type: "task.run.completed",
                payload: json!({"text": "abcdefghijklmnopqrstuvwxyz"}),
            })
            .expect("append");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"event_type\":\"task.run.completed\""));
        assert!(text.contains("..."));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let value = truncate_json(json!("ééééééééééé"), 8);
        let text = value.as_str().expect("string");
        assert!(text.ends_with("..."));
        assert!(text.len() <= 8);
    }

    #[test]
    fn budget_pruning_keeps_a_tape_saved_next_to_the_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tape = dir.path().join("tape.jsonl");
        std::fs::write(&tape, vec![b'x'; 400]).expect("tape");
        let mut logger = JsonlLogger::new(dir.path().join("run.jsonl"));
        logger.budget_bytes = 300;

        logger
            .append(&LogEvent {
                level: "info",
                event_type: "task.run.completed",
                payload: json!({"task": "double"}),
            })
            .expect("append");

        assert!(tape.exists());
        assert_eq!(std::fs::read(&tape).expect("read").len(), 400);
    }
}
