//! File-backed log of execution records.
//!
//! The backing file is JSONL: one [`LogItem`] per line, each line followed by
//! a newline. A tape keeps the whole log in memory; `save` rewrites the file
//! from that list and `load` prepends the file's entries to it. Length is
//! bounded only by callers shifting before they push.

use crate::boundary::recording::CallRecord;
use crate::errors::TapedeckError;
use crate::logging::append_run_log;
use crate::task::record::{ExecutionRecord, RecordType};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// An execution record as stored on a tape, tagged with its task name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogItem {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    #[serde(default)]
    pub input: Value,
    /// `null` (and omitted on disk) for error entries.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub boundaries: BTreeMap<String, Vec<CallRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl LogItem {
    pub fn from_record(name: impl Into<String>, record: &ExecutionRecord) -> Self {
        let (output, error) = match record.record_type {
            RecordType::Success => (record.output.clone().unwrap_or(Value::Null), None),
            RecordType::Error => (Value::Null, record.error.clone()),
        };
        let boundaries = record
            .boundaries
            .iter()
            .map(|(name, calls)| {
                let calls = calls.iter().cloned().map(CallRecord::normalized).collect();
                (name.clone(), calls)
            })
            .collect();
        Self {
            name: name.into(),
            record_type: record.record_type,
            input: record.input.clone(),
            output,
            error,
            boundaries,
            context: None,
            metadata: record.metadata.clone(),
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RecordTape {
    path: PathBuf,
    log: VecDeque<LogItem>,
}

impl RecordTape {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            log: VecDeque::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Normalises `record` into a [`LogItem`] named `name` and appends it.
    pub fn push(&mut self, name: &str, record: &ExecutionRecord) -> &LogItem {
        self.append(LogItem::from_record(name, record))
    }

    /// Like [`RecordTape::push`], named after the record's own task.
    pub fn push_record(&mut self, record: &ExecutionRecord) -> &LogItem {
        self.append(LogItem::from_record(record.task_name.clone(), record))
    }

    /// Appends an already-shaped item under `name`.
    pub fn add_log_item(&mut self, name: &str, mut item: LogItem) -> &LogItem {
        item.name = name.to_string();
        self.append(item)
    }

    fn append(&mut self, item: LogItem) -> &LogItem {
        self.log.push_back(item);
        &self.log[self.log.len() - 1]
    }

    /// Entries oldest first.
    pub fn log(&self) -> &VecDeque<LogItem> {
        &self.log
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Removes and returns the oldest entry.
    pub fn shift(&mut self) -> Option<LogItem> {
        self.log.pop_front()
    }

    /// Reads the backing file and prepends its entries. A missing file
    /// contributes nothing. Returns the number of entries read.
    pub async fn load(&mut self) -> Result<usize, TapedeckError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(TapedeckError::Io(e.to_string())),
        };
        self.prepend(&text)
    }

    pub fn load_sync(&mut self) -> Result<usize, TapedeckError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(TapedeckError::Io(e.to_string())),
        };
        self.prepend(&text)
    }

    fn prepend(&mut self, text: &str) -> Result<usize, TapedeckError> {
        let loaded = parse_lines(text)?;
        let count = loaded.len();
        let mut log: VecDeque<LogItem> = loaded.into();
        log.append(&mut self.log);
        self.log = log;
        append_run_log(
            "debug",
            "tape.loaded",
            json!({"path": self.path.display().to_string(), "entries": count}),
        );
        Ok(count)
    }

    /// Overwrites the backing file with every in-memory entry.
    pub async fn save(&self) -> Result<(), TapedeckError> {
        let contents = self.stringify()?;
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|e| classify_write_error(&self.path, e))?;
        self.log_saved();
        Ok(())
    }

    pub fn save_sync(&self) -> Result<(), TapedeckError> {
        let contents = self.stringify()?;
        std::fs::write(&self.path, contents).map_err(|e| classify_write_error(&self.path, e))?;
        self.log_saved();
        Ok(())
    }

    fn log_saved(&self) {
        append_run_log(
            "debug",
            "tape.saved",
            json!({"path": self.path.display().to_string(), "entries": self.log.len()}),
        );
    }

    /// Exactly what `save` writes: one JSON object per line, each followed by `\n`.
    pub fn stringify(&self) -> Result<String, TapedeckError> {
        let mut out = String::new();
        for item in &self.log {
            let line =
                serde_json::to_string(item).map_err(|e| TapedeckError::Serialize(e.to_string()))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }
}

fn parse_lines(text: &str) -> Result<Vec<LogItem>, TapedeckError> {
    let mut items = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let item = serde_json::from_str(line).map_err(|e| TapedeckError::Parse {
            line: idx + 1,
            message: e.to_string(),
        })?;
        items.push(item);
    }
    Ok(items)
}

// The file itself is created on write, so NotFound means the folder is missing.
fn classify_write_error(path: &Path, err: std::io::Error) -> TapedeckError {
    if err.kind() == ErrorKind::NotFound {
        let folder = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        TapedeckError::FolderNotFound(folder.to_path_buf())
    } else {
        TapedeckError::Io(err.to_string())
    }
}
