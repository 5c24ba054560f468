use crate::boundary::recording::CallRecord;
use crate::tape::LogItem;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Success,
    Error,
}

impl RecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Snapshot of one task execution. Built once per run, never mutated after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub task_name: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Calls per boundary, in call order. Every declared boundary has an entry.
    pub boundaries: BTreeMap<String, Vec<CallRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl ExecutionRecord {
    pub fn is_success(&self) -> bool {
        self.record_type == RecordType::Success
    }

    pub fn calls(&self, boundary: &str) -> &[CallRecord] {
        self.boundaries
            .get(boundary)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl From<&LogItem> for ExecutionRecord {
    fn from(item: &LogItem) -> Self {
        let output = match item.record_type {
            RecordType::Success => Some(item.output.clone()),
            RecordType::Error => None,
        };
        Self {
            task_name: item.name.clone(),
            record_type: item.record_type,
            input: item.input.clone(),
            output,
            error: item.error.clone(),
            boundaries: item.boundaries.clone(),
            metadata: item.metadata.clone(),
            uuid: None,
        }
    }
}
