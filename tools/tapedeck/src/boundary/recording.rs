//! Serializable shapes for recorded boundary calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// One boundary invocation: positional arguments plus outcome.
///
/// `output` and `error` are always written (as `null` when absent) so every
/// entry in a tape has the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub input: Vec<Value>,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<CallTiming>,
}

impl CallRecord {
    pub fn succeeded(input: Vec<Value>, output: Value, timing: CallTiming) -> Self {
        Self {
            input,
            output,
            error: None,
            timing: Some(timing),
        }
    }

    pub fn failed(input: Vec<Value>, error: String, timing: CallTiming) -> Self {
        Self {
            input,
            output: Value::Null,
            error: Some(error),
            timing: Some(timing),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Errored calls never carry an output.
    pub fn normalized(mut self) -> Self {
        if self.error.is_some() {
            self.output = Value::Null;
        }
        self
    }
}

/// Wall-clock bounds of one call, in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallTiming {
    pub start_time: u64,
    pub end_time: u64,
    pub duration: u64,
}

impl CallTiming {
    pub fn between(start_time: u64, end_time: u64) -> Self {
        Self {
            start_time,
            end_time,
            duration: end_time.saturating_sub(start_time),
        }
    }
}

pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_output_and_error_serialize_as_null() {
        let call = CallRecord {
            input: vec![json!(1)],
            output: Value::Null,
            error: None,
            timing: None,
        };
        let rendered = serde_json::to_value(&call).expect("serialize");
        assert_eq!(rendered, json!({"input": [1], "output": null, "error": null}));
    }

    #[test]
    fn timing_uses_camel_case_keys() {
        let rendered = serde_json::to_value(CallTiming::between(10, 25)).expect("serialize");
        assert_eq!(rendered, json!({"startTime": 10, "endTime": 25, "duration": 15}));
    }

    #[test]
    fn normalized_drops_output_of_failed_call() {
        let mut call = CallRecord::failed(vec![], "boom".to_string(), CallTiming::between(0, 0));
        call.output = json!(5);
        assert_eq!(call.normalized().output, Value::Null);
    }
}
