//! Replay of recorded boundary calls by position.

use crate::boundary::recording::CallRecord;
use crate::errors::TaskError;
use crate::logging::append_run_log;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Immutable recorded sequence for one boundary plus a monotonic cursor.
///
/// Each call consumes the next entry, whatever its arguments; running past
/// the end fails with `ReplayExhausted` instead of inventing a value.
#[derive(Debug)]
pub struct ReplaySource {
    boundary: String,
    calls: Vec<CallRecord>,
    cursor: AtomicUsize,
}

impl ReplaySource {
    pub fn new(boundary: impl Into<String>, calls: Vec<CallRecord>) -> Self {
        Self {
            boundary: boundary.into(),
            calls,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Returns the recorded output at the cursor, or re-raises the recorded error.
    pub fn next(&self, args: &[Value]) -> Result<Value, TaskError> {
        let position = self.cursor.fetch_add(1, Ordering::SeqCst);
        let Some(call) = self.calls.get(position) else {
            return Err(TaskError::ReplayExhausted {
                boundary: self.boundary.clone(),
                position,
            });
        };
        if call.input.as_slice() != args {
            append_run_log(
                "warn",
                "boundary.replay.input_mismatch",
                json!({
                    "boundary": self.boundary,
                    "position": position,
                    "recorded": call.input,
                    "actual": args,
                }),
            );
        }
        match &call.error {
            Some(message) => Err(TaskError::Execution(message.clone())),
            None => Ok(call.output.clone()),
        }
    }

    pub fn consumed(&self) -> usize {
        self.cursor.load(Ordering::SeqCst).min(self.calls.len())
    }

    pub fn remaining(&self) -> usize {
        self.calls.len() - self.consumed()
    }
}

#[cfg(test)]
mod tests {
    use super::ReplaySource;
    use crate::boundary::recording::{CallRecord, CallTiming};
    use crate::errors::TaskError;
    use serde_json::json;

    fn recorded() -> Vec<CallRecord> {
        let timing = CallTiming::between(0, 1);
        vec![
            CallRecord::succeeded(vec![json!(5)], json!(10), timing),
            CallRecord::failed(vec![json!(-5)], "Value cannot be negative".to_string(), timing),
        ]
    }

    #[test]
    fn replays_outputs_then_errors_in_order() {
        let source = ReplaySource::new("fetchData", recorded());
        assert_eq!(source.next(&[json!(5)]), Ok(json!(10)));
        assert_eq!(
            source.next(&[json!(-5)]),
            Err(TaskError::Execution("Value cannot be negative".to_string()))
        );
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn fails_fast_past_the_end() {
        let source = ReplaySource::new("fetchData", recorded());
        let _ = source.next(&[]);
        let _ = source.next(&[]);
        assert_eq!(
            source.next(&[]),
            Err(TaskError::ReplayExhausted {
                boundary: "fetchData".to_string(),
                position: 2,
            })
        );
        assert_eq!(source.consumed(), 2);
    }

    #[test]
    fn cursor_advances_even_when_arguments_differ() {
        let source = ReplaySource::new("fetchData", recorded());
        assert_eq!(source.next(&[json!("other")]), Ok(json!(10)));
        assert_eq!(source.consumed(), 1);
    }
}
