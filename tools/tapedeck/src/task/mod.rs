//! Tasks: a validated input contract, named boundaries, and one handler.
//!
//! Every `run`/`safe_run` goes through the same pipeline:
//!
//! 1. validate the input (rejections become an error record, no boundary runs)
//! 2. start a fresh recording on every boundary
//! 3. await the handler with the validated input and the boundary handles;
//!    a panic in the handler or a boundary becomes an execution error
//! 4. stop recording on every exit path and collect the calls
//! 5. assemble the [`ExecutionRecord`] and notify listeners in order
//!
//! Recordings are scoped to the invocation, so overlapping runs on one task
//! each get their own calls.

pub mod listener;
pub mod record;

use crate::boundary::recording::CallRecord;
use crate::boundary::{boundary_fn, Boundaries, Boundary, BoundaryMode, RecordingSet};
use crate::errors::{TaskError, ValidationError};
use crate::logging::append_run_log;
use crate::schema::{Field, Schema};
use futures::future::BoxFuture;
use futures::FutureExt;
use listener::{ExecutionListener, ListenerId};
use record::{ExecutionRecord, RecordType};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub type HandlerFuture = BoxFuture<'static, Result<Value, TaskError>>;
pub type HandlerFn = Arc<dyn Fn(Value, Boundaries) -> HandlerFuture + Send + Sync>;

/// Per-boundary behaviour for a replay. Unlisted boundaries proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default)]
    pub boundaries: BTreeMap<String, BoundaryMode>,
}

impl ReplayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replay(mut self, boundary: impl Into<String>) -> Self {
        self.boundaries.insert(boundary.into(), BoundaryMode::Replay);
        self
    }

    pub fn proxy(mut self, boundary: impl Into<String>) -> Self {
        self.boundaries.insert(boundary.into(), BoundaryMode::Proxy);
        self
    }

    pub fn mode(&self, boundary: &str) -> BoundaryMode {
        self.boundaries.get(boundary).copied().unwrap_or_default()
    }
}

/// Result of a `safe_run` or `safe_replay`: exactly one of `output` and
/// `error` is set, and `record` is always present.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub output: Option<Value>,
    pub error: Option<TaskError>,
    pub record: ExecutionRecord,
}

impl RunOutcome {
    pub fn into_parts(self) -> (Option<Value>, Option<TaskError>, ExecutionRecord) {
        (self.output, self.error, self.record)
    }

    pub fn into_result(self) -> Result<Value, TaskError> {
        match (self.output, self.error) {
            (_, Some(err)) => Err(err),
            (output, None) => Ok(output.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input: BTreeMap<String, Field>,
    pub boundaries: Vec<String>,
}

pub struct Task {
    name: String,
    description: Option<String>,
    schema: Schema,
    boundaries: BTreeMap<String, Boundary>,
    handler: HandlerFn,
    listeners: Vec<(ListenerId, Arc<dyn ExecutionListener>)>,
    next_listener_id: u64,
    metadata: Option<Value>,
}

impl Task {
    pub fn new<H, Fut>(name: impl Into<String>, schema: Schema, handler: H) -> Self
    where
        H: Fn(Value, Boundaries) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            schema,
            boundaries: BTreeMap::new(),
            handler: Arc::new(move |input, boundaries| handler(input, boundaries).boxed()),
            listeners: Vec::new(),
            next_listener_id: 0,
            metadata: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declares a boundary. A later boundary with the same name replaces it.
    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundaries.insert(boundary.name().to_string(), boundary);
        self
    }

    /// Attached to every record this task produces.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn boundary_names(&self) -> impl Iterator<Item = &str> {
        self.boundaries.keys().map(String::as_str)
    }

    pub fn describe(&self) -> TaskDescriptor {
        TaskDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input: self.schema.describe(),
            boundaries: self.boundaries.keys().cloned().collect(),
        }
    }

    /// Listeners run in registration order after each `run`/`safe_run`.
    pub fn add_listener(&mut self, listener: impl ExecutionListener + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub fn mock_boundary<F, Fut>(&mut self, name: &str, mock: F) -> Result<(), TaskError>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        let boundary = self
            .boundaries
            .get_mut(name)
            .ok_or_else(|| TaskError::HandlerNotFound(name.to_string()))?;
        boundary.set_mock(boundary_fn(mock));
        Ok(())
    }

    pub fn reset_mocks(&mut self) {
        for boundary in self.boundaries.values_mut() {
            boundary.reset_mock();
        }
    }

    /// Schema check only: no handler, no recording, no listeners.
    pub fn is_valid(&self, input: &Value) -> bool {
        self.validate(self.normalize_input(input.clone())).is_ok()
    }

    pub async fn run(&self, input: Value) -> Result<Value, TaskError> {
        self.safe_run(input).await.into_result()
    }

    pub async fn safe_run(&self, input: Value) -> RunOutcome {
        let input = self.normalize_input(input);
        let outcome = match self.validate(input.clone()) {
            Ok(validated) => self.execute(validated, |_| None).await,
            Err(err) => self.rejected(input, err.into()),
        };
        append_run_log(
            "info",
            "task.run.completed",
            json!({
                "task": self.name,
                "type": outcome.record.record_type.as_str(),
                "uuid": outcome.record.uuid,
                "calls": call_counts(&outcome.record),
            }),
        );
        self.notify(&outcome.record);
        outcome
    }

    /// Re-runs the handler on `prior.input` without re-validating it.
    pub async fn replay(
        &self,
        prior: &ExecutionRecord,
        config: &ReplayConfig,
    ) -> Result<Value, TaskError> {
        self.safe_replay(prior, config).await.into_result()
    }

    /// Boundaries set to `replay` return `prior`'s recorded calls in order;
    /// the rest run live. Listeners are not notified.
    pub async fn safe_replay(&self, prior: &ExecutionRecord, config: &ReplayConfig) -> RunOutcome {
        let unknown = config
            .boundaries
            .keys()
            .find(|name| !self.boundaries.contains_key(name.as_str()));
        let outcome = match unknown {
            Some(name) => self.rejected(
                prior.input.clone(),
                TaskError::HandlerNotFound(name.clone()),
            ),
            None => {
                self.execute(prior.input.clone(), |name| match config.mode(name) {
                    BoundaryMode::Replay => Some(prior.calls(name).to_vec()),
                    BoundaryMode::Proxy => None,
                })
                .await
            }
        };
        append_run_log(
            "info",
            "task.replay.completed",
            json!({
                "task": self.name,
                "type": outcome.record.record_type.as_str(),
                "replayed_from": prior.uuid,
                "calls": call_counts(&outcome.record),
            }),
        );
        outcome
    }

    fn normalize_input(&self, input: Value) -> Value {
        if input.is_null() && self.schema.is_empty() {
            json!({})
        } else {
            input
        }
    }

    fn validate(&self, input: Value) -> Result<Value, ValidationError> {
        self.schema
            .validate(&input)
            .map_err(|violations| ValidationError { violations })
    }

    async fn execute(
        &self,
        input: Value,
        replay: impl FnMut(&str) -> Option<Vec<CallRecord>>,
    ) -> RunOutcome {
        let recordings = RecordingSet::start(self.boundaries.values(), replay);
        let handler = AssertUnwindSafe(async {
            (self.handler)(input.clone(), recordings.boundaries()).await
        });
        let result = match handler.catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(TaskError::Execution(format!(
                "handler panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };
        let calls = recordings.finish();
        match result {
            Ok(output) => RunOutcome {
                record: self.record(RecordType::Success, input, Some(output.clone()), None, calls),
                output: Some(output),
                error: None,
            },
            Err(err) => RunOutcome {
                record: self.record(RecordType::Error, input, None, Some(err.to_string()), calls),
                output: None,
                error: Some(err),
            },
        }
    }

    /// Outcome for a run stopped before any boundary could execute.
    fn rejected(&self, input: Value, err: TaskError) -> RunOutcome {
        let calls = self
            .boundaries
            .keys()
            .map(|name| (name.clone(), Vec::new()))
            .collect();
        RunOutcome {
            record: self.record(RecordType::Error, input, None, Some(err.to_string()), calls),
            output: None,
            error: Some(err),
        }
    }

    fn record(
        &self,
        record_type: RecordType,
        input: Value,
        output: Option<Value>,
        error: Option<String>,
        boundaries: BTreeMap<String, Vec<CallRecord>>,
    ) -> ExecutionRecord {
        ExecutionRecord {
            task_name: self.name.clone(),
            record_type,
            input,
            output,
            error,
            boundaries,
            metadata: self.metadata.clone(),
            uuid: Some(uuid::Uuid::new_v4().to_string()),
        }
    }

    fn notify(&self, record: &ExecutionRecord) {
        for (id, listener) in &self.listeners {
            let failure = match catch_unwind(AssertUnwindSafe(|| listener.on_record(record))) {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(_) => "listener panicked".to_string(),
            };
            append_run_log(
                "warn",
                "task.listener.failed",
                json!({"task": self.name, "listener": id.0, "error": failure}),
            );
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn call_counts(record: &ExecutionRecord) -> BTreeMap<&str, usize> {
    record
        .boundaries
        .iter()
        .map(|(name, calls)| (name.as_str(), calls.len()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TapedeckError;
    use std::sync::Mutex;
    use std::time::Duration;

    fn echo_task() -> Task {
        Task::new("echo", Schema::new(), |input, _b| async move { Ok(input) })
            .with_boundary(Boundary::new("noop", |_args| async { Ok(Value::Null) }))
    }

    #[tokio::test]
    async fn empty_schema_turns_absent_input_into_empty_object() {
        let task = echo_task();
        let outcome = task.safe_run(Value::Null).await;
        assert_eq!(outcome.record.input, json!({}));
        assert_eq!(outcome.output, Some(json!({})));
        let outcome = task.safe_run(json!({})).await;
        assert_eq!(outcome.record.input, json!({}));
    }

    #[tokio::test]
    async fn listeners_run_in_order_and_failures_are_isolated() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut task = echo_task();
        let first = Arc::clone(&seen);
        task.add_listener(move |_r: &ExecutionRecord| -> Result<(), TapedeckError> {
            first.lock().expect("lock").push("first");
            Err(TapedeckError::Sink("down".to_string()))
        });
        let panicking = task.add_listener(|_r: &ExecutionRecord| -> Result<(), TapedeckError> {
            panic!("listener bug")
        });
        let second = Arc::clone(&seen);
        task.add_listener(move |_r: &ExecutionRecord| -> Result<(), TapedeckError> {
            second.lock().expect("lock").push("second");
            Ok(())
        });

        assert_eq!(task.run(json!({})).await, Ok(json!({})));
        assert_eq!(*seen.lock().expect("lock"), vec!["first", "second"]);

        assert!(task.remove_listener(panicking));
        assert!(!task.remove_listener(panicking));
    }

    #[tokio::test]
    async fn listener_failures_are_written_to_the_run_log() {
        use crate::logging::{clear_run_logger, init_run_logger, JsonlLogger};

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.log");
        init_run_logger(JsonlLogger::new(&path));
        let mut task = echo_task();
        task.add_listener(|_r: &ExecutionRecord| -> Result<(), TapedeckError> {
            Err(TapedeckError::Sink("collector offline".to_string()))
        });
        task.safe_run(json!({})).await;
        clear_run_logger();

        let text = std::fs::read_to_string(&path).expect("read run log");
        assert!(text.contains("\"event_type\":\"task.listener.failed\""));
        assert!(text.contains("collector offline"));
    }

    #[tokio::test]
    async fn panicking_boundary_becomes_an_error_record() {
        let notified = Arc::new(Mutex::new(0));
        let mut task = Task::new("index", Schema::new(), |_input, b| async move {
            b.call("first", vec![]).await
        })
        .with_boundary(Boundary::new("first", |args| async move { Ok(args[0].clone()) }));
        let counter = Arc::clone(&notified);
        task.add_listener(move |r: &ExecutionRecord| -> Result<(), TapedeckError> {
            assert_eq!(r.record_type, RecordType::Error);
            *counter.lock().expect("lock") += 1;
            Ok(())
        });

        let outcome = task.safe_run(Value::Null).await;
        assert_eq!(outcome.record.record_type, RecordType::Error);
        assert!(outcome.output.is_none());
        match outcome.error {
            Some(TaskError::Execution(message)) => {
                assert!(message.starts_with("handler panicked: "), "{message}")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(outcome
            .record
            .error
            .as_deref()
            .is_some_and(|e| e.contains("handler panicked")));
        assert_eq!(*notified.lock().expect("lock"), 1);
    }

    #[tokio::test]
    async fn replay_does_not_notify_listeners() {
        let count = Arc::new(Mutex::new(0));
        let mut task = echo_task();
        let counter = Arc::clone(&count);
        task.add_listener(move |_r: &ExecutionRecord| -> Result<(), TapedeckError> {
            *counter.lock().expect("lock") += 1;
            Ok(())
        });
        let outcome = task.safe_run(json!({})).await;
        task.safe_replay(&outcome.record, &ReplayConfig::new()).await;
        assert_eq!(*count.lock().expect("lock"), 1);
    }

    #[tokio::test]
    async fn unknown_replay_boundary_fails_before_handler_runs() {
        let task = echo_task();
        let prior = task.safe_run(json!({})).await.record;
        let outcome = task
            .safe_replay(&prior, &ReplayConfig::new().replay("missing"))
            .await;
        assert_eq!(
            outcome.error,
            Some(TaskError::HandlerNotFound("missing".to_string()))
        );
        assert_eq!(outcome.record.record_type, RecordType::Error);
        assert_eq!(outcome.record.input, prior.input);
        assert!(outcome.record.calls("noop").is_empty());
    }

    #[tokio::test]
    async fn mock_boundary_rejects_unknown_names() {
        let mut task = echo_task();
        assert_eq!(
            task.mock_boundary("missing", |_args| async { Ok(Value::Null) }),
            Err(TaskError::HandlerNotFound("missing".to_string()))
        );
    }

    #[tokio::test]
    async fn overlapping_runs_keep_separate_tapes() {
        let task = Task::new(
            "slow",
            Schema::new().field("id", Field::integer()),
            |input, b| async move {
                let id = input["id"].clone();
                b.call("wait", vec![id.clone()]).await?;
                b.call("wait", vec![id.clone()]).await?;
                Ok(id)
            },
        )
        .with_boundary(Boundary::new("wait", |args: Vec<Value>| async move {
            let ms = args.first().and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(Value::Null)
        }));

        let (a, b) = tokio::join!(task.safe_run(json!({"id": 5})), task.safe_run(json!({"id": 1})));
        for (outcome, id) in [(a, 5), (b, 1)] {
            let calls = outcome.record.calls("wait");
            assert_eq!(calls.len(), 2);
            assert!(calls.iter().all(|c| c.input == vec![json!(id)]));
        }
    }

    #[test]
    fn describe_lists_input_fields_and_boundaries() {
        let task = Task::new(
            "double",
            Schema::new().field("value", Field::number()),
            |input, _b| async move { Ok(input) },
        )
        .with_description("doubles a number")
        .with_boundary(Boundary::new("fetchData", |_args| async { Ok(Value::Null) }));
        let descriptor = serde_json::to_value(task.describe()).expect("serialize");
        assert_eq!(
            descriptor,
            json!({
                "name": "double",
                "description": "doubles a number",
                "input": {"value": {"type": "number"}},
                "boundaries": ["fetchData"]
            })
        );
    }

    #[test]
    fn is_valid_checks_schema_only() {
        let task = Task::new(
            "double",
            Schema::new().field("value", Field::number()),
            |_input, _b| async move { Err(TaskError::execution("never called")) },
        );
        assert!(task.is_valid(&json!({"value": 1})));
        assert!(!task.is_valid(&json!({"value": "x"})));
        assert!(!task.is_valid(&Value::Null));
        assert!(echo_task().is_valid(&Value::Null));
    }
}
