//! Side-effect wrappers that record, mock, and replay their calls.
//!
//! # Overview
//!
//! A [`Boundary`] wraps one async function. It holds no per-run state:
//! each run calls [`Boundary::start_run`] to get a [`BoundaryRecording`], an
//! invocation-scoped tape that only that run appends to. The run hands the
//! recording's [`BoundaryHandle`] to its handler, then stops the recording
//! and consumes its calls exactly once. Two overlapping runs of the same task
//! therefore never see each other's calls.
//!
//! A recording started with a replay sequence never executes the wrapped
//! function; it returns recorded outputs by position (see [`replayer`]).

pub mod recording;
pub mod replayer;

use crate::boundary::recording::{timestamp_ms, CallRecord, CallTiming};
use crate::boundary::replayer::ReplaySource;
use crate::errors::TaskError;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

pub type BoundaryFuture = BoxFuture<'static, Result<Value, TaskError>>;

/// Type-erased boundary implementation taking positional JSON arguments.
pub type BoundaryFn = Arc<dyn Fn(Vec<Value>) -> BoundaryFuture + Send + Sync>;

pub fn boundary_fn<F, Fut>(f: F) -> BoundaryFn
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

/// How a boundary behaves during a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryMode {
    /// Call through to the live (or mocked) function.
    #[default]
    Proxy,
    /// Return recorded outputs without executing anything.
    Replay,
}

#[derive(Clone)]
pub struct Boundary {
    name: String,
    func: BoundaryFn,
    mock: Option<BoundaryFn>,
}

impl std::fmt::Debug for Boundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Boundary")
            .field("name", &self.name)
            .field("mocked", &self.mock.is_some())
            .finish()
    }
}

impl Boundary {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        Self::from_fn(name, boundary_fn(f))
    }

    pub fn from_fn(name: impl Into<String>, func: BoundaryFn) -> Self {
        Self {
            name: name.into(),
            func,
            mock: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Substitute `mock` for the wrapped function. Calls are still recorded.
    pub fn set_mock(&mut self, mock: BoundaryFn) {
        self.mock = Some(mock);
    }

    pub fn reset_mock(&mut self) {
        self.mock = None;
    }

    pub fn is_mocked(&self) -> bool {
        self.mock.is_some()
    }

    fn active_fn(&self) -> BoundaryFn {
        Arc::clone(self.mock.as_ref().unwrap_or(&self.func))
    }

    /// Executes outside any run. Nothing is recorded.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value, TaskError> {
        (self.active_fn())(args).await
    }

    /// Begins an invocation-scoped recording. With `replay`, calls consume
    /// the given sequence instead of executing.
    pub fn start_run(&self, replay: Option<Vec<CallRecord>>) -> BoundaryRecording {
        BoundaryRecording {
            handle: BoundaryHandle {
                name: self.name.clone(),
                func: self.active_fn(),
                replay: replay.map(|calls| Arc::new(ReplaySource::new(self.name.clone(), calls))),
                tape: Arc::new(Mutex::new(RunTape {
                    active: true,
                    calls: Vec::new(),
                })),
            },
        }
    }
}

#[derive(Debug, Default)]
struct RunTape {
    active: bool,
    calls: Vec<CallRecord>,
}

fn lock_tape(tape: &Mutex<RunTape>) -> MutexGuard<'_, RunTape> {
    tape.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The tape of one run for one boundary.
pub struct BoundaryRecording {
    handle: BoundaryHandle,
}

impl BoundaryRecording {
    pub fn handle(&self) -> BoundaryHandle {
        self.handle.clone()
    }

    /// Halts recording. Later calls through the handle still execute.
    pub fn stop(&self) {
        lock_tape(&self.handle.tape).active = false;
    }

    pub fn is_active(&self) -> bool {
        lock_tape(&self.handle.tape).active
    }

    /// Stops recording and yields the calls in call order.
    pub fn finish(self) -> Vec<CallRecord> {
        let mut tape = lock_tape(&self.handle.tape);
        tape.active = false;
        std::mem::take(&mut tape.calls)
    }
}

/// Callable view of a boundary bound to one run's recording.
#[derive(Clone)]
pub struct BoundaryHandle {
    name: String,
    func: BoundaryFn,
    replay: Option<Arc<ReplaySource>>,
    tape: Arc<Mutex<RunTape>>,
}

impl BoundaryHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_replaying(&self) -> bool {
        self.replay.is_some()
    }

    pub async fn call(&self, args: Vec<Value>) -> Result<Value, TaskError> {
        let start = timestamp_ms();
        let result = match &self.replay {
            Some(source) => source.next(&args),
            None => (self.func)(args.clone()).await,
        };
        let timing = CallTiming::between(start, timestamp_ms());
        let mut tape = lock_tape(&self.tape);
        if tape.active {
            let call = match &result {
                Ok(output) => CallRecord::succeeded(args, output.clone(), timing),
                Err(err) => CallRecord::failed(args, err.to_string(), timing),
            };
            tape.calls.push(call);
        }
        result
    }
}

/// Name-to-handle map passed to a task handler.
#[derive(Clone, Default)]
pub struct Boundaries {
    handles: BTreeMap<String, BoundaryHandle>,
}

impl Boundaries {
    pub fn get(&self, name: &str) -> Result<&BoundaryHandle, TaskError> {
        self.handles
            .get(name)
            .ok_or_else(|| TaskError::HandlerNotFound(name.to_string()))
    }

    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, TaskError> {
        self.get(name)?.call(args).await
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }
}

/// All boundary recordings of one run. Dropping the set stops every
/// recording, so an unwinding or cancelled run still disarms its tapes.
pub struct RecordingSet {
    recordings: BTreeMap<String, BoundaryRecording>,
}

impl RecordingSet {
    pub fn start<'a>(
        boundaries: impl IntoIterator<Item = &'a Boundary>,
        mut replay: impl FnMut(&str) -> Option<Vec<CallRecord>>,
    ) -> Self {
        let recordings = boundaries
            .into_iter()
            .map(|b| (b.name().to_string(), b.start_run(replay(b.name()))))
            .collect();
        Self { recordings }
    }

    pub fn boundaries(&self) -> Boundaries {
        Boundaries {
            handles: self
                .recordings
                .iter()
                .map(|(name, rec)| (name.clone(), rec.handle()))
                .collect(),
        }
    }

    pub fn stop(&self) {
        for recording in self.recordings.values() {
            recording.stop();
        }
    }

    pub fn finish(mut self) -> BTreeMap<String, Vec<CallRecord>> {
        std::mem::take(&mut self.recordings)
            .into_iter()
            .map(|(name, rec)| (name, rec.finish()))
            .collect()
    }
}

impl Drop for RecordingSet {
    fn drop(&mut self) {
        self.stop();
    }
}
