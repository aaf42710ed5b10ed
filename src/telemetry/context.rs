//! Stage-scoped property bag bound to the dynamic extent of one instrumented
//! operation.
//!
//! The binding is task-local: code anywhere inside the wrapped operation can
//! contribute properties without a parameter being threaded through. Tasks
//! spawned by the operation do not inherit the binding.

use super::events::TerminalStage;
use crate::error::TelemetryError;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

tokio::task_local! {
    static OPERATION: OperationContext;
}

#[derive(Debug, Default)]
struct StageProperties {
    completed: Map<String, Value>,
    cancelled: Map<String, Value>,
    errored: Map<String, Value>,
}

impl StageProperties {
    fn bag_mut(&mut self, stage: TerminalStage) -> &mut Map<String, Value> {
        match stage {
            TerminalStage::Completed => &mut self.completed,
            TerminalStage::Cancelled => &mut self.cancelled,
            TerminalStage::Errored => &mut self.errored,
        }
    }
}

/// Per-invocation context. Each `collect_async_metrics` call creates its own.
#[derive(Debug, Clone)]
pub struct OperationContext {
    event_prefix: &'static str,
    properties: Arc<Mutex<StageProperties>>,
}

impl OperationContext {
    pub(crate) fn new(event_prefix: &'static str) -> Self {
        Self {
            event_prefix,
            properties: Arc::new(Mutex::new(StageProperties::default())),
        }
    }

    pub fn event_prefix(&self) -> &'static str {
        self.event_prefix
    }

    fn set(&self, stage: TerminalStage, key: String, value: Value) {
        let mut properties = self
            .properties
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        properties.bag_mut(stage).insert(key, value);
    }

    /// Removes and returns everything contributed to `stage`.
    pub(crate) fn take(&self, stage: TerminalStage) -> Map<String, Value> {
        let mut properties = self
            .properties
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(properties.bag_mut(stage))
    }

    /// Runs `fut` with this context bound.
    pub(crate) fn scope<F: Future>(self, fut: F) -> impl Future<Output = F::Output> {
        OPERATION.scope(self, fut)
    }

    /// Runs the synchronous `f` with this context bound.
    pub(crate) fn sync_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        OPERATION.sync_scope(self.clone(), f)
    }
}

/// Contributes `key = value` to `stage` of the active operation.
pub fn try_set_event_property(
    stage: TerminalStage,
    key: impl Into<String>,
    value: impl Into<Value>,
) -> Result<(), TelemetryError> {
    let key = key.into();
    let value = value.into();
    OPERATION
        .try_with(|context| context.set(stage, key, value))
        .map_err(|_| TelemetryError::NoActiveOperation)
}

/// Contributes `key = value` to `stage` of the active operation.
///
/// # Panics
///
/// Panics when called outside an instrumented operation.
pub fn set_event_property(stage: TerminalStage, key: impl Into<String>, value: impl Into<Value>) {
    if let Err(err) = try_set_event_property(stage, key, value) {
        panic!("set_event_property: {err}");
    }
}

/// Contributes every entry of `data` to `stage` of the active operation.
///
/// # Panics
///
/// Panics when called outside an instrumented operation.
pub fn append_metrics_data(stage: TerminalStage, data: Map<String, Value>) {
    for (key, value) in data {
        set_event_property(stage, key, value);
    }
}

/// Prefix of the innermost active operation on this task, if any.
pub fn current_event_prefix() -> Option<&'static str> {
    OPERATION.try_with(OperationContext::event_prefix).ok()
}
