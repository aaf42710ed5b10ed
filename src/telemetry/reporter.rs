use super::context::{self, OperationContext};
use super::delivery::{DeliveryClient, DeliveryHandle};
use super::events::{
    Cancelled, Completed, ErrorInfo, Errored, Event, Lifecycle, Started, SubjectProps,
    TerminalStage,
};
use super::interrupt::{InterruptListener, InterruptSignal, InterruptSource, OsInterrupts};
use crate::config::{CollectorConfig, MetricsConfigStore, telemetry_disabled_by_env};
use crate::error::CancelError;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OsInfo {
    pub platform: String,
    pub arch: String,
}

impl OsInfo {
    pub fn current() -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// Process-wide fields attached to every event. Built once per reporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmbientContext {
    pub session_id: String,
    pub os: OsInfo,
    pub c3_version: String,
    pub is_first_usage: bool,
}

impl AmbientContext {
    pub fn new(is_first_usage: bool) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            os: OsInfo::current(),
            c3_version: env!("CARGO_PKG_VERSION").to_string(),
            is_first_usage,
        }
    }

    fn properties(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => Map::new(),
        }
    }
}

pub struct ReporterParams {
    pub ambient: AmbientContext,
    /// Outcome of the permission check; `false` makes every send a no-op.
    pub enabled: bool,
    pub delivery: DeliveryClient,
    pub interrupts: Arc<dyn InterruptSource>,
}

/// What to instrument: the subject is implied by the props type.
#[derive(Debug, Clone)]
pub struct CollectOptions<P> {
    pub started_props: P,
}

struct ReporterInner {
    ambient: AmbientContext,
    enabled: bool,
    delivery: DeliveryClient,
    interrupts: Arc<dyn InterruptSource>,
    pending: Mutex<Vec<DeliveryHandle>>,
}

/// Lifecycle-aware telemetry reporter.
///
/// Cheap to clone; clones share the pending-delivery set.
#[derive(Clone)]
pub struct Reporter {
    inner: Arc<ReporterInner>,
}

enum RaceOutcome<T> {
    Settled(anyhow::Result<T>),
    Panicked(Box<dyn Any + Send>),
    Interrupted(InterruptSignal),
}

impl Reporter {
    pub fn new(params: ReporterParams) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                ambient: params.ambient,
                enabled: params.enabled,
                delivery: params.delivery,
                interrupts: params.interrupts,
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Reporter backed by the metrics config file and OS signals.
    ///
    /// Initialises the device id and permission record on first use.
    pub fn from_store(store: &MetricsConfigStore, collector: &CollectorConfig) -> Self {
        let mut config = store.read();
        let is_first_usage = config.permission.is_none();
        let device_id = store.device_id(&mut config);
        let permission = store.permission(&mut config);
        let enabled = permission.enabled && !telemetry_disabled_by_env();
        debug!(enabled, is_first_usage, "telemetry reporter initialised");

        Self::new(ReporterParams {
            ambient: AmbientContext::new(is_first_usage),
            enabled,
            delivery: DeliveryClient::new(collector, device_id, config.user_id.clone()),
            interrupts: Arc::new(OsInterrupts),
        })
    }

    pub fn ambient(&self) -> &AmbientContext {
        &self.inner.ambient
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    /// Deliveries sent and not yet drained.
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    fn pending(&self) -> MutexGuard<'_, Vec<DeliveryHandle>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sends one event with the ambient fields merged in. Event properties
    /// win over ambient ones on key collisions.
    ///
    /// The permission gate is the value resolved when the reporter was
    /// built; a permission changed later through the config store takes
    /// effect on the next reporter. Outside a tokio runtime the event is
    /// dropped.
    pub fn send_event(&self, name: &str, properties: Map<String, Value>) {
        if !self.inner.enabled {
            return;
        }

        let mut merged = self.inner.ambient.properties();
        merged.extend(properties);
        if let Some(handle) = self.inner.delivery.send(name, merged) {
            self.pending().push(handle);
        }
    }

    fn dispatch(&self, event: &Event) {
        self.send_event(&event.name(), event.properties());
    }

    /// Contributes to the active operation's `stage` properties.
    ///
    /// # Panics
    ///
    /// Panics when no instrumented operation is active on the current task.
    pub fn set_event_property(
        &self,
        stage: TerminalStage,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) {
        context::set_event_property(stage, key, value);
    }

    /// Waits for every delivery sent so far to finish, successfully or not.
    /// Later sends are not included.
    pub async fn wait_for_all_events_settled(&self) {
        let handles = std::mem::take(&mut *self.pending());
        if handles.is_empty() {
            return;
        }
        debug!(count = handles.len(), "waiting for telemetry deliveries");
        join_all(handles.into_iter().map(DeliveryHandle::settle)).await;
    }

    /// Runs `operation` as an instrumented `P` subject.
    ///
    /// Emits `<prefix> started`, then races the operation against interrupt
    /// signals and emits exactly one of `completed`, `cancelled` or
    /// `errored`. The operation's own result (or, on interrupt, a
    /// [`CancelError`] naming the signal) is returned unchanged; panics are
    /// resumed after reporting.
    ///
    /// The operation runs on its own task. When an interrupt wins it keeps
    /// running detached and whatever it later produces is discarded.
    pub async fn collect_async_metrics<P, F, Fut, T>(
        &self,
        options: CollectOptions<P>,
        operation: F,
    ) -> anyhow::Result<T>
    where
        P: SubjectProps,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let CollectOptions { started_props } = options;
        let started_at = Instant::now();
        self.dispatch(&P::into_event(Lifecycle::Started(Started {
            props: started_props.clone(),
        })));

        // Listeners go in before any operation code runs.
        let listener = self.listen();
        let context = OperationContext::new(P::EVENT_PREFIX);
        let operation = context.sync_scope(operation);
        let task = tokio::spawn(context.clone().scope(operation));
        let outcome = race(task, listener).await;
        let duration_ms = elapsed_ms(started_at);

        match outcome {
            RaceOutcome::Settled(Ok(value)) => {
                self.dispatch(&P::into_event(Lifecycle::Completed(Completed {
                    props: started_props,
                    extra: context.take(TerminalStage::Completed),
                    duration_ms,
                })));
                Ok(value)
            }
            RaceOutcome::Settled(Err(err)) => {
                let lifecycle = match err.downcast_ref::<CancelError>() {
                    Some(cancel) => Lifecycle::Cancelled(Cancelled {
                        props: started_props,
                        extra: context.take(TerminalStage::Cancelled),
                        duration_ms,
                        signal: cancel.signal.clone(),
                    }),
                    None => Lifecycle::Errored(Errored {
                        props: started_props,
                        extra: context.take(TerminalStage::Errored),
                        duration_ms,
                        error: ErrorInfo::from_error(&err),
                    }),
                };
                self.dispatch(&P::into_event(lifecycle));
                Err(err)
            }
            RaceOutcome::Interrupted(signal) => {
                self.dispatch(&P::into_event(Lifecycle::Cancelled(Cancelled {
                    props: started_props,
                    extra: context.take(TerminalStage::Cancelled),
                    duration_ms,
                    signal: Some(signal.as_str().to_string()),
                })));
                Err(CancelError::from_signal(signal.as_str()).into())
            }
            RaceOutcome::Panicked(payload) => {
                self.dispatch(&P::into_event(Lifecycle::Errored(Errored {
                    props: started_props,
                    extra: context.take(TerminalStage::Errored),
                    duration_ms,
                    error: ErrorInfo::from_panic(payload.as_ref()),
                })));
                std::panic::resume_unwind(payload)
            }
        }
    }

    fn listen(&self) -> InterruptListener {
        self.inner.interrupts.listen().unwrap_or_else(|err| {
            warn!(
                source = self.inner.interrupts.name(),
                error = %err,
                "failed to install interrupt listeners"
            );
            InterruptListener::inert()
        })
    }
}

/// First of the operation's settlement and an interrupt wins. `listener` is
/// released before returning, on every path.
async fn race<T>(
    mut task: JoinHandle<anyhow::Result<T>>,
    mut listener: InterruptListener,
) -> RaceOutcome<T> {
    let outcome = tokio::select! {
        biased;
        joined = &mut task => match joined {
            Ok(result) => RaceOutcome::Settled(result),
            Err(err) if err.is_panic() => RaceOutcome::Panicked(err.into_panic()),
            Err(_) => RaceOutcome::Settled(Err(CancelError::new().into())),
        },
        signal = listener.recv() => {
            debug!(signal = %signal, "instrumented operation interrupted");
            RaceOutcome::Interrupted(signal)
        }
    };

    drop(listener);
    // Detach: an interrupted operation keeps running, its result unobserved.
    drop(task);
    outcome
}

fn elapsed_ms(started_at: Instant) -> u64 {
    let elapsed = Instant::now().saturating_duration_since(started_at);
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
