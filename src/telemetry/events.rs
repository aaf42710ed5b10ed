//! Closed set of lifecycle events and their per-stage property shapes.
//!
//! Every subject defines the same four stages. Only terminal stages carry a
//! duration, so a `started` event can never claim time that has not elapsed.

use serde::Serialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Started,
    Completed,
    Cancelled,
    Errored,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages that end an operation; the only ones call sites can contribute to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalStage {
    Completed,
    Cancelled,
    Errored,
}

impl From<TerminalStage> for Stage {
    fn from(stage: TerminalStage) -> Self {
        match stage {
            TerminalStage::Completed => Self::Completed,
            TerminalStage::Cancelled => Self::Cancelled,
            TerminalStage::Errored => Self::Errored,
        }
    }
}

/// Best-effort description of a failed operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorInfo {
    /// `stack` holds the full cause chain when the error has one.
    pub fn from_error(err: &anyhow::Error) -> Self {
        let stack = (err.chain().count() > 1).then(|| format!("{err:?}"));
        Self {
            message: Some(err.to_string()),
            stack,
        }
    }

    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned());
        Self {
            message,
            stack: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Started<P> {
    #[serde(flatten)]
    pub props: P,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completed<P> {
    #[serde(flatten)]
    pub props: P,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancelled<P> {
    #[serde(flatten)]
    pub props: P,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    pub duration_ms: u64,
    /// Interrupt that cancelled the operation; absent for explicit cancellation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Errored<P> {
    #[serde(flatten)]
    pub props: P,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    pub duration_ms: u64,
    pub error: ErrorInfo,
}

/// One stage of one subject's lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Lifecycle<P> {
    Started(Started<P>),
    Completed(Completed<P>),
    Cancelled(Cancelled<P>),
    Errored(Errored<P>),
}

impl<P: Serialize> Lifecycle<P> {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Started(_) => Stage::Started,
            Self::Completed(_) => Stage::Completed,
            Self::Cancelled(_) => Stage::Cancelled,
            Self::Errored(_) => Stage::Errored,
        }
    }

    fn properties(&self) -> Map<String, Value> {
        let value = match self {
            Self::Started(arm) => serde_json::to_value(arm),
            Self::Completed(arm) => serde_json::to_value(arm),
            Self::Cancelled(arm) => serde_json::to_value(arm),
            Self::Errored(arm) => serde_json::to_value(arm),
        };
        match value {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => Map::new(),
        }
    }
}

/// Context properties of an instrumented subject.
pub trait SubjectProps: Serialize + Clone + Send + Sync + 'static {
    /// Prefix of every event name for this subject, e.g. `"c3 session"`.
    const EVENT_PREFIX: &'static str;

    fn into_event(lifecycle: Lifecycle<Self>) -> Event;
}

/// A whole CLI invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionProps {
    pub args: Map<String, Value>,
}

impl SubjectProps for SessionProps {
    const EVENT_PREFIX: &'static str = "c3 session";

    fn into_event(lifecycle: Lifecycle<Self>) -> Event {
        Event::Session(lifecycle)
    }
}

/// A single interactive question.
///
/// Prompt code contributes `answer` and `isDefaultValue` to the completed
/// stage once the user has responded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptProps {
    pub key: String,
    pub config: Value,
}

impl SubjectProps for PromptProps {
    const EVENT_PREFIX: &'static str = "c3 prompt";

    fn into_event(lifecycle: Lifecycle<Self>) -> Event {
        Event::Prompt(lifecycle)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Session(Lifecycle<SessionProps>),
    Prompt(Lifecycle<PromptProps>),
}

impl Event {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Session(_) => SessionProps::EVENT_PREFIX,
            Self::Prompt(_) => PromptProps::EVENT_PREFIX,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Session(lifecycle) => lifecycle.stage(),
            Self::Prompt(lifecycle) => lifecycle.stage(),
        }
    }

    /// Wire name, `<subject> <stage>`.
    pub fn name(&self) -> String {
        format!("{} {}", self.prefix(), self.stage())
    }

    pub fn properties(&self) -> Map<String, Value> {
        match self {
            Self::Session(lifecycle) => lifecycle.properties(),
            Self::Prompt(lifecycle) => lifecycle.properties(),
        }
    }
}
