//! Lifecycle telemetry: event schema, delivery, and the reporter that
//! instruments long-running operations.

pub mod context;
pub mod delivery;
pub mod events;
mod http_client;
pub mod interrupt;
pub mod reporter;
#[cfg(test)]
mod testing;
#[cfg(test)]
mod tests;

pub use context::{
    append_metrics_data, current_event_prefix, set_event_property, try_set_event_property,
};
pub use delivery::{DeliveryClient, DeliveryHandle, HttpCollector, Payload, Transport};
pub use events::{
    ErrorInfo, Event, Lifecycle, PromptProps, SessionProps, Stage, SubjectProps, TerminalStage,
};
pub use interrupt::{
    ChannelInterrupts, InterruptListener, InterruptSignal, InterruptSource, OsInterrupts,
};
pub use reporter::{AmbientContext, CollectOptions, OsInfo, Reporter, ReporterParams};
