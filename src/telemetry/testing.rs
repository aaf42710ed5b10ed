use super::delivery::{DeliveryFuture, Payload, Transport};
use crate::error::TelemetryError;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy)]
pub(crate) enum DeliveryMode {
    Succeed,
    Fail,
    Panic,
}

/// Transport that records every payload at hand-off time.
#[derive(Debug, Clone)]
pub(crate) struct RecordingTransport {
    mode: DeliveryMode,
    payloads: Arc<Mutex<Vec<Payload>>>,
}

impl RecordingTransport {
    pub(crate) fn new(mode: DeliveryMode) -> Self {
        Self {
            mode,
            payloads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn shared(self) -> Arc<dyn Transport> {
        Arc::new(self)
    }

    pub(crate) fn payloads(&self) -> Vec<Payload> {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.payloads()
            .into_iter()
            .map(|payload| payload.event)
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    fn deliver(&self, payload: Payload) -> DeliveryFuture {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload);

        match self.mode {
            DeliveryMode::Succeed => Box::pin(async { Ok(()) }),
            DeliveryMode::Fail => Box::pin(async {
                Err(TelemetryError::Delivery {
                    endpoint: "recording".into(),
                    message: "connection refused".into(),
                })
            }),
            DeliveryMode::Panic => Box::pin(explode()),
        }
    }
}

async fn explode() -> Result<(), TelemetryError> {
    panic!("collector exploded")
}
