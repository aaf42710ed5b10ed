use super::http_client::build_collector_client;
use crate::config::CollectorConfig;
use crate::error::TelemetryError;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Header carrying the collector source credential.
pub const SOURCE_KEY_HEADER: &str = "X-Sparrow-Source-Key";

/// Body of one outbound telemetry request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub event: String,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Milliseconds since the Unix epoch at send time.
    pub timestamp: i64,
    pub properties: Map<String, Value>,
}

pub type DeliveryFuture = Pin<Box<dyn Future<Output = Result<(), TelemetryError>> + Send + 'static>>;

/// Wire transport for telemetry payloads.
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Starts delivering `payload`. The returned future is driven on a
    /// background task; its outcome only ever reaches the debug log.
    fn deliver(&self, payload: Payload) -> DeliveryFuture;
}

/// HTTP collector: `POST` JSON with the source key header. The response
/// status is not inspected.
pub struct HttpCollector {
    client: reqwest::Client,
    endpoint: String,
    source_key: String,
}

impl HttpCollector {
    pub fn new(endpoint: &str, source_key: &str, timeout_secs: u64) -> Self {
        Self {
            client: build_collector_client(timeout_secs),
            endpoint: endpoint.to_string(),
            source_key: source_key.to_string(),
        }
    }
}

impl Transport for HttpCollector {
    fn name(&self) -> &str {
        "http"
    }

    fn deliver(&self, payload: Payload) -> DeliveryFuture {
        let request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(SOURCE_KEY_HEADER, &self.source_key)
            .json(&payload);
        let endpoint = self.endpoint.clone();

        Box::pin(async move {
            let response = request
                .send()
                .await
                .map_err(|err| TelemetryError::Delivery {
                    endpoint,
                    message: err.to_string(),
                })?;
            debug!(status = %response.status(), "telemetry collector responded");
            Ok(())
        })
    }
}

/// A delivery that has been handed to the runtime.
#[derive(Debug)]
pub struct DeliveryHandle {
    task: JoinHandle<()>,
}

impl DeliveryHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the delivery to finish, whatever its outcome.
    pub async fn settle(self) {
        if let Err(err) = self.task.await {
            debug!(error = %err, "telemetry delivery task did not complete");
        }
    }
}

/// Builds payloads and fires them at the transport.
#[derive(Clone)]
pub struct DeliveryClient {
    transport: Option<Arc<dyn Transport>>,
    device_id: String,
    user_id: Option<String>,
}

impl DeliveryClient {
    /// Client for `config`. Without a usable source key it never sends.
    pub fn new(config: &CollectorConfig, device_id: String, user_id: Option<String>) -> Self {
        let transport = config.credential().map(|key| {
            Arc::new(HttpCollector::new(&config.endpoint, key, config.timeout_secs))
                as Arc<dyn Transport>
        });
        Self {
            transport,
            device_id,
            user_id,
        }
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        device_id: String,
        user_id: Option<String>,
    ) -> Self {
        Self {
            transport: Some(transport),
            device_id,
            user_id,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Fires `event` without waiting for it. Returns `None` when no transport
    /// is configured or no tokio runtime is running; nothing is built in
    /// either case.
    pub fn send(&self, event: &str, properties: Map<String, Value>) -> Option<DeliveryHandle> {
        let transport = self.transport.as_ref()?;
        let Ok(runtime) = Handle::try_current() else {
            warn!(event = %event, "no tokio runtime, dropping telemetry event");
            return None;
        };

        let payload = Payload {
            event: event.to_string(),
            device_id: self.device_id.clone(),
            user_id: self.user_id.clone(),
            timestamp: Utc::now().timestamp_millis(),
            properties,
        };
        debug!(event = %payload.event, transport = transport.name(), "sending telemetry event");

        let delivery = transport.deliver(payload);
        let event = event.to_string();
        let task = runtime.spawn(async move {
            if let Err(err) = delivery.await {
                debug!(event = %event, error = %err, "telemetry delivery failed");
            }
        });
        Some(DeliveryHandle { task })
    }
}

impl fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryClient")
            .field(
                "transport",
                &self.transport.as_ref().map(|transport| transport.name()),
            )
            .field("device_id", &self.device_id)
            .field("user_id", &self.user_id)
            .finish()
    }
}
