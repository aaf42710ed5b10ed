/// Default collector endpoint for telemetry events.
pub const DEFAULT_ENDPOINT: &str = "https://sparrow.cloudflare.com/api/v1/event";

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Where and how telemetry events are delivered.
///
/// A build without a source key (development builds) never sends anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    pub endpoint: String,
    pub source_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            source_key: option_env!("SPARROW_SOURCE_KEY").map(ToOwned::to_owned),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl CollectorConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("C3_TELEMETRY_ENDPOINT")
            && !endpoint.trim().is_empty()
        {
            self.endpoint = endpoint.trim().to_string();
        }

        if let Ok(key) = std::env::var("SPARROW_SOURCE_KEY")
            && !key.trim().is_empty()
        {
            self.source_key = Some(key.trim().to_string());
        }
    }

    /// The source key, if it is usable for authenticating requests.
    pub fn credential(&self) -> Option<&str> {
        self.source_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// `C3_TELEMETRY_DISABLED=1` (or `true`) turns telemetry off for this process.
pub fn telemetry_disabled_by_env() -> bool {
    std::env::var("C3_TELEMETRY_DISABLED")
        .map(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(false)
}
