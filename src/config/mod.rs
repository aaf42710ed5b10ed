mod collector;
mod store;
#[cfg(test)]
pub(crate) mod test_env;
mod types;

pub use collector::{CollectorConfig, DEFAULT_ENDPOINT, telemetry_disabled_by_env};
pub use store::{CONFIG_PATH_ENV, MetricsConfigStore};
pub use types::{PermissionRecord, PersistedConfig};
