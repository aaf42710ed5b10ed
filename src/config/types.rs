use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stored telemetry opt-in decision.
///
/// `date` is the moment `enabled` last changed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub enabled: bool,
    pub date: DateTime<Utc>,
}

impl PermissionRecord {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            date: Utc::now(),
        }
    }
}

/// Contents of the shared metrics config file.
///
/// Keys written by sibling tools that share the file land in `extra` and are
/// written back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<PermissionRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Cached account identifier, filled in by the login flow of the host CLI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
