use super::{PermissionRecord, PersistedConfig};
use crate::error::ConfigError;
use directories::BaseDirs;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};
use uuid::Uuid;

/// Overrides the location of the metrics config file.
pub const CONFIG_PATH_ENV: &str = "C3_METRICS_CONFIG_PATH";

const CONFIG_DIR_NAME: &str = ".wrangler";
const CONFIG_FILE_NAME: &str = "metrics.json";

/// Durable JSON record of the telemetry permission and device identifier.
///
/// Reads never fail: a missing, unreadable or malformed file is an empty
/// record. Writes assume a single writer (one short-lived CLI process).
#[derive(Debug)]
pub struct MetricsConfigStore {
    path: PathBuf,
    writes: AtomicUsize,
}

impl MetricsConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writes: AtomicUsize::new(0),
        }
    }

    /// Store at `C3_METRICS_CONFIG_PATH`, or `<config dir>/.wrangler/metrics.json`.
    pub fn open_default() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV)
            && !path.trim().is_empty()
        {
            return Ok(Self::new(path));
        }

        let base = BaseDirs::new().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::new(
            base.config_dir()
                .join(CONFIG_DIR_NAME)
                .join(CONFIG_FILE_NAME),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of writes this handle has persisted.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn read(&self) -> PersistedConfig {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return PersistedConfig::default(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "metrics config unreadable, using defaults");
                return PersistedConfig::default();
            }
        };

        serde_json::from_str(&contents).unwrap_or_else(|err| {
            warn!(path = %self.path.display(), error = %err, "metrics config malformed, using defaults");
            PersistedConfig::default()
        })
    }

    pub fn write(&self, config: &PersistedConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, json).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })?;

        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(path = %self.path.display(), "metrics config written");
        Ok(())
    }

    /// Device id from `config`, generating and persisting one when absent.
    ///
    /// `config` is updated in place so later writes through the same value
    /// keep the id.
    pub fn device_id(&self, config: &mut PersistedConfig) -> String {
        if let Some(id) = config.device_id.as_deref()
            && !id.is_empty()
        {
            return id.to_string();
        }

        let id = Uuid::new_v4().to_string();
        config.device_id = Some(id.clone());
        if let Err(err) = self.write(config) {
            warn!(error = %err, "failed to persist device id");
        }
        id
    }

    /// Permission from `config`, initialising it to enabled when absent.
    pub fn permission(&self, config: &mut PersistedConfig) -> PermissionRecord {
        if let Some(permission) = &config.permission {
            return permission.clone();
        }

        let record = PermissionRecord::new(true);
        config.permission = Some(record.clone());
        if let Err(err) = self.write(config) {
            warn!(error = %err, "failed to persist default telemetry permission");
        }
        record
    }

    /// Stores a new permission value. Returns `false` when it was already set
    /// to `enabled`, in which case nothing is written.
    pub fn set_permission(&self, enabled: bool) -> Result<bool, ConfigError> {
        let mut config = self.read();
        if config
            .permission
            .as_ref()
            .is_some_and(|permission| permission.enabled == enabled)
        {
            return Ok(false);
        }

        config.permission = Some(PermissionRecord::new(enabled));
        self.write(&config)?;
        Ok(true)
    }
}
