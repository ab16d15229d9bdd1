//! Key/value settings with defaults, persisted as YAML.
//!
//! Keys are flat strings (`Path.countryDatabase`, `Update:lastUpdated`, ...).
//! URL and update keys are filled in with defaults on load so that the
//! saved file documents every option. Path keys are left out until they are
//! set explicitly: a path that differs from its default marks the database
//! as user managed and excludes it from automatic updates.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::kind::DatabaseKind;

/// Default directory holding the database files.
pub const DEFAULT_DATA_DIR: &str = "./plugins/GeoIPTools";

/// Default interval between automatic updates (7 days).
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const LAST_UPDATED_KEY: &str = "Update:lastUpdated";
const DISABLED_KEY: &str = "Update:disabled";
const INTERVAL_KEY: &str = "Update:interval";

/// Settings shared between the manager, the fetcher and the scheduler.
pub type SharedSettings = Arc<RwLock<Settings>>;

/// Persistent configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    data_dir: PathBuf,
    file: Option<PathBuf>,
    values: BTreeMap<String, Value>,
}

impl Settings {
    /// Create settings that are never written to disk.
    pub fn in_memory(data_dir: impl AsRef<Path>) -> Self {
        let mut settings = Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            file: None,
            values: BTreeMap::new(),
        };
        settings.fill_defaults();
        settings
    }

    /// Load settings from a YAML file, filling in and saving defaults.
    ///
    /// A missing file is treated as empty.
    pub fn load(file: impl AsRef<Path>, data_dir: impl AsRef<Path>) -> Result<Self> {
        let file = file.as_ref();
        let values = if file.exists() {
            let content = fs::read_to_string(file)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_yaml::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };

        let mut settings = Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            file: Some(file.to_path_buf()),
            values,
        };
        settings.validate()?;
        settings.fill_defaults();
        settings.save()?;
        Ok(settings)
    }

    /// Persist the settings. No-op for in-memory settings.
    pub fn save(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        if let Some(parent) = file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_yaml::to_string(&self.values)?;
        fs::write(file, content)?;
        Ok(())
    }

    /// Wrap into the shared form used by the other components.
    pub fn into_shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }

    /// Directory holding the default database files.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Backing file, if any.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Built-in path for a database kind.
    pub fn default_path(&self, kind: DatabaseKind) -> PathBuf {
        self.data_dir.join(kind.default_file_name())
    }

    /// Configured path for a database kind.
    pub fn database_path(&self, kind: DatabaseKind) -> PathBuf {
        match self.string(kind.path_key()) {
            Some(path) => PathBuf::from(path),
            None => self.default_path(kind),
        }
    }

    /// Whether the path was customised away from the built-in default.
    pub fn is_path_overridden(&self, kind: DatabaseKind) -> bool {
        self.database_path(kind) != self.default_path(kind)
    }

    pub fn set_database_path(&mut self, kind: DatabaseKind, path: impl AsRef<Path>) {
        let path = path.as_ref().to_string_lossy().into_owned();
        self.values
            .insert(kind.path_key().to_string(), Value::String(path));
    }

    /// Configured download URL for a database kind.
    pub fn database_url(&self, kind: DatabaseKind) -> String {
        self.string(kind.url_key())
            .unwrap_or_else(|| kind.default_url().to_string())
    }

    pub fn set_database_url(&mut self, kind: DatabaseKind, url: &str) {
        self.values
            .insert(kind.url_key().to_string(), Value::String(url.to_string()));
    }

    /// Time of the last completed update run, in milliseconds since the epoch.
    pub fn last_updated_millis(&self) -> u64 {
        self.string(LAST_UPDATED_KEY)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Time of the last completed update run. The epoch if never run.
    pub fn last_updated(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.last_updated_millis())
    }

    pub fn set_last_updated(&mut self, time: SystemTime) {
        let millis = time.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        self.values.insert(
            LAST_UPDATED_KEY.to_string(),
            Value::String(millis.to_string()),
        );
    }

    /// Whether automatic updates are disabled.
    pub fn is_updater_disabled(&self) -> bool {
        self.values
            .get(DISABLED_KEY)
            .and_then(parse_bool)
            .unwrap_or(false)
    }

    pub fn set_updater_disabled(&mut self, disabled: bool) {
        self.values
            .insert(DISABLED_KEY.to_string(), Value::Bool(disabled));
    }

    /// Interval between automatic updates.
    pub fn update_interval(&self) -> Duration {
        self.values
            .get(INTERVAL_KEY)
            .and_then(parse_u64)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_UPDATE_INTERVAL)
    }

    pub fn set_update_interval(&mut self, interval: Duration) {
        self.values.insert(
            INTERVAL_KEY.to_string(),
            Value::Number(interval.as_secs().into()),
        );
    }

    /// Check if the update interval has elapsed since the last update.
    pub fn needs_update(&self) -> bool {
        let elapsed = SystemTime::now()
            .duration_since(self.last_updated())
            .unwrap_or(Duration::ZERO);
        elapsed >= self.update_interval()
    }

    /// Iterate over all stored keys and values, rendered as strings.
    pub fn entries(&self) -> impl Iterator<Item = (&str, String)> {
        self.values
            .iter()
            .map(|(k, v)| (k.as_str(), render(v).unwrap_or_default()))
    }

    fn string(&self, key: &str) -> Option<String> {
        self.values.get(key).and_then(render)
    }

    fn fill_defaults(&mut self) {
        for kind in DatabaseKind::ALL {
            self.values
                .entry(kind.url_key().to_string())
                .or_insert_with(|| Value::String(kind.default_url().to_string()));
        }
        self.values
            .entry(LAST_UPDATED_KEY.to_string())
            .or_insert_with(|| Value::String("0".to_string()));
        self.values
            .entry(DISABLED_KEY.to_string())
            .or_insert(Value::Bool(false));
        self.values
            .entry(INTERVAL_KEY.to_string())
            .or_insert_with(|| Value::Number(DEFAULT_UPDATE_INTERVAL.as_secs().into()));
    }

    fn validate(&self) -> Result<()> {
        if let Some(v) = self.values.get(LAST_UPDATED_KEY) {
            parse_u64(v)
                .and_then(|ms| i64::try_from(ms).ok())
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .ok_or_else(|| {
                    Error::Config(format!("{} must be epoch milliseconds", LAST_UPDATED_KEY))
                })?;
        }
        if let Some(v) = self.values.get(DISABLED_KEY) {
            parse_bool(v)
                .ok_or_else(|| Error::Config(format!("{} must be a boolean", DISABLED_KEY)))?;
        }
        if let Some(v) = self.values.get(INTERVAL_KEY) {
            parse_u64(v)
                .ok_or_else(|| Error::Config(format!("{} must be seconds", INTERVAL_KEY)))?;
        }
        Ok(())
    }
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
