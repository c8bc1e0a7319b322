//! Configuration file, environment overrides and environment checks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use qualisentinel_aggregate::SentinelProfile;
use qualisentinel_core::parse_duration;
use qualisentinel_storage::RetentionPolicy;
use serde::{Deserialize, Serialize};

/// Port override.
pub const ENV_PORT: &str = "QUALISENTINEL_PORT";
/// Data directory override.
pub const ENV_DATA_DIR: &str = "QUALISENTINEL_DATA_DIR";
/// Target management URL override.
pub const ENV_TARGET_URL: &str = "QUALISENTINEL_TARGET_URL";

const MIN_REFRESH_SECS: u64 = 5;
const MAX_REFRESH_SECS: u64 = 120;

/// The environment cannot host a run. Fatal; the process exits with status 2.
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentSetupError {
    /// Config file missing or not valid JSON
    #[error("Cannot read config {path}: {reason}")]
    ConfigUnreadable { path: PathBuf, reason: String },

    /// Port is not a usable TCP port
    #[error("Invalid port '{0}': expected 1-65535")]
    InvalidPort(String),

    /// Retention settings do not parse
    #[error("Invalid retention setting: {0}")]
    InvalidRetention(String),

    /// Data directory cannot be created or written
    #[error("Data directory {path} is not usable: {reason}")]
    DataDir { path: PathBuf, reason: String },

    /// Sentinel profile missing or not valid JSON
    #[error("Cannot read sentinel profile {path}: {reason}")]
    ProfileUnreadable { path: PathBuf, reason: String },
}

/// Settings handed to the presentation bootstrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Port the dashboard listens on
    pub port: u16,
    /// Extra server flags, passed through untouched
    pub flags: Vec<String>,
}

/// Dashboard launch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Dashboard port
    pub port: u16,
    /// Extra server flags
    pub flags: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8501,
            flags: Vec::new(),
        }
    }
}

/// Application being monitored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Management base URL
    pub base_url: String,
    /// Source id stamped on scraped records
    pub source_id: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8088".to_string(),
            source_id: "target".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Periodic collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Whether `watch` keeps collecting
    pub auto: bool,
    /// Seconds between collections, clamped to 5-120
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            auto: true,
            interval_secs: 60,
        }
    }
}

impl RefreshConfig {
    /// Collection interval within the supported range.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.clamp(MIN_REFRESH_SECS, MAX_REFRESH_SECS))
    }
}

/// Retention settings in human form (`"7d"`, `"12h"`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Maximum record age
    pub max_age: Option<String>,
    /// Maximum records per series
    pub max_records_per_series: Option<usize>,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// Where snapshots are kept
    pub data_dir: PathBuf,
    /// Snapshots kept after each save
    pub keep_snapshots: usize,
    /// Custom sentinel profile (JSON); the JVM profile when unset
    pub profile: Option<PathBuf>,
    pub server: ServerConfig,
    pub target: TargetConfig,
    pub refresh: RefreshConfig,
    pub retention: RetentionConfig,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".qualisentinel"),
            keep_snapshots: 10,
            profile: None,
            server: ServerConfig::default(),
            target: TargetConfig::default(),
            refresh: RefreshConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl SentinelConfig {
    /// Load from an optional file, then apply process environment overrides.
    pub async fn load(path: Option<&Path>) -> Result<Self, EnvironmentSetupError> {
        let mut config = match path {
            Some(path) => Self::from_file(path).await?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    async fn from_file(path: &Path) -> Result<Self, EnvironmentSetupError> {
        let unreadable = |reason: String| EnvironmentSetupError::ConfigUnreadable {
            path: path.to_path_buf(),
            reason,
        };
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| unreadable(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), EnvironmentSetupError> {
        if let Some(raw) = lookup(ENV_PORT) {
            self.server.port = parse_port(&raw)?;
        }
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|d| !d.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup(ENV_TARGET_URL).filter(|u| !u.trim().is_empty()) {
            self.target.base_url = url;
        }
        if self.server.port == 0 {
            return Err(EnvironmentSetupError::InvalidPort("0".to_string()));
        }
        Ok(())
    }

    /// Launch surface for the presentation layer.
    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            port: self.server.port,
            flags: self.server.flags.clone(),
        }
    }

    /// Retention policy for the series store.
    pub fn retention_policy(&self) -> Result<RetentionPolicy, EnvironmentSetupError> {
        let mut policy = RetentionPolicy::unlimited();
        if let Some(raw) = &self.retention.max_age {
            let age = parse_duration(raw).map_err(|e| EnvironmentSetupError::InvalidRetention(e.to_string()))?;
            policy = policy.with_max_age(age);
        }
        if let Some(max) = self.retention.max_records_per_series {
            if max == 0 {
                return Err(EnvironmentSetupError::InvalidRetention(
                    "max_records_per_series must be at least 1".to_string(),
                ));
            }
            policy = policy.with_max_records(max);
        }
        Ok(policy)
    }

    /// Make sure the data directory exists and is writable.
    pub async fn prepare_data_dir(&self) -> Result<PathBuf, EnvironmentSetupError> {
        let dir = self.data_dir.clone();
        let unusable = |reason: String| EnvironmentSetupError::DataDir {
            path: dir.clone(),
            reason,
        };

        tokio::fs::create_dir_all(&dir).await.map_err(|e| unusable(e.to_string()))?;
        let marker = dir.join(".write-check");
        tokio::fs::write(&marker, b"ok").await.map_err(|e| unusable(e.to_string()))?;
        tokio::fs::remove_file(&marker).await.map_err(|e| unusable(e.to_string()))?;

        tracing::debug!(path = %dir.display(), "Data directory ready");
        Ok(dir)
    }

    /// Sentinel profile from the configured file, or the JVM default.
    pub async fn load_profile(&self) -> Result<SentinelProfile, EnvironmentSetupError> {
        let Some(path) = &self.profile else {
            return Ok(SentinelProfile::default());
        };
        let unreadable = |reason: String| EnvironmentSetupError::ProfileUnreadable {
            path: path.clone(),
            reason,
        };
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| unreadable(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))
    }
}

fn parse_port(raw: &str) -> Result<u16, EnvironmentSetupError> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(EnvironmentSetupError::InvalidPort(raw.to_string())),
    }
}
