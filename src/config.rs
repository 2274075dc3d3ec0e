//! Configuration loading from TOML files and environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::idle::ActivityKind;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub election: ElectionConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Idle detection configuration for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session key; namespaces every shared-store key.
    #[serde(default = "default_session_key")]
    pub key: String,
    /// Inactivity before the session is idle, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// How long before the timeout the prompt fires (0 disables it).
    #[serde(default = "default_prompt_lead_ms")]
    pub prompt_lead_ms: u64,
    /// Debounce window for raw input; zero or negative passes every event.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: i64,
    /// Input kinds that count as activity.
    #[serde(default = "ActivityKind::defaults")]
    pub events: Vec<ActivityKind>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key: default_session_key(),
            timeout_ms: default_timeout_ms(),
            prompt_lead_ms: default_prompt_lead_ms(),
            debounce_ms: default_debounce_ms(),
            events: ActivityKind::defaults(),
        }
    }
}

/// Leader election timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// How often the leader refreshes its claim.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    /// Age after which an unrefreshed claim may be taken over.
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: default_heartbeat_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
        }
    }
}

/// Which shared store backs the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process only; a single tab.
    Memory,
    /// JSON file shared by every process pointing at it.
    #[default]
    File,
}

/// Shared store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Store file for the file backend. Defaults to `<data_dir>/store.json`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// How often the file backend looks for writes from other processes.
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: None,
            watch_interval_ms: default_watch_interval_ms(),
        }
    }
}

impl StoreConfig {
    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }
}

/// Tab runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// How often the engine is polled, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl RuntimeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Data directory for event logs and the default store file.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// Returns the event log directory path.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// Validated settings the engine runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub session_key: String,
    pub timeout_ms: u64,
    pub prompt_lead_ms: u64,
    pub debounce_ms: i64,
    pub heartbeat_ms: u64,
    pub liveness_timeout_ms: u64,
    pub events: Vec<ActivityKind>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Config::default().engine_config()
    }
}

impl EngineConfig {
    /// Check the relationships between timings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_key.trim().is_empty() {
            return Err(ConfigError::EmptySessionKey);
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.prompt_lead_ms >= self.timeout_ms {
            return Err(ConfigError::PromptLeadTooLong {
                prompt_lead_ms: self.prompt_lead_ms,
                timeout_ms: self.timeout_ms,
            });
        }
        if self.heartbeat_ms == 0 {
            return Err(ConfigError::ZeroHeartbeat);
        }
        if self.liveness_timeout_ms <= self.heartbeat_ms {
            return Err(ConfigError::LivenessTooShort {
                liveness_timeout_ms: self.liveness_timeout_ms,
                heartbeat_ms: self.heartbeat_ms,
            });
        }
        if self.events.is_empty() {
            return Err(ConfigError::NoActivityEvents);
        }
        Ok(())
    }
}

// Default value functions
fn default_session_key() -> String {
    "idlesync".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_prompt_lead_ms() -> u64 {
    10_000
}

fn default_debounce_ms() -> i64 {
    500
}

fn default_heartbeat_ms() -> u64 {
    1_000
}

fn default_liveness_timeout_ms() -> u64 {
    3_000
}

fn default_watch_interval_ms() -> u64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".idlesync"))
        .unwrap_or_else(|| PathBuf::from(".idlesync"))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = config_path {
            Self::from_file(path)?
        } else {
            // Try default config locations
            let default_paths = [
                PathBuf::from("config/default.toml"),
                dirs::config_dir()
                    .map(|d| d.join("idlesync/config.toml"))
                    .unwrap_or_default(),
            ];

            let mut loaded = None;
            for path in &default_paths {
                if path.is_file() {
                    loaded = Some(Self::from_file(path)?);
                    break;
                }
            }
            loaded.unwrap_or_default()
        };

        config.apply_env_overrides();

        config.logging.data_dir = expand_tilde(&config.logging.data_dir);
        config.store.path = config.store.path.as_deref().map(expand_tilde);

        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("IDLESYNC_SESSION_KEY") {
            self.session.key = val;
        }
        if let Ok(val) = std::env::var("IDLESYNC_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.session.timeout_ms = v;
            }
        }
        if let Ok(val) = std::env::var("IDLESYNC_PROMPT_LEAD_MS") {
            if let Ok(v) = val.parse() {
                self.session.prompt_lead_ms = v;
            }
        }
        if let Ok(val) = std::env::var("IDLESYNC_DEBOUNCE_MS") {
            if let Ok(v) = val.parse() {
                self.session.debounce_ms = v;
            }
        }
        if let Ok(val) = std::env::var("IDLESYNC_HEARTBEAT_MS") {
            if let Ok(v) = val.parse() {
                self.election.heartbeat_ms = v;
            }
        }
        if let Ok(val) = std::env::var("IDLESYNC_STORE_PATH") {
            self.store.path = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("IDLESYNC_DATA_DIR") {
            self.logging.data_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("IDLESYNC_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Store file used by the file backend.
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.logging.data_dir.join("store.json"))
    }

    /// Settings handed to the engine.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            session_key: self.session.key.clone(),
            timeout_ms: self.session.timeout_ms,
            prompt_lead_ms: self.session.prompt_lead_ms,
            debounce_ms: self.session.debounce_ms,
            heartbeat_ms: self.election.heartbeat_ms,
            liveness_timeout_ms: self.election.liveness_timeout_ms,
            events: self.session.events.clone(),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        self.engine_config().validate()?;
        if self.store.backend == StoreBackend::File && self.store.watch_interval_ms == 0 {
            anyhow::bail!("Store watch interval must be greater than 0");
        }
        if self.runtime.poll_interval_ms == 0 {
            anyhow::bail!("Poll interval must be greater than 0");
        }
        Ok(())
    }
}

/// Expand ~ to home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(rest) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        let engine = config.engine_config();
        assert_eq!(engine.timeout_ms, 30_000);
        assert_eq!(engine.debounce_ms, 500);
        assert_eq!(engine.events, ActivityKind::defaults());
    }

    #[test]
    fn parses_partial_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[session]
key = "portal"
timeout_ms = 60000
events = ["keydown", "pointermove"]

[election]
heartbeat_ms = 500
liveness_timeout_ms = 1500

[store]
backend = "memory"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.session.key, "portal");
        assert_eq!(config.session.timeout_ms, 60_000);
        assert_eq!(config.session.prompt_lead_ms, 10_000);
        assert_eq!(
            config.session.events,
            vec![ActivityKind::KeyDown, ActivityKind::PointerMove]
        );
        assert_eq!(config.election.heartbeat_ms, 500);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.runtime.poll_interval_ms, 100);
    }

    #[test]
    fn rejects_prompt_lead_not_shorter_than_timeout() {
        let config = EngineConfig {
            prompt_lead_ms: 30_000,
            ..EngineConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::PromptLeadTooLong {
                prompt_lead_ms: 30_000,
                timeout_ms: 30_000
            })
        );
    }

    #[test]
    fn rejects_bad_timings() {
        let base = EngineConfig::default();
        let cases = [
            (
                EngineConfig {
                    timeout_ms: 0,
                    prompt_lead_ms: 0,
                    ..base.clone()
                },
                ConfigError::ZeroTimeout,
            ),
            (
                EngineConfig {
                    heartbeat_ms: 0,
                    ..base.clone()
                },
                ConfigError::ZeroHeartbeat,
            ),
            (
                EngineConfig {
                    liveness_timeout_ms: 1_000,
                    ..base.clone()
                },
                ConfigError::LivenessTooShort {
                    liveness_timeout_ms: 1_000,
                    heartbeat_ms: 1_000,
                },
            ),
            (
                EngineConfig {
                    session_key: " ".into(),
                    ..base.clone()
                },
                ConfigError::EmptySessionKey,
            ),
            (
                EngineConfig {
                    events: vec![],
                    ..base.clone()
                },
                ConfigError::NoActivityEvents,
            ),
        ];
        for (config, expected) in cases {
            assert_eq!(config.validate(), Err(expected));
        }
    }

    #[test]
    fn negative_debounce_is_accepted() {
        let config = EngineConfig {
            debounce_ms: -1,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn store_path_defaults_under_data_dir() {
        let mut config = Config::default();
        config.logging.data_dir = PathBuf::from("/tmp/idle");
        assert_eq!(config.store_path(), PathBuf::from("/tmp/idle/store.json"));
        config.store.path = Some(PathBuf::from("/srv/shared.json"));
        assert_eq!(config.store_path(), PathBuf::from("/srv/shared.json"));
    }
}
