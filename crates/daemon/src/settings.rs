//! Daemon configuration
//!
//! Sources, lowest priority first: built-in defaults, the TOML file named by
//! `QUEUEDECK_CONFIG` (default `queuedeck.toml`, optional), then
//! `QUEUEDECK__SECTION__KEY` environment variables.

use config::{Config, ConfigError, Environment, File, FileFormat};
use queuedeck_core::application::{RegistryOptions, StreamConfig};
use queuedeck_core::domain::{ConnectionConfig, JobOptions, QueueDefinition, QueueOptions};
use queuedeck_core::port::MaintenanceConfig;
use queuedeck_infra_system::{ProcessorConfig, SubprocessProcessor};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "QUEUEDECK_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "queuedeck.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub engine: EngineSettings,
    pub streaming: StreamingSettings,
    pub maintenance: MaintenanceSettings,
    /// Order here is the order queues are listed in
    pub queues: Vec<QueueSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8520,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Empty disables authentication
    pub api_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// In-memory engine with polling streams
    pub testing: bool,
    pub prefix: Option<String>,
    pub connection: Option<ConnectionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    pub heartbeat_interval_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        let defaults = StreamConfig::default();
        Self {
            heartbeat_interval_secs: defaults.heartbeat_interval.as_secs(),
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceSettings {
    pub event_retention_secs: u64,
    pub interval_secs: u64,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            event_retention_secs: 60 * 60,
            interval_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    pub name: String,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default = "default_stalled_check")]
    pub stalled_check: bool,
    #[serde(default)]
    pub default_job_options: JobOptions,
    /// Queues without a processor are producer-only
    #[serde(default)]
    pub processor: Option<ProcessorConfig>,
}

fn default_stalled_check() -> bool {
    true
}

impl QueueSettings {
    pub fn to_definition(&self) -> QueueDefinition {
        let mut definition = QueueDefinition::new(&self.name).with_options(QueueOptions {
            default_job_options: self.default_job_options.clone(),
            stalled_check: self.stalled_check,
        });
        if let Some(concurrency) = self.concurrency {
            definition = definition.with_concurrency(concurrency);
        }
        if let Some(processor) = &self.processor {
            definition =
                definition.with_processor(Arc::new(SubprocessProcessor::new(processor.clone())));
        }
        definition
    }
}

impl Settings {
    /// Load from the file named by `QUEUEDECK_CONFIG` plus the environment
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::build(File::new(&path, FileFormat::Toml).required(false))
    }

    /// Load from TOML text plus the environment
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Self::build(File::from_str(text, FileFormat::Toml))
    }

    fn build<S>(file: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        Config::builder()
            .add_source(file)
            // QUEUEDECK__SERVER__PORT=9000, QUEUEDECK__AUTH__API_KEYS=a,b
            .add_source(
                Environment::with_prefix("QUEUEDECK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("auth.api_keys"),
            )
            .build()?
            .try_deserialize()
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            definitions: self.queues.iter().map(QueueSettings::to_definition).collect(),
            connection: self.engine.connection.clone(),
            prefix: self.engine.prefix.clone(),
            testing: self.engine.testing,
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            heartbeat_interval: Duration::from_secs(self.streaming.heartbeat_interval_secs.max(1)),
            poll_interval: Duration::from_millis(self.streaming.poll_interval_ms.max(1)),
        }
    }

    pub fn maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            event_retention_ms: (self.maintenance.event_retention_secs as i64).saturating_mul(1000),
        }
    }

    pub fn maintenance_period(&self) -> Duration {
        Duration::from_secs(self.maintenance.interval_secs.max(1))
    }
}
