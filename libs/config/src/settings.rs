//! Connector settings
//!
//! Loads from an optional TOML file with `CONNECTOR_` environment overrides.

use crate::defaults;
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Top-level connector configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorSettings {
    pub cache: CacheSettings,
    pub pipeline: PipelineSettings,
    pub timer: TimerSettings,
    pub logging: LoggingSettings,
}

/// Entity cache retention; `0` disables storage, `"unlimited"` (`usize::MAX`) disables eviction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    #[serde(with = "retention")]
    pub orders_keep_count: usize,
    #[serde(with = "retention")]
    pub trades_keep_count: usize,
}

/// Retention counts as plain integers, with `usize::MAX` spelled `"unlimited"`
mod retention {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    const UNLIMITED: &str = "unlimited";

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(count: &usize, serializer: S) -> Result<S::Ok, S::Error> {
        if *count == usize::MAX {
            serializer.serialize_str(UNLIMITED)
        } else {
            serializer.serialize_u64(*count as u64)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
        match Count::deserialize(deserializer)? {
            Count::Number(count) => usize::try_from(count).map_err(D::Error::custom),
            Count::Text(text) if text.trim().eq_ignore_ascii_case(UNLIMITED) => Ok(usize::MAX),
            Count::Text(text) => text.trim().parse().map_err(|_| {
                D::Error::custom(format!("expected a count or \"{UNLIMITED}\", got {text:?}"))
            }),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            orders_keep_count: defaults::cache::ORDERS_KEEP_COUNT,
            trades_keep_count: defaults::cache::TRADES_KEEP_COUNT,
        }
    }
}

/// Adapter pipeline composition and stage parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// `0` disables lookup timeouts
    pub lookup_timeout_ms: u64,
    /// Messages held while offline; `0` buffers without limit
    pub offline_buffer_capacity: usize,

    pub offline: bool,
    pub lookup_tracking: bool,
    pub partial_download: bool,
    pub depth_truncate: bool,
    pub level1_depth: bool,
    pub position: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: defaults::pipeline::LOOKUP_TIMEOUT_MS,
            offline_buffer_capacity: defaults::pipeline::OFFLINE_BUFFER_CAPACITY,
            offline: true,
            lookup_tracking: true,
            partial_download: true,
            depth_truncate: true,
            level1_depth: true,
            position: true,
        }
    }
}

impl PipelineSettings {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn offline_capacity(&self) -> Option<usize> {
        (self.offline_buffer_capacity > 0).then_some(self.offline_buffer_capacity)
    }
}

/// Periodic timer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    pub time_change_interval_ms: u64,
    pub tick_interval_ms: u64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            time_change_interval_ms: defaults::timer::TIME_CHANGE_INTERVAL_MS,
            tick_interval_ms: defaults::timer::TICK_INTERVAL_MS,
        }
    }
}

impl TimerSettings {
    pub fn time_change_interval(&self) -> Duration {
        Duration::from_millis(self.time_change_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::logging::LEVEL.to_string(),
            json: false,
        }
    }
}

impl ConnectorSettings {
    /// Replay against recorded data: never offline, no lookup timeouts, keep everything
    pub fn backtest() -> Self {
        Self {
            cache: CacheSettings {
                orders_keep_count: usize::MAX,
                trades_keep_count: usize::MAX,
            },
            pipeline: PipelineSettings {
                lookup_timeout_ms: 0,
                offline: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Small retention and buffers for constrained hosts
    pub fn low_memory() -> Self {
        Self {
            cache: CacheSettings {
                orders_keep_count: 100,
                trades_keep_count: 1000,
            },
            pipeline: PipelineSettings {
                offline_buffer_capacity: 1000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading connector config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(defaults::ENV_PREFIX)
                .prefix_separator("_")
                .separator(defaults::ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let settings: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        settings.validate()?;
        debug!(?settings, "Connector settings loaded");
        Ok(settings)
    }

    /// Parse TOML text without consulting the environment
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Self = toml::from_str(text).context("Failed to parse TOML configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Single-line JSON for structured startup logs
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize configuration")
    }

    pub fn validate(&self) -> Result<()> {
        if self.timer.tick_interval_ms == 0 {
            bail!("timer.tick_interval_ms must be positive");
        }
        if self.logging.level.trim().is_empty() {
            bail!("logging.level must not be empty");
        }
        Ok(())
    }
}

/// Load settings from `path` (`~` and `$VARS` expanded), or defaults plus environment
pub fn load_config(path: Option<&str>) -> Result<ConnectorSettings> {
    let path = path
        .map(|path| {
            shellexpand::full(path)
                .map(|expanded| PathBuf::from(expanded.as_ref()))
                .with_context(|| format!("Failed to expand config path {path}"))
        })
        .transpose()?;

    ConnectorSettings::load(path.as_deref())
}
