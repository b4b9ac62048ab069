//! # Connector Configuration
//!
//! Configuration structs and defaults for the connector, its entity cache and its adapter
//! pipeline.
//!
//! ## Sources
//!
//! Later sources override earlier ones:
//!
//! 1. built-in defaults ([`defaults`])
//! 2. optional TOML file
//! 3. environment variables prefixed `CONNECTOR_`, nested keys separated by `__`
//!
//! ## Usage
//!
//! ```rust
//! use connector_config::ConnectorSettings;
//!
//! let settings = ConnectorSettings::default();
//! assert_eq!(settings.cache.orders_keep_count, 1000);
//!
//! let backtest = ConnectorSettings::backtest();
//! assert!(!backtest.pipeline.offline);
//! ```

pub mod defaults;
pub mod settings;

pub use settings::{
    load_config, CacheSettings, ConnectorSettings, LoggingSettings, PipelineSettings,
    TimerSettings,
};
