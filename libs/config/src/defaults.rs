//! Default values shared by the configuration structs and their consumers

/// Prefix for environment overrides, e.g. `CONNECTOR_CACHE__ORDERS_KEEP_COUNT`
pub const ENV_PREFIX: &str = "CONNECTOR";

/// Separator between nested keys in environment overrides
pub const ENV_SEPARATOR: &str = "__";

/// Entity cache retention
pub mod cache {
    /// Orders retained before recycling (terminal orders only)
    pub const ORDERS_KEEP_COUNT: usize = 1000;

    /// Public trades retained before recycling
    pub const TRADES_KEEP_COUNT: usize = 100_000;
}

/// Adapter pipeline
pub mod pipeline {
    /// Lookup timeout (milliseconds), measured in inbound message time
    pub const LOOKUP_TIMEOUT_MS: u64 = 10_000;

    /// Messages held while disconnected
    pub const OFFLINE_BUFFER_CAPACITY: usize = 10_000;
}

/// Periodic timer
pub mod timer {
    /// Minimum market time elapsed between time-change events (milliseconds)
    pub const TIME_CHANGE_INTERVAL_MS: u64 = 10;

    /// Wall-clock tick of the timer thread (milliseconds)
    pub const TICK_INTERVAL_MS: u64 = 100;
}

/// Logging
pub mod logging {
    pub const LEVEL: &str = "info";
}
