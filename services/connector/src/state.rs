//! Connection state machine
//!
//! ```text
//! Disconnected ──connect──► Connecting ──Connect ok──► Connected ──disconnect──► Disconnecting
//!      ▲  ▲                     │                          │                        │
//!      │  └──── Failed ◄────────┘ Connect error            │ Disconnect             │
//!      │                                                   ▼                        │
//!      └───────────────────────────────────────────── Disconnected ◄────────────────┘
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Failed,
}

impl ConnectionState {
    /// States from which `connect` may start a new attempt
    pub fn can_connect(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }

    pub fn can_disconnect(self) -> bool {
        self == ConnectionState::Connected
    }
}
