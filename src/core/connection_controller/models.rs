use std::time::Duration;

use ever_utils::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionControllerConfig {
    /// Known network presets. Alternates are taken from the same group
    pub presets: Vec<ConnectionData>,
    /// Connectivity test timeout
    #[serde(with = "serde_duration_ms")]
    pub probe_timeout: Duration,
    /// Delay before the second attempt of the initial connection
    #[serde(with = "serde_duration_ms")]
    pub initial_retry_delay: Duration,
    /// Local clock polling interval
    #[serde(with = "serde_duration_ms")]
    pub clock_check_interval: Duration,
    /// Local clock deviation which triggers the offset recalculation
    #[serde(with = "serde_duration_ms")]
    pub clock_jump_threshold: Duration,
}

impl Default for ConnectionControllerConfig {
    fn default() -> Self {
        Self {
            presets: Vec::new(),
            probe_timeout: Duration::from_secs(10),
            initial_retry_delay: Duration::from_secs(5),
            clock_check_interval: Duration::from_secs(1),
            clock_jump_threshold: Duration::from_secs(2),
        }
    }
}

/// Network preset
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionData {
    pub id: u32,
    pub name: String,
    /// Network group, e.g. `mainnet`
    pub group: String,
    #[serde(flatten)]
    pub kind: ConnectionKind,
    /// Account which is requested during the connectivity test
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_address: Option<Address>,
}

impl ConnectionData {
    pub fn probe_address(&self) -> Address {
        match self.probe_address {
            Some(address) => address,
            None => default_probe_address(),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ConnectionKind {
    #[serde(rename_all = "camelCase")]
    Graphql {
        endpoints: Vec<String>,
        #[serde(default)]
        local: bool,
    },
    Jrpc {
        endpoint: String,
    },
    Proto {
        endpoint: String,
    },
}

/// Connection state exposed to the UI
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub selected: Option<ConnectionData>,
    pub pending: Option<ConnectionData>,
    pub failed: Option<ConnectionData>,
}

#[derive(thiserror::Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionError {
    #[error("Connection test cancelled")]
    Cancelled,
    #[error("Connection test timeout")]
    Timeout,
    #[error("No suitable connection found")]
    NoSuitableConnection,
    #[error("Unknown connection preset")]
    UnknownPreset,
}

/// Elector contract. Exists in every network
fn default_probe_address() -> Address {
    Address::new(-1, UInt256::from_be_bytes([0x33; 32]))
}
