//! Configuration types shared by the node engine and the CLI.
//!
//! Every section uses `#[serde(default)]`, so a partial TOML file only needs to
//! name the values it overrides.

use crate::node::NodeType;
use serde::{Deserialize, Serialize};

/// Default directory service address.
pub const DEFAULT_DIRECTORY_ADDR: &str = "127.0.0.1:9990";

/// Default bound on every negotiation and bus call (seconds).
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 10;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgoraConfig {
    pub node: NodeConfig,
    pub keepalive: KeepAliveConfig,
    pub exchange: ExchangeConfig,
}

/// Identity and capabilities announced at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Name reported to the directory.
    pub name: String,
    /// Directory service address (`host:port`).
    pub directory_addr: String,
    /// Channel types this node participates in.
    pub channel_types: Vec<u32>,
    /// Present when this node offers a server or gateway role.
    pub server: Option<ServerOptions>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "agora-node".to_string(),
            directory_addr: DEFAULT_DIRECTORY_ADDR.to_string(),
            channel_types: Vec::new(),
            server: None,
        }
    }
}

/// Registration options for server and gateway nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub node_type: NodeType,
    /// Address this node serves the exchange on.
    pub server_info: String,
    pub cluster_id: i32,
    pub area_id: String,
    pub gw_info: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            node_type: NodeType::Server,
            server_info: String::new(),
            cluster_id: 0,
            area_id: "Default".to_string(),
            gw_info: String::new(),
        }
    }
}

/// Liveness loop tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    /// Upper bound on the heartbeat delay while the directory keeps failing.
    pub max_backoff_secs: u64,
    /// Jitter factor applied to backed-off delays (0.0 disables jitter).
    pub jitter: f64,
    /// How long a server-change lock is held before node state is cleared.
    pub server_change_wait_secs: u64,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            max_backoff_secs: 300,
            jitter: 0.1,
            server_change_wait_secs: 30,
        }
    }
}

/// Exchange call tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Exchange server address; empty means "use the one assigned at registration".
    pub server_addr: String,
    /// Bound on each unary call (seconds).
    pub call_timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            server_addr: String::new(),
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
        }
    }
}
