//! Directory-service records: node registration, identity and liveness.

use serde::{Deserialize, Serialize};

/// Role a node plays in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Ordinary participant that advertises demand and supply.
    #[default]
    Provider,
    /// Exchange server.
    Server,
    /// Gateway bridging two exchange servers.
    Gateway,
}

/// Registration payload sent to the directory service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Human-readable node name.
    pub node_name: String,
    /// Role of the registering node.
    pub node_type: NodeType,
    /// Exchange server address offered by this node (servers and gateways only).
    #[serde(default)]
    pub server_info: String,
    /// Protocol base version this node was built against.
    pub protocol_version: String,
    /// Previous node number when re-registering, `-1` on first registration.
    pub with_node_id: i32,
    /// Cluster tag.
    #[serde(default)]
    pub cluster_id: i32,
    /// Area tag.
    #[serde(default)]
    pub area_id: String,
    /// Channel types this node intends to use.
    #[serde(default)]
    pub channel_types: Vec<u32>,
    /// Gateway description (gateways only).
    #[serde(default)]
    pub gw_info: String,
    /// Version of the running binary.
    #[serde(default)]
    pub bin_version: String,
}

/// Identity assigned by the directory service on successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Node number, unique within the directory. Seeds the ID generator.
    pub node_id: i32,
    /// Shared secret for subsequent directory calls. `0` means disconnected.
    pub secret: u64,
    /// Exchange server address assigned to this node.
    #[serde(default)]
    pub server_info: String,
    /// Heartbeat interval requested by the directory, in seconds.
    pub keepalive_duration: i32,
}

impl NodeIdentity {
    /// True once the identity has been revoked by unregistration.
    pub fn is_disconnected(&self) -> bool {
        self.secret == 0
    }
}

/// Load report attached to heartbeats from server-role nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    /// One-minute load average of the host.
    #[serde(default)]
    pub cpu: f64,
    /// Share of host memory in use, in percent.
    #[serde(default)]
    pub memory: f64,
    /// Messages handled since the previous heartbeat.
    pub msg_count: u64,
}

/// Liveness record sent with each heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub node_id: i32,
    pub secret: u64,
    /// Strictly increasing across the process lifetime.
    pub update_count: u64,
    /// Application-defined health code.
    pub node_status: i32,
    /// Application-defined health detail.
    pub node_arg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ServerStatus>,
}

/// Command piggy-backed on a heartbeat response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepAliveCommand {
    #[default]
    None,
    /// Directory restarted; the node must register again.
    Reconnect,
    /// The exchange server assignment changed.
    ServerChange,
    /// A provider dropped off a server (delivered to server nodes only).
    ProviderDisconnect,
}

/// Directory answer to a heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveResponse {
    pub ok: bool,
    #[serde(default)]
    pub command: KeepAliveCommand,
    #[serde(default)]
    pub err: String,
}

/// Generic acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(default)]
    pub err: String,
}

impl Ack {
    /// A successful acknowledgement.
    pub fn ok() -> Self {
        Self {
            ok: true,
            err: String::new(),
        }
    }

    /// A refusal carrying a reason.
    pub fn refused(err: impl Into<String>) -> Self {
        Self {
            ok: false,
            err: err.into(),
        }
    }
}
