//! Wire protocol message types.
//!
//! All communication with the directory and exchange services uses
//! JSON-framed messages over TCP. Each message is prefixed with a 4-byte
//! big-endian length header.

use agora_types::exchange::{
    Channel, ConfirmResponse, Demand, Mbus, MbusMsg, MbusOpt, MbusState, Supply, Target,
};
use agora_types::node::{Ack, KeepAliveResponse, NodeIdentity, NodeInfo, NodeUpdate};
use serde::{Deserialize, Serialize};

/// A wire protocol message (envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// Correlation id; a response carries the id of its request.
    pub id: u64,
    /// Message variant.
    #[serde(flatten)]
    pub kind: WireMessageKind,
}

/// The different kinds of wire messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessageKind {
    /// Call from a node to a service.
    #[serde(rename = "request")]
    Request(WireRequest),
    /// Answer to a request.
    #[serde(rename = "response")]
    Response(WireResponse),
    /// One element of a subscription stream.
    #[serde(rename = "item")]
    Item(StreamItem),
}

/// Request messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum WireRequest {
    #[serde(rename = "register_node")]
    RegisterNode { info: NodeInfo },
    #[serde(rename = "unregister_node")]
    UnRegisterNode { identity: NodeIdentity },
    #[serde(rename = "keep_alive")]
    KeepAlive { update: NodeUpdate },
    #[serde(rename = "query_node")]
    QueryNode { node_id: i32 },
    #[serde(rename = "notify_demand")]
    NotifyDemand { demand: Demand },
    #[serde(rename = "notify_supply")]
    NotifySupply { supply: Supply },
    #[serde(rename = "propose_demand")]
    ProposeDemand { demand: Demand },
    #[serde(rename = "propose_supply")]
    ProposeSupply { supply: Supply },
    #[serde(rename = "select_supply")]
    SelectSupply { target: Target },
    #[serde(rename = "select_demand")]
    SelectDemand { target: Target },
    #[serde(rename = "confirm")]
    Confirm { target: Target },
    #[serde(rename = "send_msg")]
    SendMsg { msg: MbusMsg },
    #[serde(rename = "close_mbus")]
    CloseMbus { mbus: Mbus },
    #[serde(rename = "create_mbus")]
    CreateMbus { opt: MbusOpt },
    #[serde(rename = "get_mbus_state")]
    GetMbusState { mbus: Mbus },
    /// Opens a stream of demands on this connection.
    #[serde(rename = "subscribe_demand")]
    SubscribeDemand { channel: Channel },
    /// Opens a stream of supplies on this connection.
    #[serde(rename = "subscribe_supply")]
    SubscribeSupply { channel: Channel },
    /// Opens a stream of bus messages on this connection.
    #[serde(rename = "subscribe_mbus")]
    SubscribeMbus { mbus: Mbus },
}

impl WireRequest {
    /// Method name, as it appears on the wire.
    pub fn method(&self) -> &'static str {
        match self {
            Self::RegisterNode { .. } => "register_node",
            Self::UnRegisterNode { .. } => "unregister_node",
            Self::KeepAlive { .. } => "keep_alive",
            Self::QueryNode { .. } => "query_node",
            Self::NotifyDemand { .. } => "notify_demand",
            Self::NotifySupply { .. } => "notify_supply",
            Self::ProposeDemand { .. } => "propose_demand",
            Self::ProposeSupply { .. } => "propose_supply",
            Self::SelectSupply { .. } => "select_supply",
            Self::SelectDemand { .. } => "select_demand",
            Self::Confirm { .. } => "confirm",
            Self::SendMsg { .. } => "send_msg",
            Self::CloseMbus { .. } => "close_mbus",
            Self::CreateMbus { .. } => "create_mbus",
            Self::GetMbusState { .. } => "get_mbus_state",
            Self::SubscribeDemand { .. } => "subscribe_demand",
            Self::SubscribeSupply { .. } => "subscribe_supply",
            Self::SubscribeMbus { .. } => "subscribe_mbus",
        }
    }

    /// True for the calls that turn the connection into a stream.
    pub fn is_subscription(&self) -> bool {
        matches!(
            self,
            Self::SubscribeDemand { .. } | Self::SubscribeSupply { .. } | Self::SubscribeMbus { .. }
        )
    }
}

/// Response messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum WireResponse {
    /// Identity assigned by the directory.
    #[serde(rename = "node_id")]
    NodeId { identity: NodeIdentity },
    /// Registration record of a queried node.
    #[serde(rename = "node_info")]
    NodeInfo { info: NodeInfo },
    /// Heartbeat answer.
    #[serde(rename = "keep_alive_result")]
    KeepAlive { response: KeepAliveResponse },
    /// Plain acknowledgement. Also opens every subscription stream.
    #[serde(rename = "ack")]
    Ack { ack: Ack },
    /// Select/confirm answer.
    #[serde(rename = "confirm_result")]
    Confirm { response: ConfirmResponse },
    /// Bus created on request.
    #[serde(rename = "mbus")]
    Mbus { mbus: Mbus },
    /// Bus status report.
    #[serde(rename = "mbus_state")]
    MbusState { state: MbusState },
    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
    },
}

/// Stream elements pushed after a subscription has been acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record")]
pub enum StreamItem {
    #[serde(rename = "demand")]
    Demand { demand: Demand },
    #[serde(rename = "supply")]
    Supply { supply: Supply },
    #[serde(rename = "mbus_msg")]
    MbusMsg { msg: MbusMsg },
    /// The server finished the stream normally.
    #[serde(rename = "end")]
    End,
}

/// Encode a wire message to bytes (4-byte big-endian length + JSON).
pub fn encode_message(msg: &WireMessage) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    let len = json.len() as u32;
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Parse a JSON body into a WireMessage.
pub fn decode_message(body: &[u8]) -> Result<WireMessage, serde_json::Error> {
    serde_json::from_slice(body)
}
