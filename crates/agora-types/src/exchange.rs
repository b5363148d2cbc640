//! Exchange-server records: demand, supply, selection targets and message buses.

use crate::IdType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque application payload carried by negotiation records and bus messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    /// Raw bytes; the protocol never interprets them.
    #[serde(default)]
    pub entity: Vec<u8>,
}

impl Content {
    /// Wrap raw bytes.
    pub fn new(entity: impl Into<Vec<u8>>) -> Self {
        Self {
            entity: entity.into(),
        }
    }
}

/// A request advertised on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Demand {
    pub id: IdType,
    pub sender_id: IdType,
    /// Id of the record this demand answers, `0` for broadcast.
    #[serde(default)]
    pub target_id: IdType,
    pub channel_type: u32,
    pub demand_name: String,
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub arg_json: String,
    /// Bus assigned by a select exchange, `0` when none.
    #[serde(default)]
    pub mbus_id: IdType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdata: Option<Content>,
}

/// An offer advertised on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supply {
    pub id: IdType,
    pub sender_id: IdType,
    /// Id of the record this supply answers, `0` for broadcast.
    #[serde(default)]
    pub target_id: IdType,
    pub channel_type: u32,
    pub supply_name: String,
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub arg_json: String,
    #[serde(default)]
    pub mbus_id: IdType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdata: Option<Content>,
}

/// Reference to a previously received record, used by select and confirm.
///
/// `target_id` is always the id of a negotiation record, never a sender id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Fresh correlation id for this request.
    pub id: IdType,
    pub sender_id: IdType,
    pub target_id: IdType,
    pub channel_type: u32,
    #[serde(default)]
    pub mbus_id: IdType,
}

/// Subscription scope of one client on one channel type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub client_id: IdType,
    pub channel_type: u32,
    #[serde(default)]
    pub arg_json: String,
}

/// Reference to a message bus owned by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mbus {
    pub client_id: IdType,
    pub mbus_id: IdType,
    #[serde(default)]
    pub arg_json: String,
}

/// Visibility of a bus created on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MbusType {
    #[default]
    Public,
    /// Only the listed subscribers may join.
    Private,
}

/// Options for creating a bus outside of a select/confirm exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MbusOpt {
    #[serde(default)]
    pub mbus_type: MbusType,
    /// Client ids allowed on a private bus.
    #[serde(default)]
    pub subscribers: Vec<IdType>,
}

/// Lifecycle of a bus as seen by the exchange server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MbusStatus {
    /// Created, nobody subscribed yet.
    #[default]
    Initialized,
    Subscribers,
    Closed,
    /// Unknown or hidden bus id.
    Invalid,
}

/// Server report on one bus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MbusState {
    pub mbus_id: IdType,
    #[serde(default)]
    pub status: MbusStatus,
    /// Subscribed client ids, filled when `status` is `Subscribers`.
    #[serde(default)]
    pub subscribers: Vec<IdType>,
}

/// A message sent over an open bus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MbusMsg {
    pub msg_id: IdType,
    pub sender_id: IdType,
    /// Recipient on the bus, `0` for every participant.
    #[serde(default)]
    pub target_id: IdType,
    pub mbus_id: IdType,
    #[serde(default)]
    pub msg_type: u32,
    #[serde(default)]
    pub msg_info: String,
    #[serde(default)]
    pub arg_json: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdata: Option<Content>,
}

/// Server answer to select and confirm requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmResponse {
    pub ok: bool,
    /// Bus opened by the exchange, `0` when none.
    #[serde(default)]
    pub mbus_id: IdType,
    #[serde(default)]
    pub err: String,
}

/// Sender options for a demand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemandOpts {
    /// Assigned after a successful send.
    pub id: IdType,
    /// Record being answered, `0` for broadcast.
    pub target: IdType,
    pub name: String,
    pub json: String,
    pub cdata: Option<Content>,
}

impl DemandOpts {
    /// Broadcast demand with a name and JSON argument.
    pub fn new(name: impl Into<String>, json: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            json: json.into(),
            ..Default::default()
        }
    }
}

/// Sender options for a supply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupplyOpts {
    /// Assigned after a successful send.
    pub id: IdType,
    /// Record being answered, `0` for broadcast.
    pub target: IdType,
    pub name: String,
    pub json: String,
    pub cdata: Option<Content>,
}

impl SupplyOpts {
    /// Broadcast supply with a name and JSON argument.
    pub fn new(name: impl Into<String>, json: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            json: json.into(),
            ..Default::default()
        }
    }

    /// Supply answering a specific demand.
    pub fn answering(demand: &Demand, name: impl Into<String>, json: impl Into<String>) -> Self {
        Self {
            target: demand.id,
            ..Self::new(name, json)
        }
    }
}
