//! Remote service interfaces.
//!
//! The node engine talks to the directory and the exchange server only
//! through these traits. [`crate::client`] implements them over TCP, and
//! [`crate::host`] serves any implementation of them on a TCP listener.

use crate::conn::WireError;
use agora_types::exchange::{
    Channel, ConfirmResponse, Demand, Mbus, MbusMsg, MbusOpt, MbusState, Supply, Target,
};
use agora_types::node::{Ack, KeepAliveResponse, NodeIdentity, NodeInfo, NodeUpdate};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// A server-ordered stream of records. `None` marks a clean end of stream.
pub type RecordStream<T> = Pin<Box<dyn Stream<Item = Result<T, WireError>> + Send>>;

/// Node registration and liveness.
#[async_trait]
pub trait DirectoryService: Send + Sync + 'static {
    /// Register a node and obtain its identity.
    async fn register_node(&self, info: NodeInfo) -> Result<NodeIdentity, WireError>;

    /// Revoke a previously issued identity.
    async fn unregister_node(&self, identity: NodeIdentity) -> Result<Ack, WireError>;

    /// Report liveness; the answer may carry a command.
    async fn keep_alive(&self, update: NodeUpdate) -> Result<KeepAliveResponse, WireError>;

    /// Look up the registration record of a node number.
    async fn query_node(&self, node_id: i32) -> Result<NodeInfo, WireError>;
}

/// Demand/supply negotiation and message buses.
#[async_trait]
pub trait ExchangeService: Send + Sync + 'static {
    async fn notify_demand(&self, demand: Demand) -> Result<Ack, WireError>;

    async fn notify_supply(&self, supply: Supply) -> Result<Ack, WireError>;

    async fn propose_demand(&self, demand: Demand) -> Result<Ack, WireError>;

    async fn propose_supply(&self, supply: Supply) -> Result<Ack, WireError>;

    /// Select a supply; the answer carries the bus opened for the match.
    async fn select_supply(&self, target: Target) -> Result<ConfirmResponse, WireError>;

    async fn select_demand(&self, target: Target) -> Result<ConfirmResponse, WireError>;

    async fn confirm(&self, target: Target) -> Result<Ack, WireError>;

    async fn send_msg(&self, msg: MbusMsg) -> Result<Ack, WireError>;

    async fn close_mbus(&self, mbus: Mbus) -> Result<Ack, WireError>;

    /// Create a bus directly, without a select/confirm exchange.
    async fn create_mbus(&self, opt: MbusOpt) -> Result<Mbus, WireError>;

    async fn get_mbus_state(&self, mbus: Mbus) -> Result<MbusState, WireError>;

    async fn subscribe_demand(&self, channel: Channel) -> Result<RecordStream<Demand>, WireError>;

    async fn subscribe_supply(&self, channel: Channel) -> Result<RecordStream<Supply>, WireError>;

    async fn subscribe_mbus(&self, mbus: Mbus) -> Result<RecordStream<MbusMsg>, WireError>;
}
