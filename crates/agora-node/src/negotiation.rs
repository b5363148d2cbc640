//! Negotiation client: one handle per channel type.
//!
//! A [`NegotiationClient`] advertises demand and supply on its channel,
//! proposes and selects matches, confirms them, and runs subscription loops
//! that hand each received record to a callback in server order.

use crate::error::{bounded, NodeError, NodeResult};
use crate::idgen::IdGenerator;
use crate::session::NodeSession;
use crate::state::NodeState;
use agora_types::config::DEFAULT_CALL_TIMEOUT_SECS;
use agora_types::exchange::{Channel, Demand, DemandOpts, Supply, SupplyOpts, Target};
use agora_types::node::Ack;
use agora_types::IdType;
use agora_wire::{ExchangeService, RecordStream, TcpExchangeClient, WireError};
use chrono::Utc;
use futures::StreamExt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Per-channel negotiation handle.
pub struct NegotiationClient {
    pub(crate) exchange: Arc<dyn ExchangeService>,
    pub(crate) channel: Channel,
    pub(crate) ids: Arc<IdGenerator>,
    pub(crate) node_state: Arc<NodeState>,
    /// Open message bus, `0` when none.
    pub(crate) mbus_id: Mutex<IdType>,
    pub(crate) call_timeout: Duration,
}

impl NegotiationClient {
    /// Create a client for `channel_type` on a registered session.
    ///
    /// Fails with [`NodeError::NotRegistered`] until the session has an identity.
    pub fn new(
        session: &NodeSession,
        exchange: Arc<dyn ExchangeService>,
        channel_type: u32,
        arg_json: impl Into<String>,
    ) -> NodeResult<Self> {
        let ids = session.ids();
        let client_id = ids.generate()?;
        debug!(client_id, channel_type, "Negotiation client created");
        Ok(Self {
            exchange,
            channel: Channel {
                client_id,
                channel_type,
                arg_json: arg_json.into(),
            },
            ids,
            node_state: session.node_state(),
            mbus_id: Mutex::new(0),
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
        })
    }

    /// Dial the exchange server at `server_addr` and create a client on it.
    pub async fn connect(
        session: &NodeSession,
        server_addr: &str,
        channel_type: u32,
        arg_json: impl Into<String>,
    ) -> NodeResult<Self> {
        let exchange = TcpExchangeClient::connect(server_addr).await?;
        Self::new(session, Arc::new(exchange), channel_type, arg_json)
    }

    /// Override the bound on each unary call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn client_id(&self) -> IdType {
        self.channel.client_id
    }

    pub fn channel_type(&self) -> u32 {
        self.channel.channel_type
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Run one exchange call under the call timeout, logging failures.
    pub(crate) async fn call<T, F>(&self, operation: &'static str, call: F) -> NodeResult<T>
    where
        F: Future<Output = Result<T, WireError>>,
    {
        bounded(operation, self.call_timeout, call)
            .await
            .map_err(|e| {
                warn!(client_id = self.client_id(), operation, error = %e, "Exchange call failed");
                e
            })
    }

    fn new_demand(&self, id: IdType, target_id: IdType, opts: &DemandOpts) -> Demand {
        Demand {
            id,
            sender_id: self.channel.client_id,
            target_id,
            channel_type: self.channel.channel_type,
            demand_name: opts.name.clone(),
            ts: Utc::now(),
            arg_json: opts.json.clone(),
            mbus_id: 0,
            cdata: opts.cdata.clone(),
        }
    }

    fn new_supply(&self, id: IdType, target_id: IdType, opts: &SupplyOpts) -> Supply {
        Supply {
            id,
            sender_id: self.channel.client_id,
            target_id,
            channel_type: self.channel.channel_type,
            supply_name: opts.name.clone(),
            ts: Utc::now(),
            arg_json: opts.json.clone(),
            mbus_id: 0,
            cdata: opts.cdata.clone(),
        }
    }

    /// Broadcast a demand on this channel. On success `opts.id` holds the new id.
    pub async fn notify_demand(&self, opts: &mut DemandOpts) -> NodeResult<IdType> {
        let id = self.ids.generate()?;
        let demand = self.new_demand(id, 0, opts);
        let ack = self.call("notify_demand", self.exchange.notify_demand(demand)).await?;
        accepted(ack)?;
        opts.id = id;
        debug!(client_id = self.client_id(), id, name = %opts.name, "Demand notified");
        Ok(id)
    }

    /// Broadcast a supply on this channel. On success `opts.id` holds the new id.
    pub async fn notify_supply(&self, opts: &mut SupplyOpts) -> NodeResult<IdType> {
        let id = self.ids.generate()?;
        let supply = self.new_supply(id, 0, opts);
        let ack = self.call("notify_supply", self.exchange.notify_supply(supply)).await?;
        accepted(ack)?;
        opts.id = id;
        debug!(client_id = self.client_id(), id, name = %opts.name, "Supply notified");
        Ok(id)
    }

    /// Answer the demand `opts.target` with a supply proposal.
    ///
    /// The proposal is tracked until it is confirmed.
    pub async fn propose_supply(&self, opts: &mut SupplyOpts) -> NodeResult<IdType> {
        let id = self.ids.generate()?;
        let supply = self.new_supply(id, opts.target, opts);
        let ack = self
            .call("propose_supply", self.exchange.propose_supply(supply.clone()))
            .await?;
        accepted(ack)?;
        self.node_state.propose_supply(supply);
        opts.id = id;
        Ok(id)
    }

    /// Answer the supply `opts.target` with a demand proposal.
    pub async fn propose_demand(&self, opts: &mut DemandOpts) -> NodeResult<IdType> {
        let id = self.ids.generate()?;
        let demand = self.new_demand(id, opts.target, opts);
        let ack = self
            .call("propose_demand", self.exchange.propose_demand(demand.clone()))
            .await?;
        accepted(ack)?;
        self.node_state.propose_demand(demand);
        opts.id = id;
        Ok(id)
    }

    /// Select a supply. Returns the message bus id handed out by the server,
    /// which becomes this client's bus. Does not subscribe to the bus.
    pub async fn select_supply(&self, supply: &Supply) -> NodeResult<IdType> {
        let target = Target {
            id: self.ids.generate()?,
            sender_id: self.channel.client_id,
            target_id: supply.id,
            channel_type: supply.channel_type,
            mbus_id: 0,
        };
        let response = self.call("select_supply", self.exchange.select_supply(target)).await?;
        if !response.ok {
            return Err(NodeError::Rejected(response.err));
        }

        *self.mbus_id.lock().unwrap_or_else(|e| e.into_inner()) = response.mbus_id;
        if response.mbus_id != 0 {
            info!(
                client_id = self.client_id(),
                supply_id = supply.id,
                mbus_id = response.mbus_id,
                "Supply selected, message bus open"
            );
        }
        Ok(response.mbus_id)
    }

    /// Select a demand.
    pub async fn select_demand(&self, demand: &Demand) -> NodeResult<()> {
        let target = Target {
            id: self.ids.generate()?,
            sender_id: self.channel.client_id,
            target_id: demand.id,
            channel_type: demand.channel_type,
            mbus_id: 0,
        };
        let response = self.call("select_demand", self.exchange.select_demand(target)).await?;
        if !response.ok {
            return Err(NodeError::Rejected(response.err));
        }
        debug!(client_id = self.client_id(), demand_id = demand.id, "Demand selected");
        Ok(())
    }

    /// Accept the match identified by `id`; `id` becomes this client's bus.
    pub async fn confirm(&self, id: IdType) -> NodeResult<()> {
        let target = Target {
            id: self.ids.generate()?,
            sender_id: self.channel.client_id,
            target_id: id,
            channel_type: self.channel.channel_type,
            mbus_id: id,
        };
        let ack = self.call("confirm", self.exchange.confirm(target)).await?;
        accepted(ack)?;
        *self.mbus_id.lock().unwrap_or_else(|e| e.into_inner()) = id;
        info!(client_id = self.client_id(), mbus_id = id, "Match confirmed");
        Ok(())
    }

    /// Confirm `id` and retire the tracked proposal `proposal_id`.
    pub async fn confirm_proposal(&self, id: IdType, proposal_id: IdType) -> NodeResult<()> {
        self.confirm(id).await?;
        self.node_state.retire(proposal_id);
        Ok(())
    }

    /// Receive supplies on this channel until the stream ends, fails, or `cancel` turns true.
    pub async fn subscribe_supply<F>(
        &self,
        cancel: watch::Receiver<bool>,
        on_supply: F,
    ) -> NodeResult<()>
    where
        F: FnMut(Supply),
    {
        let stream = self
            .call("subscribe_supply", self.exchange.subscribe_supply(self.channel.clone()))
            .await?;
        receive_loop(
            "supply",
            self.client_id(),
            Some(self.node_state.as_ref()),
            stream,
            cancel,
            on_supply,
        )
        .await
    }

    /// Receive demands on this channel until the stream ends, fails, or `cancel` turns true.
    pub async fn subscribe_demand<F>(
        &self,
        cancel: watch::Receiver<bool>,
        on_demand: F,
    ) -> NodeResult<()>
    where
        F: FnMut(Demand),
    {
        let stream = self
            .call("subscribe_demand", self.exchange.subscribe_demand(self.channel.clone()))
            .await?;
        receive_loop(
            "demand",
            self.client_id(),
            Some(self.node_state.as_ref()),
            stream,
            cancel,
            on_demand,
        )
        .await
    }

    /// True if `supply` is addressed to one of `ids`.
    pub fn is_supply_target(&self, supply: &Supply, ids: &[IdType]) -> bool {
        ids.contains(&supply.target_id)
    }

    /// True if `demand` is addressed to one of `ids`.
    pub fn is_demand_target(&self, demand: &Demand, ids: &[IdType]) -> bool {
        ids.contains(&demand.target_id)
    }
}

fn accepted(ack: Ack) -> NodeResult<()> {
    if ack.ok {
        Ok(())
    } else {
        Err(NodeError::Rejected(ack.err))
    }
}

/// Resolves once `cancel` is true. Never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Drive a record stream into `on_record` until it ends.
///
/// While `node_state` is locked, records are dropped instead of delivered.
pub(crate) async fn receive_loop<T, F>(
    kind: &'static str,
    client_id: IdType,
    node_state: Option<&NodeState>,
    mut stream: RecordStream<T>,
    mut cancel: watch::Receiver<bool>,
    mut on_record: F,
) -> NodeResult<()>
where
    F: FnMut(T),
{
    let mut received = 0u64;
    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = cancelled(&mut cancel) => {
                info!(client_id, kind, received, "Subscription cancelled");
                return Ok(());
            }
        };

        match next {
            Some(Ok(record)) => {
                if node_state.is_some_and(|state| state.is_locked()) {
                    warn!(client_id, kind, "Node is locked, dropping record");
                    continue;
                }
                received += 1;
                on_record(record);
            }
            None => {
                info!(client_id, kind, received, "Subscription ended");
                return Ok(());
            }
            Some(Err(e)) => {
                error!(client_id, kind, received, error = %e, "Subscription failed");
                return Err(e.into());
            }
        }
    }
}
