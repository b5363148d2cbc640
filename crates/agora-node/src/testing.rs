//! In-process directory and exchange doubles shared by the unit tests.

use crate::session::NodeSession;
use agora_types::config::{KeepAliveConfig, ServerOptions};
use agora_types::exchange::{
    Channel, ConfirmResponse, Demand, Mbus, MbusMsg, MbusOpt, MbusState, MbusStatus, Supply,
    Target,
};
use agora_types::node::{
    Ack, KeepAliveCommand, KeepAliveResponse, NodeIdentity, NodeInfo, NodeType, NodeUpdate,
};
use agora_types::IdType;
use agora_wire::{DirectoryService, ExchangeService, RecordStream, WireError};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn demand(id: IdType, channel_type: u32, name: &str) -> Demand {
    Demand {
        id,
        sender_id: 500,
        target_id: 0,
        channel_type,
        demand_name: name.to_string(),
        ts: Utc::now(),
        arg_json: "{}".to_string(),
        mbus_id: 0,
        cdata: None,
    }
}

pub fn supply(id: IdType, channel_type: u32, name: &str) -> Supply {
    Supply {
        id,
        sender_id: 600,
        target_id: 0,
        channel_type,
        supply_name: name.to_string(),
        ts: Utc::now(),
        arg_json: "{}".to_string(),
        mbus_id: 0,
        cdata: None,
    }
}

pub fn server_options() -> ServerOptions {
    ServerOptions {
        node_type: NodeType::Server,
        server_info: "127.0.0.1:10000".to_string(),
        ..Default::default()
    }
}

/// A session registered as node `node_id` against a fresh [`MockDirectory`].
pub async fn registered_session(node_id: i32) -> NodeSession {
    let session = NodeSession::new(&KeepAliveConfig {
        jitter: 0.0,
        ..Default::default()
    });
    session
        .register_with(
            Arc::new(MockDirectory::new(node_id)),
            "sensor-1",
            &[10],
            None,
        )
        .await
        .unwrap();
    session
}

/// Directory that hands out consecutive node numbers and records every call.
pub struct MockDirectory {
    next_node_id: AtomicI32,
    registrations: Mutex<Vec<NodeInfo>>,
    names: Mutex<HashMap<i32, String>>,
    updates: Mutex<Vec<NodeUpdate>>,
    keepalive_attempts: AtomicUsize,
    unregistrations: AtomicUsize,
    commands: Mutex<VecDeque<KeepAliveCommand>>,
    fail_register: AtomicBool,
    fail_keepalive: AtomicBool,
    fail_unregister: AtomicBool,
}

impl MockDirectory {
    pub fn new(first_node_id: i32) -> Self {
        Self {
            next_node_id: AtomicI32::new(first_node_id),
            registrations: Mutex::new(Vec::new()),
            names: Mutex::new(HashMap::new()),
            updates: Mutex::new(Vec::new()),
            keepalive_attempts: AtomicUsize::new(0),
            unregistrations: AtomicUsize::new(0),
            commands: Mutex::new(VecDeque::new()),
            fail_register: AtomicBool::new(false),
            fail_keepalive: AtomicBool::new(false),
            fail_unregister: AtomicBool::new(false),
        }
    }

    /// Answer the next heartbeat with `command`.
    pub fn push_command(&self, command: KeepAliveCommand) {
        self.commands.lock().unwrap().push_back(command);
    }

    pub fn fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    pub fn fail_keepalive(&self, fail: bool) {
        self.fail_keepalive.store(fail, Ordering::SeqCst);
    }

    pub fn fail_unregister(&self, fail: bool) {
        self.fail_unregister.store(fail, Ordering::SeqCst);
    }

    pub fn registrations(&self) -> Vec<NodeInfo> {
        self.registrations.lock().unwrap().clone()
    }

    /// Heartbeats that were answered.
    pub fn updates(&self) -> Vec<NodeUpdate> {
        self.updates.lock().unwrap().clone()
    }

    /// Heartbeats received, answered or not.
    pub fn keepalive_attempts(&self) -> usize {
        self.keepalive_attempts.load(Ordering::SeqCst)
    }

    pub fn unregistrations(&self) -> usize {
        self.unregistrations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryService for MockDirectory {
    async fn register_node(&self, info: NodeInfo) -> Result<NodeIdentity, WireError> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(WireError::ConnectionClosed);
        }
        let node_id = self.next_node_id.fetch_add(1, Ordering::SeqCst);
        self.names
            .lock()
            .unwrap()
            .insert(node_id, info.node_name.clone());
        self.registrations.lock().unwrap().push(info);
        Ok(NodeIdentity {
            node_id,
            secret: 1_000 + node_id as u64,
            server_info: "127.0.0.1:10000".to_string(),
            keepalive_duration: 5,
        })
    }

    async fn unregister_node(&self, _identity: NodeIdentity) -> Result<Ack, WireError> {
        self.unregistrations.fetch_add(1, Ordering::SeqCst);
        if self.fail_unregister.load(Ordering::SeqCst) {
            return Err(WireError::ConnectionClosed);
        }
        Ok(Ack::ok())
    }

    async fn keep_alive(&self, update: NodeUpdate) -> Result<KeepAliveResponse, WireError> {
        self.keepalive_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_keepalive.load(Ordering::SeqCst) {
            return Err(WireError::ConnectionClosed);
        }
        self.updates.lock().unwrap().push(update);
        let command = self.commands.lock().unwrap().pop_front().unwrap_or_default();
        Ok(KeepAliveResponse {
            ok: true,
            command,
            err: String::new(),
        })
    }

    async fn query_node(&self, node_id: i32) -> Result<NodeInfo, WireError> {
        let name = self.names.lock().unwrap().get(&node_id).cloned();
        let Some(node_name) = name else {
            return Err(WireError::remote(404, format!("unknown node {node_id}")));
        };
        let registrations = self.registrations.lock().unwrap();
        let mut info = registrations[0].clone();
        info.node_name = node_name;
        Ok(info)
    }
}

/// Exchange server double with scripted answers and streams.
#[derive(Default)]
pub struct MockExchange {
    calls: AtomicUsize,
    closed: AtomicUsize,
    mbus_id: AtomicU64,
    refusal: Mutex<Option<String>>,
    fail: AtomicBool,
    fail_once: Mutex<Option<WireError>>,
    stall: AtomicBool,
    break_streams: AtomicBool,
    keep_streams_open: AtomicBool,
    demands: Mutex<Vec<Demand>>,
    supplies: Mutex<Vec<Supply>>,
    targets: Mutex<Vec<Target>>,
    messages: Mutex<Vec<MbusMsg>>,
    buses: Mutex<Vec<Mbus>>,
    created: Mutex<Vec<MbusOpt>>,
    queried: Mutex<Vec<Mbus>>,
    demand_feed: Mutex<Vec<Demand>>,
    supply_feed: Mutex<Vec<Supply>>,
    bus_feed: Mutex<Vec<MbusMsg>>,
}

impl MockExchange {
    /// Answer unary calls with `ok = false` from now on.
    pub fn refuse(&self, err: &str) {
        *self.refusal.lock().unwrap() = Some(err.to_string());
    }

    /// Fail every call with a closed connection.
    pub fn fail_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Fail the next call with `err`.
    pub fn fail_with(&self, err: WireError) {
        *self.fail_once.lock().unwrap() = Some(err);
    }

    /// Never answer.
    pub fn stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    /// End every stream with an error after its records.
    pub fn break_streams(&self, on: bool) {
        self.break_streams.store(on, Ordering::SeqCst);
    }

    /// Keep every stream open after its records.
    pub fn keep_streams_open(&self, on: bool) {
        self.keep_streams_open.store(on, Ordering::SeqCst);
    }

    pub fn set_mbus_id(&self, mbus_id: IdType) {
        self.mbus_id.store(mbus_id, Ordering::SeqCst);
    }

    pub fn set_demands(&self, feed: Vec<Demand>) {
        *self.demand_feed.lock().unwrap() = feed;
    }

    pub fn set_supplies(&self, feed: Vec<Supply>) {
        *self.supply_feed.lock().unwrap() = feed;
    }

    pub fn set_bus_messages(&self, feed: Vec<MbusMsg>) {
        *self.bus_feed.lock().unwrap() = feed;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Demands received by notify or propose.
    pub fn demands(&self) -> Vec<Demand> {
        self.demands.lock().unwrap().clone()
    }

    /// Supplies received by notify or propose.
    pub fn supplies(&self) -> Vec<Supply> {
        self.supplies.lock().unwrap().clone()
    }

    /// Targets received by select and confirm.
    pub fn targets(&self) -> Vec<Target> {
        self.targets.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<MbusMsg> {
        self.messages.lock().unwrap().clone()
    }

    pub fn subscribed_buses(&self) -> Vec<Mbus> {
        self.buses.lock().unwrap().clone()
    }

    /// Options received by create_mbus.
    pub fn created_buses(&self) -> Vec<MbusOpt> {
        self.created.lock().unwrap().clone()
    }

    /// Buses whose state was asked for.
    pub fn queried_buses(&self) -> Vec<Mbus> {
        self.queried.lock().unwrap().clone()
    }

    async fn gate(&self) -> Result<(), WireError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(WireError::ConnectionClosed);
        }
        if let Some(err) = self.fail_once.lock().unwrap().take() {
            return Err(err);
        }
        Ok(())
    }

    fn ack(&self) -> Ack {
        match self.refusal.lock().unwrap().clone() {
            Some(err) => Ack::refused(err),
            None => Ack::ok(),
        }
    }

    fn confirm_response(&self, mbus_id: IdType) -> ConfirmResponse {
        match self.refusal.lock().unwrap().clone() {
            Some(err) => ConfirmResponse {
                ok: false,
                mbus_id: 0,
                err,
            },
            None => ConfirmResponse {
                ok: true,
                mbus_id,
                err: String::new(),
            },
        }
    }

    fn feed<T: Send + 'static>(&self, records: Vec<T>) -> RecordStream<T> {
        let head = stream::iter(records.into_iter().map(Ok));
        if self.break_streams.load(Ordering::SeqCst) {
            head.chain(stream::once(futures::future::ready(Err(
                WireError::remote(503, "stream reset"),
            ))))
            .boxed()
        } else if self.keep_streams_open.load(Ordering::SeqCst) {
            head.chain(stream::pending()).boxed()
        } else {
            head.boxed()
        }
    }
}

#[async_trait]
impl ExchangeService for MockExchange {
    async fn notify_demand(&self, demand: Demand) -> Result<Ack, WireError> {
        self.gate().await?;
        self.demands.lock().unwrap().push(demand);
        Ok(self.ack())
    }

    async fn notify_supply(&self, supply: Supply) -> Result<Ack, WireError> {
        self.gate().await?;
        self.supplies.lock().unwrap().push(supply);
        Ok(self.ack())
    }

    async fn propose_demand(&self, demand: Demand) -> Result<Ack, WireError> {
        self.gate().await?;
        self.demands.lock().unwrap().push(demand);
        Ok(self.ack())
    }

    async fn propose_supply(&self, supply: Supply) -> Result<Ack, WireError> {
        self.gate().await?;
        self.supplies.lock().unwrap().push(supply);
        Ok(self.ack())
    }

    async fn select_supply(&self, target: Target) -> Result<ConfirmResponse, WireError> {
        self.gate().await?;
        self.targets.lock().unwrap().push(target);
        Ok(self.confirm_response(self.mbus_id.load(Ordering::SeqCst)))
    }

    async fn select_demand(&self, target: Target) -> Result<ConfirmResponse, WireError> {
        self.gate().await?;
        self.targets.lock().unwrap().push(target);
        Ok(self.confirm_response(0))
    }

    async fn confirm(&self, target: Target) -> Result<Ack, WireError> {
        self.gate().await?;
        self.targets.lock().unwrap().push(target);
        Ok(self.ack())
    }

    async fn send_msg(&self, msg: MbusMsg) -> Result<Ack, WireError> {
        self.gate().await?;
        self.messages.lock().unwrap().push(msg);
        Ok(self.ack())
    }

    async fn close_mbus(&self, _mbus: Mbus) -> Result<Ack, WireError> {
        self.gate().await?;
        let ack = self.ack();
        if ack.ok {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(ack)
    }

    async fn create_mbus(&self, opt: MbusOpt) -> Result<Mbus, WireError> {
        self.gate().await?;
        self.created.lock().unwrap().push(opt);
        Ok(Mbus {
            client_id: 0,
            mbus_id: self.mbus_id.load(Ordering::SeqCst),
            arg_json: String::new(),
        })
    }

    async fn get_mbus_state(&self, mbus: Mbus) -> Result<MbusState, WireError> {
        self.gate().await?;
        let subscribers = self
            .created
            .lock()
            .unwrap()
            .last()
            .map(|opt| opt.subscribers.clone())
            .unwrap_or_default();
        let mbus_id = mbus.mbus_id;
        self.queried.lock().unwrap().push(mbus);
        let status = if self.closed.load(Ordering::SeqCst) > 0 {
            MbusStatus::Closed
        } else if subscribers.is_empty() {
            MbusStatus::Initialized
        } else {
            MbusStatus::Subscribers
        };
        Ok(MbusState {
            mbus_id,
            status,
            subscribers,
        })
    }

    async fn subscribe_demand(&self, _channel: Channel) -> Result<RecordStream<Demand>, WireError> {
        self.gate().await?;
        let records = self.demand_feed.lock().unwrap().clone();
        Ok(self.feed(records))
    }

    async fn subscribe_supply(&self, _channel: Channel) -> Result<RecordStream<Supply>, WireError> {
        self.gate().await?;
        let records = self.supply_feed.lock().unwrap().clone();
        Ok(self.feed(records))
    }

    async fn subscribe_mbus(&self, mbus: Mbus) -> Result<RecordStream<MbusMsg>, WireError> {
        self.gate().await?;
        self.buses.lock().unwrap().push(mbus);
        let records = self.bus_feed.lock().unwrap().clone();
        Ok(self.feed(records))
    }
}
