//! Node session: registration with the directory and the liveness loop.
//!
//! A [`NodeSession`] is a cheap, clonable handle. It owns the node identity,
//! the liveness record sent with each heartbeat, the id generator seeded from
//! the assigned node number, and the background task that keeps the
//! registration alive.
//!
//! Phases: `Unregistered -> Registering -> Active <-> Reconnecting`, and back
//! to `Unregistered` on unregistration or server change.

use crate::backoff::Backoff;
use crate::error::{bounded, NodeError, NodeResult};
use crate::idgen::IdGenerator;
use crate::load;
use crate::state::NodeState;
use agora_types::config::{AgoraConfig, KeepAliveConfig, ServerOptions};
use agora_types::node::{
    KeepAliveCommand, KeepAliveResponse, NodeIdentity, NodeInfo, NodeType, NodeUpdate,
    ServerStatus,
};
use agora_wire::{DirectoryService, TcpDirectoryClient};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Bound on each directory call made by the session.
const DIRECTORY_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Name returned by [`NodeSession::query_node_name`] when the lookup fails.
pub const UNKNOWN_NODE_NAME: &str = "Unknown";

/// Registration lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unregistered,
    Registering,
    Active,
    Reconnecting,
}

struct SessionState {
    phase: SessionPhase,
    directory: Option<Arc<dyn DirectoryService>>,
    identity: Option<NodeIdentity>,
    update: NodeUpdate,
    /// Last registration payload, replayed on reconnect.
    registration: Option<NodeInfo>,
}

struct KeepAliveTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct SessionInner {
    state: RwLock<SessionState>,
    ids: Arc<IdGenerator>,
    node_state: Arc<NodeState>,
    msg_count: AtomicU64,
    commands: broadcast::Sender<KeepAliveResponse>,
    keepalive: Mutex<Option<KeepAliveTask>>,
    /// Pending release of a deferred server change.
    server_change_timer: Mutex<Option<JoinHandle<()>>>,
    backoff: Backoff,
    server_change_wait: Duration,
}

/// Handle to a node's registration and liveness state.
#[derive(Clone)]
pub struct NodeSession {
    inner: Arc<SessionInner>,
}

impl Default for NodeSession {
    fn default() -> Self {
        Self::new(&KeepAliveConfig::default())
    }
}

impl NodeSession {
    /// Create an unregistered session.
    pub fn new(config: &KeepAliveConfig) -> Self {
        let (commands, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(SessionInner {
                state: RwLock::new(SessionState {
                    phase: SessionPhase::Unregistered,
                    directory: None,
                    identity: None,
                    update: NodeUpdate::default(),
                    registration: None,
                }),
                ids: Arc::new(IdGenerator::unseeded()),
                node_state: Arc::new(NodeState::new()),
                msg_count: AtomicU64::new(0),
                commands,
                keepalive: Mutex::new(None),
                server_change_timer: Mutex::new(None),
                backoff: Backoff {
                    max: Duration::from_secs(config.max_backoff_secs),
                    jitter: config.jitter,
                },
                server_change_wait: Duration::from_secs(config.server_change_wait_secs),
            }),
        }
    }

    /// Create an unregistered session tuned by `config.keepalive`.
    pub fn from_config(config: &AgoraConfig) -> Self {
        Self::new(&config.keepalive)
    }

    /// Dial the directory at `directory_addr` and register this node.
    ///
    /// Returns the exchange server address assigned to the node.
    pub async fn register(
        &self,
        directory_addr: &str,
        node_name: &str,
        channel_types: &[u32],
        server: Option<&ServerOptions>,
    ) -> NodeResult<String> {
        let client = TcpDirectoryClient::connect(directory_addr).await?;
        self.register_with(Arc::new(client), node_name, channel_types, server)
            .await
    }

    /// Register this node through an already connected directory service.
    pub async fn register_with(
        &self,
        directory: Arc<dyn DirectoryService>,
        node_name: &str,
        channel_types: &[u32],
        server: Option<&ServerOptions>,
    ) -> NodeResult<String> {
        self.stop_keepalive().await;

        let info = registration_info(node_name, channel_types, server);
        {
            let mut state = self.inner.state.write().await;
            state.phase = SessionPhase::Registering;
        }

        let result = bounded(
            "register_node",
            DIRECTORY_CALL_TIMEOUT,
            directory.register_node(info.clone()),
        )
        .await
        .and_then(|identity| {
            if self.inner.ids.reinitialize(identity.node_id as i64) {
                Ok(identity)
            } else {
                Err(NodeError::InvalidNodeNumber(identity.node_id as i64))
            }
        });

        let mut state = self.inner.state.write().await;
        let identity = match result {
            Ok(identity) => identity,
            Err(e) => {
                warn!(node = node_name, error = %e, "Node registration failed");
                state.identity = None;
                state.directory = None;
                state.registration = None;
                state.update = NodeUpdate {
                    update_count: state.update.update_count,
                    ..Default::default()
                };
                state.phase = SessionPhase::Unregistered;
                self.inner.ids.clear();
                return Err(e);
            }
        };

        info!(
            node = node_name,
            node_id = identity.node_id,
            server = %identity.server_info,
            keepalive_secs = identity.keepalive_duration,
            "Node registered"
        );

        let server_info = identity.server_info.clone();
        state.update = NodeUpdate {
            node_id: identity.node_id,
            secret: identity.secret,
            update_count: state.update.update_count,
            ..Default::default()
        };
        state.identity = Some(identity);
        state.registration = Some(info);
        state.directory = Some(directory);
        state.phase = SessionPhase::Active;
        drop(state);

        self.inner.node_state.reset();
        self.start_keepalive();
        Ok(server_info)
    }

    fn start_keepalive(&self) {
        let (stop, stop_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            liveness_loop(inner, stop_rx).await;
        });
        let mut slot = self
            .inner
            .keepalive
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *slot = Some(KeepAliveTask { stop, handle });
    }

    async fn stop_keepalive(&self) {
        self.inner.cancel_server_change_timer();
        let task = self
            .inner
            .keepalive
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            let _ = task.stop.send(true);
            if let Err(e) = task.handle.await {
                error!(error = %e, "Liveness loop panicked");
            }
        }
    }

    /// Update the status reported with the next heartbeat.
    pub async fn set_status(&self, status: i32, arg: impl Into<String>) {
        let mut state = self.inner.state.write().await;
        state.update.node_status = status;
        state.update.node_arg = arg.into();
    }

    /// Revoke the identity with the directory and stop the liveness loop.
    ///
    /// Best effort: a failed directory call is logged, and the identity is
    /// dropped locally either way.
    pub async fn unregister(&self) -> NodeResult<()> {
        self.inner.unregister().await?;
        self.stop_keepalive().await;
        Ok(())
    }

    /// Stop the liveness loop without revoking the identity.
    pub async fn shutdown(&self) {
        self.stop_keepalive().await;
        debug!("Node session shut down");
    }

    /// Look up the name of another node. Returns `"Unknown"` on any failure.
    pub async fn query_node_name(&self, node_id: i32) -> String {
        let directory = self.inner.state.read().await.directory.clone();
        let Some(directory) = directory else {
            warn!(node_id, "Node name lookup before registration");
            return UNKNOWN_NODE_NAME.to_string();
        };
        match bounded(
            "query_node",
            DIRECTORY_CALL_TIMEOUT,
            directory.query_node(node_id),
        )
        .await
        {
            Ok(info) => info.node_name,
            Err(e) => {
                warn!(node_id, error = %e, "Node name lookup failed");
                UNKNOWN_NODE_NAME.to_string()
            }
        }
    }

    /// Count one handled message. Reported by server nodes with the next heartbeat.
    pub fn msg_count_up(&self) {
        self.inner.msg_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Subscribe to directory commands the session cannot handle on its own.
    pub fn commands(&self) -> broadcast::Receiver<KeepAliveResponse> {
        self.inner.commands.subscribe()
    }

    pub async fn phase(&self) -> SessionPhase {
        self.inner.state.read().await.phase
    }

    /// Current identity, if registered.
    pub async fn identity(&self) -> Option<NodeIdentity> {
        self.inner.state.read().await.identity.clone()
    }

    /// Node number, if registered.
    pub async fn node_id(&self) -> Option<i32> {
        self.inner
            .state
            .read()
            .await
            .identity
            .as_ref()
            .filter(|identity| !identity.is_disconnected())
            .map(|identity| identity.node_id)
    }

    /// Exchange server address assigned at registration.
    pub async fn server_info(&self) -> Option<String> {
        self.inner
            .state
            .read()
            .await
            .identity
            .as_ref()
            .map(|identity| identity.server_info.clone())
    }

    /// Heartbeats sent so far.
    pub async fn update_count(&self) -> u64 {
        self.inner.state.read().await.update.update_count
    }

    /// Id generator seeded from this session's node number.
    pub fn ids(&self) -> Arc<IdGenerator> {
        Arc::clone(&self.inner.ids)
    }

    /// Proposal tracking shared with this session's negotiation clients.
    pub fn node_state(&self) -> Arc<NodeState> {
        Arc::clone(&self.inner.node_state)
    }
}

impl SessionInner {
    fn cancel_server_change_timer(&self) {
        let timer = self
            .server_change_timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(timer) = timer {
            timer.abort();
            debug!("Deferred server change cancelled");
        }
    }

    async fn unregister(&self) -> NodeResult<()> {
        let (directory, identity) = {
            let state = self.state.read().await;
            match (&state.directory, &state.identity) {
                (Some(directory), Some(identity)) if !identity.is_disconnected() => {
                    (Arc::clone(directory), identity.clone())
                }
                _ => return Err(NodeError::NotRegistered),
            }
        };

        let node_id = identity.node_id;
        match bounded(
            "unregister_node",
            DIRECTORY_CALL_TIMEOUT,
            directory.unregister_node(identity),
        )
        .await
        {
            Ok(ack) if ack.ok => info!(node_id, "Node unregistered"),
            Ok(ack) => warn!(node_id, err = %ack.err, "Directory refused unregistration"),
            Err(e) => warn!(node_id, error = %e, "Unregistration failed"),
        }

        let mut state = self.state.write().await;
        if let Some(identity) = state.identity.as_mut() {
            identity.secret = 0;
        }
        state.update.secret = 0;
        state.phase = SessionPhase::Unregistered;
        drop(state);

        if let Some(task) = self
            .keepalive
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            let _ = task.stop.send(true);
        }
        Ok(())
    }

    /// Register again with the last-known payload, keeping the heartbeat counter.
    async fn reregister(&self) -> NodeResult<()> {
        let (directory, info) = {
            let mut state = self.state.write().await;
            let (Some(directory), Some(mut info)) =
                (state.directory.clone(), state.registration.clone())
            else {
                return Err(NodeError::NotRegistered);
            };
            info.with_node_id = state.identity.as_ref().map_or(-1, |id| id.node_id);
            state.phase = SessionPhase::Reconnecting;
            (directory, info)
        };

        let result = bounded(
            "register_node",
            DIRECTORY_CALL_TIMEOUT,
            directory.register_node(info),
        )
        .await;

        let mut state = self.state.write().await;
        state.phase = SessionPhase::Active;
        let identity = result?;

        self.ids.reinitialize(identity.node_id as i64);
        info!(
            node_id = identity.node_id,
            previous = state.update.node_id,
            "Node re-registered"
        );
        state.update.node_id = identity.node_id;
        state.update.secret = identity.secret;
        state.identity = Some(identity);
        Ok(())
    }

    fn publish(&self, response: KeepAliveResponse) {
        if self.commands.send(response).is_err() {
            debug!("No subscribers for directory command");
        }
    }

    async fn handle_command(&self, response: KeepAliveResponse, failures: &mut u32) {
        match response.command {
            KeepAliveCommand::None => {}
            KeepAliveCommand::Reconnect => {
                info!("Directory requested reconnect");
                match self.reregister().await {
                    Ok(()) => *failures = 0,
                    Err(e) => {
                        *failures += 1;
                        warn!(error = %e, "Re-registration failed, keeping previous identity");
                    }
                }
            }
            KeepAliveCommand::ServerChange => {
                info!("Directory requested server change");
                if self.node_state.is_safe() {
                    if let Err(e) = self.unregister().await {
                        warn!(error = %e, "Unregistration for server change failed");
                    }
                    self.publish(response);
                    self.node_state.reset();
                } else if self.node_state.lock() {
                    let (supplies, demands) = self.node_state.pending();
                    info!(
                        supplies,
                        demands,
                        wait_secs = self.server_change_wait.as_secs(),
                        "Proposals in flight, deferring server change"
                    );
                    let node_state = Arc::clone(&self.node_state);
                    let wait = self.server_change_wait;
                    let timer = tokio::spawn(async move {
                        tokio::time::sleep(wait).await;
                        node_state.reset();
                        debug!("Server change lock released");
                    });
                    let previous = self
                        .server_change_timer
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .replace(timer);
                    if let Some(previous) = previous {
                        previous.abort();
                    }
                }
            }
            KeepAliveCommand::ProviderDisconnect => {
                let node_type = self
                    .state
                    .read()
                    .await
                    .registration
                    .as_ref()
                    .map(|info| info.node_type);
                if node_type == Some(NodeType::Server) {
                    info!(err = %response.err, "Provider disconnected");
                    self.publish(response);
                } else {
                    info!(?node_type, "Ignoring provider disconnect on a non-server node");
                }
            }
        }
    }
}

fn registration_info(
    node_name: &str,
    channel_types: &[u32],
    server: Option<&ServerOptions>,
) -> NodeInfo {
    let mut info = NodeInfo {
        node_name: node_name.to_string(),
        node_type: NodeType::Provider,
        server_info: String::new(),
        protocol_version: agora_types::PROTOCOL_BASE_VERSION.to_string(),
        with_node_id: -1,
        cluster_id: 0,
        area_id: "Default".to_string(),
        channel_types: channel_types.to_vec(),
        gw_info: String::new(),
        bin_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if let Some(server) = server {
        info.node_type = server.node_type;
        info.server_info = server.server_info.clone();
        info.cluster_id = server.cluster_id;
        info.area_id = server.area_id.clone();
        info.gw_info = server.gw_info.clone();
    }
    info
}

/// Heartbeat until the identity is revoked or the stop signal fires.
async fn liveness_loop(inner: Arc<SessionInner>, mut stop: watch::Receiver<bool>) {
    let mut failures: u32 = 0;

    loop {
        let interval = {
            let state = inner.state.read().await;
            match &state.identity {
                Some(identity) if !identity.is_disconnected() => {
                    Duration::from_secs(identity.keepalive_duration.max(1) as u64)
                }
                _ => {
                    info!("Node disconnected, liveness loop exiting");
                    break;
                }
            }
        };

        let delay = inner.backoff.delay(interval, failures);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.changed() => {
                debug!("Liveness loop: stop signal received");
                break;
            }
        }

        let is_server = inner
            .state
            .read()
            .await
            .registration
            .as_ref()
            .is_some_and(|info| info.node_type == NodeType::Server);
        let host = is_server.then(load::sample);

        let (directory, update) = {
            let mut state = inner.state.write().await;
            let connected = state
                .identity
                .as_ref()
                .is_some_and(|identity| !identity.is_disconnected());
            let Some(directory) = state.directory.clone().filter(|_| connected) else {
                info!("Node disconnected, liveness loop exiting");
                break;
            };
            if let Some(host) = host {
                state.update.status = Some(ServerStatus {
                    cpu: host.cpu,
                    memory: host.memory,
                    msg_count: inner.msg_count.swap(0, Ordering::Relaxed),
                });
            }
            state.update.update_count += 1;
            (directory, state.update.clone())
        };

        debug!(
            node_id = update.node_id,
            update_count = update.update_count,
            status = update.node_status,
            "Sending heartbeat"
        );

        match bounded(
            "keep_alive",
            DIRECTORY_CALL_TIMEOUT,
            directory.keep_alive(update),
        )
        .await
        {
            Ok(response) => {
                if response.ok {
                    failures = 0;
                } else {
                    failures = failures.saturating_add(1);
                    warn!(err = %response.err, "Directory refused heartbeat");
                }
                inner.handle_command(response, &mut failures).await;
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                warn!(error = %e, failures, "Heartbeat failed, retrying with back-off");
            }
        }
    }
}
