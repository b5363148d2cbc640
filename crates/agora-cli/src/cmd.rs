//! Subcommand implementations.

use crate::cli::WatchKind;
use crate::ui;
use agora_node::{NegotiationClient, NodeError, NodeResult, NodeSession};
use agora_types::config::AgoraConfig;
use agora_types::exchange::{DemandOpts, SupplyOpts};
use agora_types::node::{KeepAliveCommand, KeepAliveResponse};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::warn;

/// A registered session plus the exchange address it should talk to.
struct Node {
    session: NodeSession,
    exchange_addr: String,
}

/// Pick the channel to work on: the flag, or the first configured type.
fn resolve_channel(config: &AgoraConfig, channel: Option<u32>) -> NodeResult<u32> {
    channel
        .or_else(|| config.node.channel_types.first().copied())
        .ok_or_else(|| {
            NodeError::Config(
                "no channel type configured; set node.channel_types or pass --channel".to_string(),
            )
        })
}

async fn register(config: &AgoraConfig, channel: Option<u32>) -> NodeResult<Node> {
    let mut channel_types = config.node.channel_types.clone();
    if let Some(ct) = channel {
        if !channel_types.contains(&ct) {
            channel_types.push(ct);
        }
    }

    let session = NodeSession::from_config(config);
    let assigned = session
        .register(
            &config.node.directory_addr,
            &config.node.name,
            &channel_types,
            config.node.server.as_ref(),
        )
        .await?;

    let exchange_addr = if config.exchange.server_addr.is_empty() {
        assigned
    } else {
        config.exchange.server_addr.clone()
    };
    Ok(Node {
        session,
        exchange_addr,
    })
}

async fn open_client(
    config: &AgoraConfig,
    node: &Node,
    channel: u32,
) -> NodeResult<NegotiationClient> {
    let client = NegotiationClient::connect(&node.session, &node.exchange_addr, channel, "{}")
        .await?
        .with_timeout(Duration::from_secs(config.exchange.call_timeout_secs));
    Ok(client)
}

async fn leave(node: &Node) {
    if let Err(e) = node.session.unregister().await {
        warn!(error = %e, "Unregister failed");
    }
}

pub async fn cmd_register(config: AgoraConfig) -> NodeResult<()> {
    let node = register(&config, None).await?;
    let mut commands = node.session.commands();

    ui::section("Node registered");
    if let Some(identity) = node.session.identity().await {
        ui::kv("Node", &identity.node_id.to_string());
        ui::kv("Server", &identity.server_info);
        ui::kv("Keepalive", &format!("{}s", identity.keepalive_duration));
    }
    ui::hint("Press Ctrl-C to unregister and exit");

    match follow_commands(&mut commands, tokio::signal::ctrl_c()).await {
        Stop::ServerChanged => {
            ui::warn("Exchange server changed; register again to continue");
        }
        Stop::Interrupted | Stop::Closed => {
            leave(&node).await;
            ui::success("Node unregistered");
        }
    }
    Ok(())
}

/// Why [`follow_commands`] returned.
#[derive(Debug, PartialEq, Eq)]
enum Stop {
    Interrupted,
    /// The session has already unregistered itself.
    ServerChanged,
    Closed,
}

/// Report directory commands until `interrupt` resolves or the session leaves.
async fn follow_commands<F>(
    commands: &mut broadcast::Receiver<KeepAliveResponse>,
    interrupt: F,
) -> Stop
where
    F: Future,
{
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            _ = &mut interrupt => return Stop::Interrupted,
            command = commands.recv() => match command {
                Ok(response) => match response.command {
                    KeepAliveCommand::ServerChange => return Stop::ServerChanged,
                    KeepAliveCommand::ProviderDisconnect => {
                        ui::warn("A provider disconnected from this server");
                    }
                    _ => {}
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Missed directory commands");
                }
                Err(broadcast::error::RecvError::Closed) => return Stop::Closed,
            },
        }
    }
}

pub async fn cmd_demand(
    config: AgoraConfig,
    name: String,
    json: String,
    channel: Option<u32>,
) -> NodeResult<()> {
    let channel = resolve_channel(&config, channel)?;
    let node = register(&config, Some(channel)).await?;
    let result = async {
        let client = open_client(&config, &node, channel).await?;
        let mut opts = DemandOpts::new(name, json);
        client.notify_demand(&mut opts).await
    }
    .await;
    leave(&node).await;

    let id = result?;
    ui::success(&format!("Demand {id} sent on channel {channel}"));
    Ok(())
}

pub async fn cmd_supply(
    config: AgoraConfig,
    name: String,
    json: String,
    channel: Option<u32>,
) -> NodeResult<()> {
    let channel = resolve_channel(&config, channel)?;
    let node = register(&config, Some(channel)).await?;
    let result = async {
        let client = open_client(&config, &node, channel).await?;
        let mut opts = SupplyOpts::new(name, json);
        client.notify_supply(&mut opts).await
    }
    .await;
    leave(&node).await;

    let id = result?;
    ui::success(&format!("Supply {id} sent on channel {channel}"));
    Ok(())
}

pub async fn cmd_watch(
    config: AgoraConfig,
    kind: WatchKind,
    channel: Option<u32>,
    raw: bool,
) -> NodeResult<()> {
    let channel = resolve_channel(&config, channel)?;
    let node = register(&config, Some(channel)).await?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let session = node.session.clone();
    let result = async {
        let client = open_client(&config, &node, channel).await?;
        ui::section(&format!("Watching {kind:?} on channel {channel}").to_lowercase());
        match kind {
            WatchKind::Demand => {
                client
                    .subscribe_demand(cancel_rx, |dm| {
                        session.msg_count_up();
                        if raw {
                            print_json(&dm);
                        } else {
                            let (id, from) = (dm.id, dm.sender_id);
                            ui::record("demand", id, from, &dm.demand_name, &dm.arg_json);
                        }
                    })
                    .await
            }
            WatchKind::Supply => {
                client
                    .subscribe_supply(cancel_rx, |sp| {
                        session.msg_count_up();
                        if raw {
                            print_json(&sp);
                        } else {
                            let (id, from) = (sp.id, sp.sender_id);
                            ui::record("supply", id, from, &sp.supply_name, &sp.arg_json);
                        }
                    })
                    .await
            }
        }
    }
    .await;
    leave(&node).await;
    result
}

fn print_json<T: serde::Serialize>(record: &T) {
    match serde_json::to_string(record) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "Failed to encode record"),
    }
}
