//! Serves directory and exchange implementations over TCP.
//!
//! The host binds a listener and gives every accepted connection its own task.
//! Unary requests are answered in place on the same connection. A subscribe
//! request is acknowledged, after which the connection carries nothing but
//! stream items until the stream ends and the host closes the socket.

use crate::conn::{read_message, write_message, WireError};
use crate::message::{StreamItem, WireMessage, WireMessageKind, WireRequest, WireResponse};
use crate::service::{DirectoryService, ExchangeService};
use agora_types::node::Ack;
use futures::stream::{BoxStream, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Configuration for a ServiceHost.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }
}

#[derive(Clone)]
struct Services {
    directory: Option<Arc<dyn DirectoryService>>,
    exchange: Option<Arc<dyn ExchangeService>>,
}

impl Services {
    fn directory(&self) -> Result<&dyn DirectoryService, WireError> {
        self.directory
            .as_deref()
            .ok_or_else(|| WireError::remote(501, "directory service not hosted here"))
    }

    fn exchange(&self) -> Result<&dyn ExchangeService, WireError> {
        self.exchange
            .as_deref()
            .ok_or_else(|| WireError::remote(501, "exchange service not hosted here"))
    }
}

enum Reply {
    Unary(WireResponse),
    Stream(BoxStream<'static, Result<StreamItem, WireError>>),
}

/// A running TCP listener in front of one or both services.
pub struct ServiceHost {
    local_addr: SocketAddr,
}

impl ServiceHost {
    /// Bind the configured address and start accepting connections.
    pub async fn start(
        config: HostConfig,
        directory: Option<Arc<dyn DirectoryService>>,
        exchange: Option<Arc<dyn ExchangeService>>,
    ) -> Result<(Arc<Self>, JoinHandle<()>), WireError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            %local_addr,
            directory = directory.is_some(),
            exchange = exchange.is_some(),
            "Service host listening"
        );

        let services = Services {
            directory,
            exchange,
        };
        let accept_handle = tokio::spawn(async move {
            Self::accept_loop(listener, services).await;
        });

        Ok((Arc::new(Self { local_addr }), accept_handle))
    }

    /// Get the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn accept_loop(listener: TcpListener, services: Services) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(%addr, "Accepted connection");
                    let services = services.clone();
                    tokio::spawn(async move {
                        if let Err(e) = connection_loop(stream, &services).await {
                            debug!(%addr, error = %e, "Connection ended");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }
}

async fn connection_loop(stream: TcpStream, services: &Services) -> Result<(), WireError> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let msg = match read_message(&mut reader).await {
            Ok(m) => m,
            Err(WireError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };
        let request = match msg.kind {
            WireMessageKind::Request(request) => request,
            other => {
                warn!(id = msg.id, "Ignoring non-request message: {:?}", other);
                continue;
            }
        };

        let method = request.method();
        match dispatch(request, services).await {
            Ok(Reply::Unary(response)) => {
                let reply = WireMessage {
                    id: msg.id,
                    kind: WireMessageKind::Response(response),
                };
                write_message(&mut writer, &reply).await?;
            }
            Ok(Reply::Stream(mut items)) => {
                let accepted = WireMessage {
                    id: msg.id,
                    kind: WireMessageKind::Response(WireResponse::Ack { ack: Ack::ok() }),
                };
                write_message(&mut writer, &accepted).await?;

                let mut count = 0u64;
                while let Some(item) = items.next().await {
                    let kind = match item {
                        Ok(item) => WireMessageKind::Item(item),
                        Err(e) => {
                            warn!(method, error = %e, "Stream failed");
                            let failed = WireMessage {
                                id: msg.id,
                                kind: WireMessageKind::Response(error_response(e)),
                            };
                            return write_message(&mut writer, &failed).await;
                        }
                    };
                    write_message(&mut writer, &WireMessage { id: msg.id, kind }).await?;
                    count += 1;
                }

                debug!(method, count, "Stream finished");
                let end = WireMessage {
                    id: msg.id,
                    kind: WireMessageKind::Item(StreamItem::End),
                };
                return write_message(&mut writer, &end).await;
            }
            Err(e) => {
                debug!(method, error = %e, "Request failed");
                let reply = WireMessage {
                    id: msg.id,
                    kind: WireMessageKind::Response(error_response(e)),
                };
                write_message(&mut writer, &reply).await?;
            }
        }
    }
}

fn error_response(e: WireError) -> WireResponse {
    let code = e.code();
    let message = match e {
        WireError::Remote { message, .. } => message,
        other => other.to_string(),
    };
    WireResponse::Error { code, message }
}

async fn dispatch(request: WireRequest, services: &Services) -> Result<Reply, WireError> {
    let response = match request {
        WireRequest::RegisterNode { info } => WireResponse::NodeId {
            identity: services.directory()?.register_node(info).await?,
        },
        WireRequest::UnRegisterNode { identity } => WireResponse::Ack {
            ack: services.directory()?.unregister_node(identity).await?,
        },
        WireRequest::KeepAlive { update } => WireResponse::KeepAlive {
            response: services.directory()?.keep_alive(update).await?,
        },
        WireRequest::QueryNode { node_id } => WireResponse::NodeInfo {
            info: services.directory()?.query_node(node_id).await?,
        },
        WireRequest::NotifyDemand { demand } => WireResponse::Ack {
            ack: services.exchange()?.notify_demand(demand).await?,
        },
        WireRequest::NotifySupply { supply } => WireResponse::Ack {
            ack: services.exchange()?.notify_supply(supply).await?,
        },
        WireRequest::ProposeDemand { demand } => WireResponse::Ack {
            ack: services.exchange()?.propose_demand(demand).await?,
        },
        WireRequest::ProposeSupply { supply } => WireResponse::Ack {
            ack: services.exchange()?.propose_supply(supply).await?,
        },
        WireRequest::SelectSupply { target } => WireResponse::Confirm {
            response: services.exchange()?.select_supply(target).await?,
        },
        WireRequest::SelectDemand { target } => WireResponse::Confirm {
            response: services.exchange()?.select_demand(target).await?,
        },
        WireRequest::Confirm { target } => WireResponse::Ack {
            ack: services.exchange()?.confirm(target).await?,
        },
        WireRequest::SendMsg { msg } => WireResponse::Ack {
            ack: services.exchange()?.send_msg(msg).await?,
        },
        WireRequest::CloseMbus { mbus } => WireResponse::Ack {
            ack: services.exchange()?.close_mbus(mbus).await?,
        },
        WireRequest::CreateMbus { opt } => WireResponse::Mbus {
            mbus: services.exchange()?.create_mbus(opt).await?,
        },
        WireRequest::GetMbusState { mbus } => WireResponse::MbusState {
            state: services.exchange()?.get_mbus_state(mbus).await?,
        },
        WireRequest::SubscribeDemand { channel } => {
            let stream = services.exchange()?.subscribe_demand(channel).await?;
            return Ok(Reply::Stream(
                stream
                    .map(|r| r.map(|demand| StreamItem::Demand { demand }))
                    .boxed(),
            ));
        }
        WireRequest::SubscribeSupply { channel } => {
            let stream = services.exchange()?.subscribe_supply(channel).await?;
            return Ok(Reply::Stream(
                stream
                    .map(|r| r.map(|supply| StreamItem::Supply { supply }))
                    .boxed(),
            ));
        }
        WireRequest::SubscribeMbus { mbus } => {
            let stream = services.exchange()?.subscribe_mbus(mbus).await?;
            return Ok(Reply::Stream(
                stream
                    .map(|r| r.map(|msg| StreamItem::MbusMsg { msg }))
                    .boxed(),
            ));
        }
    };
    Ok(Reply::Unary(response))
}
