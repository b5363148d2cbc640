//! TCP clients for the directory and exchange services.
//!
//! Unary calls share one connection per client. The connection is taken out
//! of its slot for the duration of a call and put back only after a complete
//! response has been read, so a call abandoned at a timeout drops the socket
//! instead of leaving half a frame behind. The next call redials.
//!
//! Each subscription gets a dedicated connection that the server turns into a
//! stream after acknowledging the subscribe request.

use crate::conn::{read_message, write_message, WireError};
use crate::message::{StreamItem, WireMessage, WireMessageKind, WireRequest, WireResponse};
use crate::service::{DirectoryService, ExchangeService, RecordStream};
use agora_types::exchange::{
    Channel, ConfirmResponse, Demand, Mbus, MbusMsg, MbusOpt, MbusState, Supply, Target,
};
use agora_types::node::{Ack, KeepAliveResponse, NodeIdentity, NodeInfo, NodeUpdate};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

struct Link {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl Link {
    async fn dial(addr: &str) -> Result<Self, WireError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self { reader, writer })
    }
}

/// Request/response connection used by the unary calls of one client.
struct UnaryLink {
    addr: String,
    slot: Mutex<Option<Link>>,
    next_id: AtomicU64,
}

impl UnaryLink {
    async fn connect(addr: &str) -> Result<Self, WireError> {
        let link = Link::dial(addr).await?;
        Ok(Self {
            addr: addr.to_string(),
            slot: Mutex::new(Some(link)),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, request: WireRequest) -> Result<WireResponse, WireError> {
        let method = request.method();
        let mut slot = self.slot.lock().await;
        let mut link = match slot.take() {
            Some(link) => link,
            None => {
                debug!(addr = %self.addr, method, "Redialing service");
                Link::dial(&self.addr).await?
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let msg = WireMessage {
            id,
            kind: WireMessageKind::Request(request),
        };
        write_message(&mut link.writer, &msg).await?;
        let reply = read_message(&mut link.reader).await?;
        if reply.id != id {
            return Err(WireError::UnexpectedResponse(method.to_string()));
        }
        *slot = Some(link);

        match reply.kind {
            WireMessageKind::Response(WireResponse::Error { code, message }) => {
                Err(WireError::Remote { code, message })
            }
            WireMessageKind::Response(response) => Ok(response),
            _ => Err(WireError::UnexpectedResponse(method.to_string())),
        }
    }
}

fn expect_ack(response: WireResponse, method: &str) -> Result<Ack, WireError> {
    match response {
        WireResponse::Ack { ack } => Ok(ack),
        _ => Err(WireError::UnexpectedResponse(method.to_string())),
    }
}

fn expect_confirm(response: WireResponse, method: &str) -> Result<ConfirmResponse, WireError> {
    match response {
        WireResponse::Confirm { response } => Ok(response),
        _ => Err(WireError::UnexpectedResponse(method.to_string())),
    }
}

/// Open a dedicated streaming connection and wait for the server to accept it.
async fn open_stream<T>(
    addr: &str,
    request: WireRequest,
    extract: fn(StreamItem) -> Option<T>,
) -> Result<RecordStream<T>, WireError>
where
    T: Send + 'static,
{
    let method = request.method();
    let mut link = Link::dial(addr).await?;
    let msg = WireMessage {
        id: 0,
        kind: WireMessageKind::Request(request),
    };
    write_message(&mut link.writer, &msg).await?;

    match read_message(&mut link.reader).await?.kind {
        WireMessageKind::Response(WireResponse::Ack { ack }) if ack.ok => {}
        WireMessageKind::Response(WireResponse::Ack { ack }) => {
            return Err(WireError::remote(403, ack.err));
        }
        WireMessageKind::Response(WireResponse::Error { code, message }) => {
            return Err(WireError::Remote { code, message });
        }
        _ => return Err(WireError::UnexpectedResponse(method.to_string())),
    }
    debug!(addr, method, "Subscription accepted");

    let stream = futures::stream::unfold(Some(link), move |state| async move {
        let mut link = state?;
        match read_message(&mut link.reader).await {
            Ok(WireMessage {
                kind: WireMessageKind::Item(StreamItem::End),
                ..
            })
            | Err(WireError::ConnectionClosed) => None,
            Ok(WireMessage {
                kind: WireMessageKind::Item(item),
                ..
            }) => match extract(item) {
                Some(record) => Some((Ok(record), Some(link))),
                None => Some((Err(WireError::UnexpectedResponse(method.to_string())), None)),
            },
            Ok(WireMessage {
                kind: WireMessageKind::Response(WireResponse::Error { code, message }),
                ..
            }) => Some((Err(WireError::Remote { code, message }), None)),
            Ok(_) => Some((Err(WireError::UnexpectedResponse(method.to_string())), None)),
            Err(e) => Some((Err(e), None)),
        }
    });

    Ok(Box::pin(stream))
}

/// Directory service client.
pub struct TcpDirectoryClient {
    link: UnaryLink,
}

impl TcpDirectoryClient {
    /// Dial the directory service at `addr` (`host:port`).
    pub async fn connect(addr: &str) -> Result<Self, WireError> {
        Ok(Self {
            link: UnaryLink::connect(addr).await?,
        })
    }

    /// Address this client dials.
    pub fn addr(&self) -> &str {
        &self.link.addr
    }
}

#[async_trait]
impl DirectoryService for TcpDirectoryClient {
    async fn register_node(&self, info: NodeInfo) -> Result<NodeIdentity, WireError> {
        match self.link.call(WireRequest::RegisterNode { info }).await? {
            WireResponse::NodeId { identity } => Ok(identity),
            _ => Err(WireError::UnexpectedResponse("register_node".to_string())),
        }
    }

    async fn unregister_node(&self, identity: NodeIdentity) -> Result<Ack, WireError> {
        let response = self
            .link
            .call(WireRequest::UnRegisterNode { identity })
            .await?;
        expect_ack(response, "unregister_node")
    }

    async fn keep_alive(&self, update: NodeUpdate) -> Result<KeepAliveResponse, WireError> {
        match self.link.call(WireRequest::KeepAlive { update }).await? {
            WireResponse::KeepAlive { response } => Ok(response),
            _ => Err(WireError::UnexpectedResponse("keep_alive".to_string())),
        }
    }

    async fn query_node(&self, node_id: i32) -> Result<NodeInfo, WireError> {
        match self.link.call(WireRequest::QueryNode { node_id }).await? {
            WireResponse::NodeInfo { info } => Ok(info),
            _ => Err(WireError::UnexpectedResponse("query_node".to_string())),
        }
    }
}

/// Exchange server client.
pub struct TcpExchangeClient {
    link: UnaryLink,
}

impl TcpExchangeClient {
    /// Dial the exchange server at `addr` (`host:port`).
    pub async fn connect(addr: &str) -> Result<Self, WireError> {
        Ok(Self {
            link: UnaryLink::connect(addr).await?,
        })
    }

    /// Address this client dials.
    pub fn addr(&self) -> &str {
        &self.link.addr
    }
}

#[async_trait]
impl ExchangeService for TcpExchangeClient {
    async fn notify_demand(&self, demand: Demand) -> Result<Ack, WireError> {
        let response = self.link.call(WireRequest::NotifyDemand { demand }).await?;
        expect_ack(response, "notify_demand")
    }

    async fn notify_supply(&self, supply: Supply) -> Result<Ack, WireError> {
        let response = self.link.call(WireRequest::NotifySupply { supply }).await?;
        expect_ack(response, "notify_supply")
    }

    async fn propose_demand(&self, demand: Demand) -> Result<Ack, WireError> {
        let response = self.link.call(WireRequest::ProposeDemand { demand }).await?;
        expect_ack(response, "propose_demand")
    }

    async fn propose_supply(&self, supply: Supply) -> Result<Ack, WireError> {
        let response = self.link.call(WireRequest::ProposeSupply { supply }).await?;
        expect_ack(response, "propose_supply")
    }

    async fn select_supply(&self, target: Target) -> Result<ConfirmResponse, WireError> {
        let response = self.link.call(WireRequest::SelectSupply { target }).await?;
        expect_confirm(response, "select_supply")
    }

    async fn select_demand(&self, target: Target) -> Result<ConfirmResponse, WireError> {
        let response = self.link.call(WireRequest::SelectDemand { target }).await?;
        expect_confirm(response, "select_demand")
    }

    async fn confirm(&self, target: Target) -> Result<Ack, WireError> {
        let response = self.link.call(WireRequest::Confirm { target }).await?;
        expect_ack(response, "confirm")
    }

    async fn send_msg(&self, msg: MbusMsg) -> Result<Ack, WireError> {
        let response = self.link.call(WireRequest::SendMsg { msg }).await?;
        expect_ack(response, "send_msg")
    }

    async fn close_mbus(&self, mbus: Mbus) -> Result<Ack, WireError> {
        let response = self.link.call(WireRequest::CloseMbus { mbus }).await?;
        expect_ack(response, "close_mbus")
    }

    async fn create_mbus(&self, opt: MbusOpt) -> Result<Mbus, WireError> {
        match self.link.call(WireRequest::CreateMbus { opt }).await? {
            WireResponse::Mbus { mbus } => Ok(mbus),
            _ => Err(WireError::UnexpectedResponse("create_mbus".to_string())),
        }
    }

    async fn get_mbus_state(&self, mbus: Mbus) -> Result<MbusState, WireError> {
        match self.link.call(WireRequest::GetMbusState { mbus }).await? {
            WireResponse::MbusState { state } => Ok(state),
            _ => Err(WireError::UnexpectedResponse("get_mbus_state".to_string())),
        }
    }

    async fn subscribe_demand(&self, channel: Channel) -> Result<RecordStream<Demand>, WireError> {
        open_stream(
            &self.link.addr,
            WireRequest::SubscribeDemand { channel },
            |item| match item {
                StreamItem::Demand { demand } => Some(demand),
                _ => None,
            },
        )
        .await
    }

    async fn subscribe_supply(&self, channel: Channel) -> Result<RecordStream<Supply>, WireError> {
        open_stream(
            &self.link.addr,
            WireRequest::SubscribeSupply { channel },
            |item| match item {
                StreamItem::Supply { supply } => Some(supply),
                _ => None,
            },
        )
        .await
    }

    async fn subscribe_mbus(&self, mbus: Mbus) -> Result<RecordStream<MbusMsg>, WireError> {
        open_stream(
            &self.link.addr,
            WireRequest::SubscribeMbus { mbus },
            |item| match item {
                StreamItem::MbusMsg { msg } => Some(msg),
                _ => None,
            },
        )
        .await
    }
}
