//! Message bus operations of a negotiation client.
//!
//! A bus is open while the client's bus id is non-zero. Send and close check
//! that first and fail with [`NodeError::BusNotOpen`] otherwise. A transport
//! failure on either call also closes the bus locally.

use crate::error::{NodeError, NodeResult};
use crate::negotiation::{receive_loop, NegotiationClient};
use agora_types::exchange::{Mbus, MbusMsg, MbusOpt, MbusState};
use agora_types::IdType;
use tokio::sync::watch;
use tracing::{debug, info, warn};

impl NegotiationClient {
    /// Id of the open bus, `0` when none is open.
    pub fn mbus_id(&self) -> IdType {
        *self.mbus_id.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open_mbus(&self) -> NodeResult<Mbus> {
        match self.mbus_id() {
            0 => Err(NodeError::BusNotOpen),
            mbus_id => Ok(Mbus {
                client_id: self.channel.client_id,
                mbus_id,
                arg_json: String::new(),
            }),
        }
    }

    /// Reset the bus id, unless another bus has been opened in the meantime.
    fn drop_mbus(&self, mbus_id: IdType) -> bool {
        let mut current = self.mbus_id.lock().unwrap_or_else(|e| e.into_inner());
        if *current == mbus_id {
            *current = 0;
            true
        } else {
            false
        }
    }

    fn on_bus_failure(&self, mbus_id: IdType, e: &NodeError) {
        if is_transport_failure(e) && self.drop_mbus(mbus_id) {
            warn!(
                client_id = self.client_id(),
                mbus_id,
                error = %e,
                "Message bus lost on transport failure"
            );
        }
    }

    /// Receive messages on the open bus until the stream ends, fails, or `cancel` turns true.
    pub async fn subscribe_mbus<F>(
        &self,
        cancel: watch::Receiver<bool>,
        on_msg: F,
    ) -> NodeResult<()>
    where
        F: FnMut(MbusMsg),
    {
        let mbus = self.open_mbus()?;
        let stream = self
            .call("subscribe_mbus", self.exchange.subscribe_mbus(mbus))
            .await?;
        receive_loop("mbus", self.client_id(), None, stream, cancel, on_msg).await
    }

    /// Send `msg` on the open bus, stamped with this client and a fresh id.
    ///
    /// Returns the message id.
    pub async fn send_msg(&self, mut msg: MbusMsg) -> NodeResult<IdType> {
        let mbus = self.open_mbus()?;
        msg.msg_id = self.ids.generate()?;
        msg.sender_id = mbus.client_id;
        msg.mbus_id = mbus.mbus_id;
        let msg_id = msg.msg_id;

        let ack = match self.call("send_msg", self.exchange.send_msg(msg)).await {
            Ok(ack) => ack,
            Err(e) => {
                self.on_bus_failure(mbus.mbus_id, &e);
                return Err(e);
            }
        };
        if !ack.ok {
            return Err(NodeError::Rejected(ack.err));
        }
        debug!(client_id = self.client_id(), mbus_id = mbus.mbus_id, msg_id, "Bus message sent");
        Ok(msg_id)
    }

    /// Ask the server for a new bus, outside any select/confirm exchange.
    ///
    /// The returned bus carries this client's id. It does not become the open bus.
    pub async fn create_mbus(&self, opt: MbusOpt) -> NodeResult<Mbus> {
        let mut mbus = self.call("create_mbus", self.exchange.create_mbus(opt)).await?;
        mbus.client_id = self.client_id();
        info!(client_id = mbus.client_id, mbus_id = mbus.mbus_id, "Message bus created");
        Ok(mbus)
    }

    pub async fn get_mbus_status(&self, mbus: Mbus) -> NodeResult<MbusState> {
        self.call("get_mbus_state", self.exchange.get_mbus_state(mbus)).await
    }

    /// Close the open bus. The local bus id is cleared once the server acknowledges.
    pub async fn close_mbus(&self) -> NodeResult<()> {
        let mbus = self.open_mbus()?;
        let mbus_id = mbus.mbus_id;

        let ack = match self.call("close_mbus", self.exchange.close_mbus(mbus)).await {
            Ok(ack) => ack,
            Err(e) => {
                self.on_bus_failure(mbus_id, &e);
                return Err(e);
            }
        };
        if !ack.ok {
            return Err(NodeError::Rejected(ack.err));
        }
        self.drop_mbus(mbus_id);
        info!(client_id = self.client_id(), mbus_id, "Message bus closed");
        Ok(())
    }
}

fn is_transport_failure(e: &NodeError) -> bool {
    match e {
        NodeError::Wire(agora_wire::WireError::Remote { .. }) => false,
        NodeError::Wire(_) | NodeError::Timeout { .. } => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{registered_session, supply, MockExchange};
    use agora_types::exchange::{MbusStatus, MbusType};
    use agora_wire::WireError;
    use std::sync::Arc;

    async fn client_with_bus(exchange: &Arc<MockExchange>) -> NegotiationClient {
        exchange.set_mbus_id(99);
        let session = registered_session(7).await;
        let client = NegotiationClient::new(&session, exchange.clone(), 10, "{}").unwrap();
        assert_eq!(client.select_supply(&supply(42, 10, "taxi")).await.unwrap(), 99);
        session.shutdown().await;
        client
    }

    #[tokio::test]
    async fn test_send_and_close_without_bus() {
        let exchange = Arc::new(MockExchange::default());
        let session = registered_session(7).await;
        let client = NegotiationClient::new(&session, exchange.clone(), 10, "{}").unwrap();

        let err = client.send_msg(MbusMsg::default()).await.unwrap_err();
        assert!(matches!(err, NodeError::BusNotOpen));
        assert!(matches!(client.close_mbus().await, Err(NodeError::BusNotOpen)));
        let (_tx, rx) = watch::channel(false);
        assert!(matches!(
            client.subscribe_mbus(rx, |_| {}).await,
            Err(NodeError::BusNotOpen)
        ));
        assert_eq!(exchange.calls(), 0);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_select_send_close_send() {
        let exchange = Arc::new(MockExchange::default());
        let client = client_with_bus(&exchange).await;

        let msg_id = client
            .send_msg(MbusMsg {
                msg_info: "hello".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let sent = exchange.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].mbus_id, 99);
        assert_eq!(sent[0].msg_id, msg_id);
        assert_eq!(sent[0].sender_id, client.client_id());
        assert_eq!(sent[0].msg_info, "hello");

        client.close_mbus().await.unwrap();
        assert_eq!(client.mbus_id(), 0);
        assert!(matches!(
            client.send_msg(MbusMsg::default()).await,
            Err(NodeError::BusNotOpen)
        ));
        assert!(matches!(client.close_mbus().await, Err(NodeError::BusNotOpen)));
        assert_eq!(exchange.closed(), 1);
    }

    #[tokio::test]
    async fn test_refused_close_keeps_bus() {
        let exchange = Arc::new(MockExchange::default());
        let client = client_with_bus(&exchange).await;
        exchange.refuse("bus busy");

        let err = client.close_mbus().await.unwrap_err();
        assert!(matches!(err, NodeError::Rejected(_)));
        assert_eq!(client.mbus_id(), 99);
    }

    #[tokio::test]
    async fn test_remote_error_keeps_bus() {
        let exchange = Arc::new(MockExchange::default());
        let client = client_with_bus(&exchange).await;
        exchange.fail_with(WireError::remote(409, "conflict"));

        assert!(client.send_msg(MbusMsg::default()).await.is_err());
        assert_eq!(client.mbus_id(), 99);
    }

    #[tokio::test]
    async fn test_transport_failure_closes_bus() {
        let exchange = Arc::new(MockExchange::default());
        let client = client_with_bus(&exchange).await;
        exchange.fail_calls(true);

        let err = client.send_msg(MbusMsg::default()).await.unwrap_err();
        assert!(matches!(err, NodeError::Wire(WireError::ConnectionClosed)));
        assert_eq!(client.mbus_id(), 0);
        assert!(matches!(client.close_mbus().await, Err(NodeError::BusNotOpen)));
    }

    #[tokio::test]
    async fn test_subscribe_mbus_scoped_to_bus() {
        let exchange = Arc::new(MockExchange::default());
        exchange.set_bus_messages(vec![
            MbusMsg {
                msg_id: 1,
                mbus_id: 99,
                ..Default::default()
            },
            MbusMsg {
                msg_id: 2,
                mbus_id: 99,
                ..Default::default()
            },
        ]);
        let client = client_with_bus(&exchange).await;

        let mut ids = Vec::new();
        let (_tx, rx) = watch::channel(false);
        client
            .subscribe_mbus(rx, |msg| ids.push(msg.msg_id))
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 2]);
        let subscribed = exchange.subscribed_buses();
        assert_eq!(subscribed[0].mbus_id, 99);
        assert_eq!(subscribed[0].client_id, client.client_id());
    }

    #[tokio::test]
    async fn test_create_mbus_stamps_client() {
        let exchange = Arc::new(MockExchange::default());
        exchange.set_mbus_id(55);
        let session = registered_session(7).await;
        let client = NegotiationClient::new(&session, exchange.clone(), 10, "{}").unwrap();

        let mbus = client
            .create_mbus(MbusOpt {
                mbus_type: MbusType::Private,
                subscribers: vec![3, 4],
            })
            .await
            .unwrap();
        assert_eq!(mbus.mbus_id, 55);
        assert_eq!(mbus.client_id, client.client_id());
        assert_eq!(client.mbus_id(), 0);
        assert_eq!(exchange.created_buses()[0].mbus_type, MbusType::Private);

        let state = client.get_mbus_status(mbus).await.unwrap();
        assert_eq!(state.mbus_id, 55);
        assert_eq!(state.status, MbusStatus::Subscribers);
        assert_eq!(state.subscribers, vec![3, 4]);
        assert_eq!(exchange.queried_buses()[0].client_id, client.client_id());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_bus_status_leaves_open_bus() {
        let exchange = Arc::new(MockExchange::default());
        let client = client_with_bus(&exchange).await;

        let bus = Mbus {
            client_id: client.client_id(),
            mbus_id: 99,
            arg_json: String::new(),
        };
        let state = client.get_mbus_status(bus.clone()).await.unwrap();
        assert_eq!(state.status, MbusStatus::Initialized);

        exchange.fail_calls(true);
        assert!(client.get_mbus_status(bus).await.is_err());
        assert!(client.create_mbus(MbusOpt::default()).await.is_err());
        assert_eq!(client.mbus_id(), 99);
    }
}
