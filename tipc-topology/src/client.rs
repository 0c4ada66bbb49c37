//! Topology service client
//!
//! A thin protocol layer over one sequential-packet [`Connection`]: each
//! subscription is written as a single message and each read yields exactly
//! one event.

use std::fmt;

use futures::stream::{self, Stream};
use parking_lot::Mutex;
use tipc_core::{Error, NetConfig, Result};
use tipc_net::{Connection, Dialer, ServiceRange, SocketKind, TipcAddr};
use tracing::{debug, info, trace};

use crate::message::{Event, Filter, Subscription, EVENT_LEN, SUBSCRIPTION_LEN};

/// Lifecycle of a topology client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    /// At least one subscription has been sent
    Subscribed,
    Disconnected,
}

/// Connection to a node's topology service
pub struct TopologyClient {
    conn: Connection,
    state: Mutex<ClientState>,
}

impl TopologyClient {
    /// Connect to the topology service of `node`; 0 selects the local node
    pub async fn connect(node: u32) -> Result<Self> {
        Self::connect_with(&Dialer::default(), node).await
    }

    /// Connect to the node named by `TIPC_TOPOLOGY_NODE`, honouring the other
    /// environment overrides as well
    pub async fn connect_default() -> Result<Self> {
        let config = NetConfig::from_env()?;
        let node = config.topology_node;
        Self::connect_with(&Dialer::new(config), node).await
    }

    pub async fn connect_with(dialer: &Dialer, node: u32) -> Result<Self> {
        let conn = dialer
            .dial(SocketKind::SeqPacket, &TipcAddr::topology(node))
            .await?;
        info!(node = format_args!("{:x}", node), "connected to topology service");
        Ok(Self::from_connection(conn))
    }

    /// Speak the topology protocol over an existing connection
    pub fn from_connection(conn: Connection) -> Self {
        let state = if conn.is_closed() {
            ClientState::Disconnected
        } else {
            ClientState::Connected
        };
        Self {
            conn,
            state: Mutex::new(state),
        }
    }

    pub fn state(&self) -> ClientState {
        if self.conn.is_closed() {
            return ClientState::Disconnected;
        }
        *self.state.lock()
    }

    /// The underlying connection, e.g. for setting deadlines
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Subscribe to events on `range`
    pub async fn subscribe(
        &self,
        range: ServiceRange,
        timeout_ms: u32,
        filter: Filter,
    ) -> Result<Subscription> {
        let subscription = Subscription::new(range, timeout_ms, filter);
        self.subscribe_with(&subscription).await?;
        Ok(subscription)
    }

    /// Send a prepared subscription as one message
    pub async fn subscribe_with(&self, subscription: &Subscription) -> Result<()> {
        self.send(subscription).await?;

        let mut state = self.state.lock();
        if *state == ClientState::Connected {
            *state = ClientState::Subscribed;
        }
        debug!(
            range = %subscription.range,
            timeout_ms = subscription.timeout_ms,
            filter = subscription.filter.bits(),
            "subscription sent"
        );
        Ok(())
    }

    /// Ask the service to drop `subscription`.
    ///
    /// Outstanding subscriptions are not tracked, so the state is unchanged.
    pub async fn cancel(&self, subscription: &Subscription) -> Result<()> {
        self.send(&subscription.cancellation()).await?;
        debug!(range = %subscription.range, "subscription cancelled");
        Ok(())
    }

    async fn send(&self, subscription: &Subscription) -> Result<()> {
        let n = self.conn.write(&subscription.encode()).await?;
        if n != SUBSCRIPTION_LEN {
            return Err(Error::malformed("topology subscription write", SUBSCRIPTION_LEN, n));
        }
        Ok(())
    }

    /// Read and decode the next event.
    ///
    /// Messages keep their boundaries, so any read that is not exactly one
    /// event (end of stream included) is a protocol violation.
    pub async fn next_event(&self) -> Result<Event> {
        // one spare byte so an oversized message is not truncated to fit
        let mut buf = [0u8; EVENT_LEN + 1];
        let n = self.conn.read(&mut buf).await?;
        let event = Event::decode(&buf[..n])?;
        trace!(%event, "topology event");
        Ok(event)
    }

    /// Events as a stream. Ends when the client is closed; any other error
    /// is yielded once and then ends the stream.
    pub fn events(&self) -> impl Stream<Item = Result<Event>> + '_ {
        stream::unfold(Some(self), |client| async move {
            let client = client?;
            match client.next_event().await {
                Ok(event) => Some((Ok(event), Some(client))),
                Err(e) if e.is_closed() => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Close the connection; pending reads fail with [`Error::Closed`]
    pub fn close(&self) -> Result<()> {
        *self.state.lock() = ClientState::Disconnected;
        self.conn.close()
    }
}

impl fmt::Debug for TopologyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopologyClient")
            .field("conn", &self.conn)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::EventKind;
    use futures::StreamExt;
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixDatagram;
    use std::sync::Arc;
    use std::time::Duration;
    use tipc_net::PeerAddress;

    /// Client over one end of a message-preserving pair; the other end plays
    /// the topology service.
    fn client_and_service() -> (TopologyClient, Connection) {
        let (a, b) = UnixDatagram::pair().unwrap();
        let client = Connection::from_owned_fd(OwnedFd::from(a), SocketKind::SeqPacket).unwrap();
        let service = Connection::from_owned_fd(OwnedFd::from(b), SocketKind::SeqPacket).unwrap();
        (TopologyClient::from_connection(client), service)
    }

    fn published(subscription: Subscription) -> Event {
        Event {
            kind: EventKind::Published,
            lower: 17,
            upper: 17,
            port: PeerAddress::new(0x1234, 0x1001001),
            subscription,
        }
    }

    #[tokio::test]
    async fn test_subscribe_sends_one_message() {
        let (client, service) = client_and_service();
        assert_eq!(client.state(), ClientState::Connected);

        let sub = client
            .subscribe(ServiceRange::single(18888, 17), 1000, Filter::SERVICE)
            .await
            .unwrap();
        assert_eq!(client.state(), ClientState::Subscribed);

        let mut buf = [0u8; 64];
        let n = service.read(&mut buf).await.unwrap();
        assert_eq!(n, SUBSCRIPTION_LEN);
        assert_eq!(Subscription::decode(&buf[..n]).unwrap(), sub);
    }

    #[tokio::test]
    async fn test_next_event_decodes_one_message() {
        let (client, service) = client_and_service();
        let sub = Subscription::new(ServiceRange::single(18888, 17), 1000, Filter::SERVICE);

        service.write(&published(sub).encode()).await.unwrap();

        let event = client.next_event().await.unwrap();
        assert_eq!(event.kind, EventKind::Published);
        assert_eq!((event.lower, event.upper), (17, 17));
        assert_eq!(event.subscription, sub);
    }

    #[tokio::test]
    async fn test_short_message_is_malformed() {
        let (client, service) = client_and_service();
        service.write(&[0u8; 12]).await.unwrap();

        let err = client.next_event().await.unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedMessage { expected: EVENT_LEN, actual: 12, .. }
        ));
    }

    #[tokio::test]
    async fn test_oversized_message_is_malformed() {
        let (client, service) = client_and_service();
        let sub = Subscription::new(ServiceRange::single(18888, 17), 1000, Filter::SERVICE);

        let mut message = published(sub).encode().to_vec();
        message.extend_from_slice(&[0xee; 16]);
        service.write(&message).await.unwrap();

        let err = client.next_event().await.unwrap_err();
        match err {
            Error::MalformedMessage { expected, actual, .. } => {
                assert_eq!(expected, EVENT_LEN);
                assert!(actual > EVENT_LEN);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_sets_cancel_bit() {
        let (client, service) = client_and_service();
        let sub = Subscription::new(ServiceRange::single(7, 7), 0, Filter::PORTS);

        client.cancel(&sub).await.unwrap();
        assert_eq!(client.state(), ClientState::Connected);

        let mut buf = [0u8; SUBSCRIPTION_LEN];
        service.read(&mut buf).await.unwrap();
        let sent = Subscription::decode(&buf).unwrap();
        assert_eq!(sent.filter, Filter::PORTS | Filter::CANCEL);
    }

    #[tokio::test]
    async fn test_event_stream_ends_on_close() {
        let (client, service) = client_and_service();
        let client = Arc::new(client);
        let sub = Subscription::new(ServiceRange::single(1, 1), 0, Filter::SERVICE);
        service.write(&published(sub).encode()).await.unwrap();
        service.write(&published(sub).encode()).await.unwrap();

        let closer = {
            let client = client.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                client.close().unwrap();
            })
        };

        let events: Vec<_> = client.events().collect().await;
        closer.await.unwrap();

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.is_ok()));
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn test_read_deadline_applies_to_events() {
        let (client, _service) = client_and_service();
        client
            .connection()
            .set_read_deadline(Some(tokio::time::Instant::now() + Duration::from_millis(20)));

        assert!(client.next_event().await.unwrap_err().is_timeout());
    }
}
