//! Concrete endpoint kinds for the packet router (spec §4.J endpoint
//! catalog): broker topics, pub/sub sockets, UDP, and TCP.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::broker::{BrokerClient, BrokerError, PublishHeaders};
use crate::domain_types::RoutingKey;

/// Errors from endpoint connect/send/disconnect operations.
#[derive(Error, Debug)]
pub enum EndpointError {
    /// Underlying broker operation failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// This endpoint kind does not support `send` (an inbound-only kind).
    #[error("endpoint does not support sending")]
    NotSendable,

    /// Neither `bind` nor `connect` address was configured.
    #[error("endpoint requires either a bind or connect address")]
    NoAddress,
}

const UDP_RECV_BUFFER: usize = 65536;

/// Implemented by every concrete endpoint kind. `connect` wires up any
/// background receive task, forwarding inbound frames to `inbound_tx`.
/// `send` is a no-op error for endpoints that are receive-only.
#[async_trait]
pub trait RouterEndpoint: Send + Sync {
    /// Starts the endpoint: binds/connects sockets, declares broker queues,
    /// and spawns any inbound receive loop.
    async fn connect(&self, inbound_tx: mpsc::UnboundedSender<Vec<u8>>) -> Result<(), EndpointError>;

    /// Stops any background receive task and releases sockets.
    async fn disconnect(&self) -> Result<(), EndpointError>;

    /// Sends `data` out this endpoint, if it supports sending.
    async fn send(&self, data: &[u8]) -> Result<(), EndpointError> {
        let _ = data;
        Err(EndpointError::NotSendable)
    }

    /// Stable type tag reported by `router.rpc.list`.
    fn type_identifier(&self) -> &'static str;
}

/// `broker-in`: consumes a broker queue bound to `exchange`/`routing_key`
/// and forwards every delivery as an inbound frame.
pub struct BrokerInEndpoint {
    broker: Arc<BrokerClient>,
    exchange: String,
    routing_key: String,
}

impl BrokerInEndpoint {
    /// Builds a broker-in endpoint bound to `exchange`/`routing_key`.
    pub fn new(broker: Arc<BrokerClient>, exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self { broker, exchange: exchange.into(), routing_key: routing_key.into() }
    }
}

#[async_trait]
impl RouterEndpoint for BrokerInEndpoint {
    async fn connect(&self, inbound_tx: mpsc::UnboundedSender<Vec<u8>>) -> Result<(), EndpointError> {
        use futures_util::StreamExt;

        let queue = self.broker.declare_queue("").await?;
        self.broker.bind_queue(&queue.name, &self.exchange, &self.routing_key).await?;
        let mut consumer = self.broker.consume(&queue.name, &queue.name).await?;
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let Ok(delivery) = delivery else { continue };
                if inbound_tx.send(delivery.data.clone()).is_err() {
                    break;
                }
                let _ = delivery.ack(lapin::options::BasicAckOptions::default()).await;
            }
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), EndpointError> {
        Ok(())
    }

    fn type_identifier(&self) -> &'static str {
        "broker-in"
    }
}

/// `broker-out`: publishes every routed frame to `exchange`/`routing_key`.
pub struct BrokerOutEndpoint {
    broker: Arc<BrokerClient>,
    exchange: String,
    routing_key: RoutingKey,
}

impl BrokerOutEndpoint {
    /// Builds a broker-out endpoint publishing to `exchange`/`routing_key`.
    pub fn new(broker: Arc<BrokerClient>, exchange: impl Into<String>, routing_key: RoutingKey) -> Self {
        Self { broker, exchange: exchange.into(), routing_key }
    }
}

#[async_trait]
impl RouterEndpoint for BrokerOutEndpoint {
    async fn connect(&self, _inbound_tx: mpsc::UnboundedSender<Vec<u8>>) -> Result<(), EndpointError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), EndpointError> {
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), EndpointError> {
        self.broker
            .publish(&self.exchange, &self.routing_key, data, PublishHeaders::default())
            .await?;
        Ok(())
    }

    fn type_identifier(&self) -> &'static str {
        "broker-out"
    }
}

/// `subscriber-socket`: a ZeroMQ SUB socket, forwarding every received
/// message as an inbound frame.
pub struct SubscriberSocketEndpoint {
    bind: Option<String>,
    connect: Option<String>,
    topic: String,
    socket: Mutex<Option<zeromq::SubSocket>>,
}

impl SubscriberSocketEndpoint {
    /// Builds a subscriber endpoint on `bind` (server side) or `connect`
    /// (client side), exactly one of which must be set, with `topic` as
    /// the subscription filter (empty string subscribes to everything).
    pub fn new(bind: Option<String>, connect: Option<String>, topic: impl Into<String>) -> Self {
        Self { bind, connect, topic: topic.into(), socket: Mutex::new(None) }
    }
}

#[async_trait]
impl RouterEndpoint for SubscriberSocketEndpoint {
    async fn connect(&self, inbound_tx: mpsc::UnboundedSender<Vec<u8>>) -> Result<(), EndpointError> {
        use zeromq::{Socket, SocketRecv};

        let mut socket = zeromq::SubSocket::new();
        if let Some(addr) = &self.connect {
            socket.connect(addr).await.map_err(|e| EndpointError::Io(std::io::Error::other(e)))?;
        } else if let Some(addr) = &self.bind {
            socket.bind(addr).await.map_err(|e| EndpointError::Io(std::io::Error::other(e)))?;
        } else {
            return Err(EndpointError::NoAddress);
        }
        socket.subscribe(&self.topic).await.map_err(|e| EndpointError::Io(std::io::Error::other(e)))?;

        tokio::spawn({
            let mut socket = socket;
            async move {
                loop {
                    match socket.recv().await {
                        Ok(message) => {
                            if let Some(frame) = message.into_vec().first() {
                                if inbound_tx.send(frame.to_vec()).is_err() {
                                    break;
                                }
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "subscriber socket recv failed");
                            break;
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), EndpointError> {
        *self.socket.lock().await = None;
        Ok(())
    }

    fn type_identifier(&self) -> &'static str {
        "subscriber-socket"
    }
}

/// `publisher-socket`: a ZeroMQ PUB socket, publishing every routed frame.
pub struct PublisherSocketEndpoint {
    bind: Option<String>,
    connect: Option<String>,
    socket: Mutex<Option<zeromq::PubSocket>>,
}

impl PublisherSocketEndpoint {
    /// Builds a publisher endpoint on `bind` or `connect`.
    pub fn new(bind: Option<String>, connect: Option<String>) -> Self {
        Self { bind, connect, socket: Mutex::new(None) }
    }
}

#[async_trait]
impl RouterEndpoint for PublisherSocketEndpoint {
    async fn connect(&self, _inbound_tx: mpsc::UnboundedSender<Vec<u8>>) -> Result<(), EndpointError> {
        use zeromq::Socket;

        let mut socket = zeromq::PubSocket::new();
        if let Some(addr) = &self.connect {
            socket.connect(addr).await.map_err(|e| EndpointError::Io(std::io::Error::other(e)))?;
        } else if let Some(addr) = &self.bind {
            socket.bind(addr).await.map_err(|e| EndpointError::Io(std::io::Error::other(e)))?;
        } else {
            return Err(EndpointError::NoAddress);
        }
        *self.socket.lock().await = Some(socket);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), EndpointError> {
        *self.socket.lock().await = None;
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), EndpointError> {
        use zeromq::SocketSend;

        let mut guard = self.socket.lock().await;
        let socket = guard.as_mut().ok_or(EndpointError::NotSendable)?;
        socket
            .send(data.to_vec().into())
            .await
            .map_err(|e| EndpointError::Io(std::io::Error::other(e)))
    }

    fn type_identifier(&self) -> &'static str {
        "publisher-socket"
    }
}

/// `udp-in`: binds a UDP socket and forwards every received datagram.
pub struct UdpInEndpoint {
    bind_addr: SocketAddr,
}

impl UdpInEndpoint {
    /// Builds a `udp-in` endpoint listening on `bind_addr`.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self { bind_addr }
    }
}

#[async_trait]
impl RouterEndpoint for UdpInEndpoint {
    async fn connect(&self, inbound_tx: mpsc::UnboundedSender<Vec<u8>>) -> Result<(), EndpointError> {
        let socket = UdpSocket::bind(self.bind_addr).await?;
        tokio::spawn(async move {
            let mut buf = vec![0u8; UDP_RECV_BUFFER];
            loop {
                match socket.recv(&mut buf).await {
                    Ok(n) => {
                        if inbound_tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "udp-in recv failed");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), EndpointError> {
        Ok(())
    }

    fn type_identifier(&self) -> &'static str {
        "udp-in"
    }
}

/// `udp-out`: a connected UDP socket, sending every routed frame.
pub struct UdpOutEndpoint {
    connect_addr: SocketAddr,
    socket: Mutex<Option<UdpSocket>>,
}

impl UdpOutEndpoint {
    /// Builds a `udp-out` endpoint targeting `connect_addr`.
    pub fn new(connect_addr: SocketAddr) -> Self {
        Self { connect_addr, socket: Mutex::new(None) }
    }
}

#[async_trait]
impl RouterEndpoint for UdpOutEndpoint {
    async fn connect(&self, _inbound_tx: mpsc::UnboundedSender<Vec<u8>>) -> Result<(), EndpointError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(self.connect_addr).await?;
        *self.socket.lock().await = Some(socket);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), EndpointError> {
        *self.socket.lock().await = None;
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), EndpointError> {
        let guard = self.socket.lock().await;
        let socket = guard.as_ref().ok_or(EndpointError::NotSendable)?;
        socket.send(data).await?;
        Ok(())
    }

    fn type_identifier(&self) -> &'static str {
        "udp-out"
    }
}

/// `tcp`: bidirectional. Binds (server) or connects (client); once a
/// connection is live, every routed frame is written to it and every read
/// chunk is forwarded as an inbound frame.
pub struct TcpEndpoint {
    bind: Option<SocketAddr>,
    connect: Option<SocketAddr>,
    stream: Mutex<Option<Arc<Mutex<TcpStream>>>>,
}

impl TcpEndpoint {
    /// Builds a `tcp` endpoint on `bind` (accepts one connection) or
    /// `connect` (dials out), exactly one of which must be set.
    pub fn new(bind: Option<SocketAddr>, connect: Option<SocketAddr>) -> Self {
        Self { bind, connect, stream: Mutex::new(None) }
    }
}

#[async_trait]
impl RouterEndpoint for TcpEndpoint {
    async fn connect(&self, inbound_tx: mpsc::UnboundedSender<Vec<u8>>) -> Result<(), EndpointError> {
        let stream = if let Some(addr) = self.connect {
            TcpStream::connect(addr).await?
        } else if let Some(addr) = self.bind {
            let listener = TcpListener::bind(addr).await?;
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "tcp endpoint accepted connection");
            stream
        } else {
            return Err(EndpointError::NoAddress);
        };

        let shared = Arc::new(Mutex::new(stream));
        *self.stream.lock().await = Some(Arc::clone(&shared));

        tokio::spawn(async move {
            let mut buf = vec![0u8; UDP_RECV_BUFFER];
            loop {
                let n = {
                    let mut guard = shared.lock().await;
                    guard.read(&mut buf).await
                };
                match n {
                    Ok(0) => break,
                    Ok(n) => {
                        if inbound_tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "tcp endpoint read failed");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), EndpointError> {
        *self.stream.lock().await = None;
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), EndpointError> {
        let guard = self.stream.lock().await;
        let shared = guard.as_ref().ok_or(EndpointError::NotSendable)?;
        shared.lock().await.write_all(data).await?;
        Ok(())
    }

    fn type_identifier(&self) -> &'static str {
        "tcp"
    }
}
