//! Ingest server connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use crate::connection::ConnectionState;
use crate::error::TransportError;
use crate::frame::{
    read_frame, ChatPayload, ControlMessage, Frame, FrameKind, GoodbyePayload, HelloAck,
    SessionHello,
};
use crate::send_buffer::{SendBuffer, SendBufferConfig};
use crate::{TransportResult, DEFAULT_INGEST_PORT, INBOUND_CHANNEL_CAPACITY};

/// Time allowed for queued control frames to reach the socket on disconnect.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Ingest connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// `livecast://host:port` or `tcp://host:port`.
    pub url: String,

    #[serde(with = "millis")]
    pub connect_timeout: Duration,

    #[serde(with = "millis")]
    pub handshake_timeout: Duration,

    pub send_buffer: SendBufferConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            url: format!("livecast://127.0.0.1:{DEFAULT_INGEST_PORT}"),
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            send_buffer: SendBufferConfig::default(),
        }
    }
}

/// Durations as integer milliseconds in config files.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Messages from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Control(ControlMessage),
    Chat(ChatPayload),
    TalkbackAudio { timestamp_ms: u32, data: Bytes },
    /// The server ended the session.
    Closed { reason: String },
    /// The connection failed.
    Disconnected { message: String },
}

/// Transport statistics.
#[derive(Debug, Clone, Default)]
pub struct TransportStatistics {
    pub bytes_sent: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub backlog_bytes: u64,
}

/// Resolve an ingest URL to `host:port`.
pub(crate) fn parse_endpoint(url: &str) -> TransportResult<String> {
    let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    if !matches!(parsed.scheme(), "livecast" | "tcp") {
        return Err(TransportError::InvalidUrl(format!(
            "unsupported scheme {}",
            parsed.scheme()
        )));
    }
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| TransportError::InvalidUrl("missing host".to_string()))?;
    let port = parsed.port().unwrap_or(DEFAULT_INGEST_PORT);
    Ok(format!("{host}:{port}"))
}

/// Reports a lost connection exactly once.
#[derive(Clone)]
struct LinkWatch {
    state: Arc<RwLock<ConnectionState>>,
    lost: Arc<AtomicBool>,
    inbound: Sender<InboundMessage>,
}

impl LinkWatch {
    fn report(&self, message: InboundMessage, reason: String) {
        if self.lost.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.write() = ConnectionState::Failed { reason };
        if self.inbound.try_send(message).is_err() {
            warn!("Inbound channel unavailable, connection loss not delivered");
        }
    }
}

/// Client side of one broadcast session.
///
/// The connection runs on a private tokio runtime: a writer task drains the
/// [`SendBuffer`] and a reader task forwards server messages to a crossbeam
/// channel. A lost connection is reported once as
/// [`InboundMessage::Disconnected`]; there is no reconnect.
pub struct IngestClient {
    address: String,
    config: IngestConfig,
    state: Arc<RwLock<ConnectionState>>,
    runtime: Option<Runtime>,
    writer: Option<JoinHandle<()>>,
    buffer: Option<Arc<SendBuffer>>,
    lost: Arc<AtomicBool>,
    frames_sent: Arc<AtomicU64>,
    connected_at: Option<Instant>,
}

impl IngestClient {
    pub fn new(config: IngestConfig) -> TransportResult<Self> {
        let address = parse_endpoint(&config.url)?;
        Ok(Self {
            address,
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            runtime: None,
            writer: None,
            buffer: None,
            lost: Arc::new(AtomicBool::new(false)),
            frames_sent: Arc::new(AtomicU64::new(0)),
            connected_at: None,
        })
    }

    /// Connect and complete the Hello/HelloAck handshake. Blocks until the
    /// server answers or a timeout expires.
    #[instrument(name = "ingest_connect", skip(self, hello), fields(address = %self.address))]
    pub fn connect(&mut self, hello: &SessionHello) -> TransportResult<Receiver<InboundMessage>> {
        if self.runtime.is_some() {
            return Err(TransportError::AlreadyConnected);
        }

        info!("Connecting to ingest server");
        *self.state.write() = ConnectionState::Connecting;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("ingest")
            .enable_all()
            .build()?;

        let hello = Frame::json(FrameKind::Hello, 0, hello)?;
        let handshake = runtime.block_on(handshake(
            &self.address,
            hello,
            self.config.connect_timeout,
            self.config.handshake_timeout,
        ));
        let (stream, ack, leftover) = match handshake {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Ingest handshake failed");
                *self.state.write() = ConnectionState::Failed {
                    reason: e.to_string(),
                };
                return Err(e);
            }
        };

        info!(broadcast_id = %ack.broadcast_id, "Ingest session established");
        *self.state.write() = ConnectionState::Connected {
            broadcast_id: ack.broadcast_id,
        };

        let buffer = Arc::new(SendBuffer::new(self.config.send_buffer));
        let (inbound_tx, inbound_rx) = crossbeam_channel::bounded(INBOUND_CHANNEL_CAPACITY);
        self.lost.store(false, Ordering::SeqCst);
        let watch = LinkWatch {
            state: Arc::clone(&self.state),
            lost: Arc::clone(&self.lost),
            inbound: inbound_tx.clone(),
        };

        let (read_half, write_half) = stream.into_split();
        self.writer = Some(runtime.spawn(write_loop(
            write_half,
            Arc::clone(&buffer),
            Arc::clone(&self.frames_sent),
            watch.clone(),
        )));
        runtime.spawn(read_loop(read_half, leftover, inbound_tx, watch));

        self.buffer = Some(buffer);
        self.runtime = Some(runtime);
        self.connected_at = Some(Instant::now());
        Ok(inbound_rx)
    }

    /// Queue a frame. Never blocks.
    pub fn send(&self, frame: Frame) -> TransportResult<()> {
        match &self.buffer {
            Some(buffer) if self.is_connected() => buffer.push(frame),
            _ => Err(TransportError::NotConnected),
        }
    }

    pub fn send_control(&self, message: &ControlMessage) -> TransportResult<()> {
        self.send(Frame::json(FrameKind::Control, self.timestamp_ms(), message)?)
    }

    pub fn send_chat(&self, payload: &ChatPayload) -> TransportResult<()> {
        self.send(Frame::json(FrameKind::Chat, self.timestamp_ms(), payload)?)
    }

    /// Milliseconds since the session was established.
    pub fn timestamp_ms(&self) -> u32 {
        self.connected_at
            .map_or(0, |t| t.elapsed().as_millis().min(u32::MAX as u128) as u32)
    }

    /// Send buffer of the current session.
    pub fn buffer(&self) -> Option<Arc<SendBuffer>> {
        self.buffer.clone()
    }

    /// Broadcast id assigned by the server.
    pub fn broadcast_id(&self) -> Option<String> {
        match &*self.state.read() {
            ConnectionState::Connected { broadcast_id } => Some(broadcast_id.clone()),
            _ => None,
        }
    }

    /// Send a goodbye, flush control frames and close the connection.
    #[instrument(name = "ingest_disconnect", skip(self))]
    pub fn disconnect(&mut self) -> TransportResult<()> {
        let Some(runtime) = self.runtime.take() else {
            return Ok(());
        };
        info!("Disconnecting from ingest server");

        self.lost.store(true, Ordering::SeqCst);
        if let Some(buffer) = self.buffer.take() {
            let goodbye = GoodbyePayload {
                reason: "client stopped".to_string(),
            };
            if let Ok(frame) = Frame::json(FrameKind::Goodbye, self.timestamp_ms(), &goodbye) {
                let _ = buffer.push(frame);
            }
            buffer.close();
        }

        if let Some(writer) = self.writer.take() {
            let flushed = runtime.block_on(tokio::time::timeout(FLUSH_TIMEOUT, writer));
            if flushed.is_err() {
                warn!("Ingest writer did not flush in time");
            }
        }
        runtime.shutdown_timeout(Duration::from_secs(1));

        *self.state.write() = ConnectionState::Disconnected;
        self.connected_at = None;
        info!("Disconnected from ingest server");
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected()
    }

    pub fn statistics(&self) -> TransportStatistics {
        let (bytes_sent, frames_dropped, backlog_bytes) = self
            .buffer
            .as_ref()
            .map(|b| (b.sent_bytes(), b.dropped_frames(), b.backlog_bytes()))
            .unwrap_or_default();
        TransportStatistics {
            bytes_sent,
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped,
            backlog_bytes,
        }
    }
}

impl Drop for IngestClient {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

async fn handshake(
    address: &str,
    hello: Frame,
    connect_timeout: Duration,
    handshake_timeout: Duration,
) -> TransportResult<(TcpStream, HelloAck, BytesMut)> {
    let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect(address))
        .await
        .map_err(|_| TransportError::Timeout(format!("connecting to {address}")))?
        .map_err(|e| TransportError::ConnectionFailed(format!("TCP connect to {address}: {e}")))?;
    stream.set_nodelay(true)?;

    debug!("TCP connection established, sending hello");
    stream.write_all(&hello.to_bytes()).await?;

    let mut buf = BytesMut::with_capacity(4096);
    let ack = tokio::time::timeout(handshake_timeout, read_ack(&mut stream, &mut buf))
        .await
        .map_err(|_| TransportError::Timeout("waiting for HelloAck".to_string()))??;
    Ok((stream, ack, buf))
}

async fn read_ack(stream: &mut TcpStream, buf: &mut BytesMut) -> TransportResult<HelloAck> {
    loop {
        let frame = read_frame(stream, buf).await?.ok_or_else(|| {
            TransportError::ConnectionFailed("closed during handshake".to_string())
        })?;
        match frame.kind {
            FrameKind::HelloAck => return frame.parse_json(),
            FrameKind::Goodbye => {
                let goodbye: GoodbyePayload = frame.parse_json().unwrap_or_default();
                return Err(TransportError::Rejected(goodbye.reason));
            }
            other => debug!(kind = ?other, "Ignoring frame before HelloAck"),
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    buffer: Arc<SendBuffer>,
    frames_sent: Arc<AtomicU64>,
    watch: LinkWatch,
) {
    let mut out = BytesMut::new();
    while let Some(frame) = buffer.next().await {
        out.clear();
        frame.encode(&mut out);
        if let Err(e) = writer.write_all(&out).await {
            warn!(error = %e, "Ingest write failed");
            buffer.close();
            watch.report(
                InboundMessage::Disconnected {
                    message: e.to_string(),
                },
                e.to_string(),
            );
            return;
        }
        buffer.mark_sent(out.len());
        frames_sent.fetch_add(1, Ordering::Relaxed);
        trace!(kind = ?frame.kind, len = out.len(), "Frame sent");
    }

    let _ = writer.shutdown().await;
    debug!("Ingest writer finished");
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    mut buf: BytesMut,
    inbound: Sender<InboundMessage>,
    watch: LinkWatch,
) {
    loop {
        let frame = match read_frame(&mut reader, &mut buf).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                let message = "connection closed by server".to_string();
                watch.report(
                    InboundMessage::Disconnected {
                        message: message.clone(),
                    },
                    message,
                );
                return;
            }
            Err(e) => {
                warn!(error = %e, "Ingest read failed");
                watch.report(
                    InboundMessage::Disconnected {
                        message: e.to_string(),
                    },
                    e.to_string(),
                );
                return;
            }
        };

        match frame.kind {
            FrameKind::Control => match frame.parse_json::<ControlMessage>() {
                Ok(message) => deliver(&inbound, InboundMessage::Control(message)),
                Err(e) => warn!(error = %e, "Malformed control frame"),
            },
            FrameKind::Chat => match frame.parse_json::<ChatPayload>() {
                Ok(chat) => deliver(&inbound, InboundMessage::Chat(chat)),
                Err(e) => warn!(error = %e, "Malformed chat frame"),
            },
            FrameKind::TalkbackAudio => deliver(
                &inbound,
                InboundMessage::TalkbackAudio {
                    timestamp_ms: frame.timestamp_ms,
                    data: frame.payload,
                },
            ),
            FrameKind::Goodbye => {
                let goodbye: GoodbyePayload = frame.parse_json().unwrap_or_default();
                info!(reason = %goodbye.reason, "Server closed the session");
                watch.report(
                    InboundMessage::Closed {
                        reason: goodbye.reason.clone(),
                    },
                    goodbye.reason,
                );
                return;
            }
            other => trace!(kind = ?other, "Ignoring inbound frame"),
        }
    }
}

fn deliver(inbound: &Sender<InboundMessage>, message: InboundMessage) {
    match inbound.try_send(message) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => trace!("Inbound channel full, dropping message"),
        Err(TrySendError::Disconnected(_)) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackOptions, LoopbackServer};

    fn client_for(server: &LoopbackServer) -> IngestClient {
        IngestClient::new(IngestConfig {
            url: server.url().to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    fn hello() -> SessionHello {
        SessionHello {
            application_id: "app".into(),
            title: "first".into(),
            ..SessionHello::probe("app")
        }
    }

    fn next_of_kind(server: &LoopbackServer, kind: FrameKind) -> Frame {
        loop {
            let frame = server
                .received()
                .recv_timeout(Duration::from_secs(5))
                .unwrap();
            if frame.kind == kind {
                return frame;
            }
        }
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("livecast://127.0.0.1:9000").unwrap(),
            "127.0.0.1:9000"
        );
        assert_eq!(
            parse_endpoint("tcp://ingest.example.com").unwrap(),
            format!("ingest.example.com:{DEFAULT_INGEST_PORT}")
        );
        assert!(matches!(
            parse_endpoint("rtmp://host/app"),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(parse_endpoint("not a url").is_err());
    }

    #[test]
    fn test_handshake_and_send() {
        let server = LoopbackServer::start(LoopbackOptions::default()).unwrap();
        let mut client = client_for(&server);

        let _inbound = client.connect(&hello()).unwrap();
        assert!(client.is_connected());
        assert_eq!(client.broadcast_id().as_deref(), Some("loopback"));

        let hello_frame = next_of_kind(&server, FrameKind::Hello);
        let received: SessionHello = hello_frame.parse_json().unwrap();
        assert_eq!(received.title, "first");

        client
            .send_control(&ControlMessage::UpdateTitle {
                title: "second".into(),
            })
            .unwrap();
        let control = next_of_kind(&server, FrameKind::Control);
        assert_eq!(
            control.parse_json::<ControlMessage>().unwrap(),
            ControlMessage::UpdateTitle {
                title: "second".into()
            }
        );

        assert!(matches!(
            client.connect(&hello()),
            Err(TransportError::AlreadyConnected)
        ));

        client.disconnect().unwrap();
        next_of_kind(&server, FrameKind::Goodbye);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(
            client.send_chat(&ChatPayload {
                from: None,
                text: "late".into()
            }),
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn test_rejected_handshake() {
        let server = LoopbackServer::start(LoopbackOptions {
            broadcast_id: None,
            ..Default::default()
        })
        .unwrap();
        let mut client = client_for(&server);

        assert!(matches!(
            client.connect(&hello()),
            Err(TransportError::Rejected(_))
        ));
        assert!(client.state().is_failed());
    }

    #[test]
    fn test_inbound_messages() {
        let server = LoopbackServer::start(LoopbackOptions::default()).unwrap();
        let mut client = client_for(&server);
        let inbound = client.connect(&hello()).unwrap();
        next_of_kind(&server, FrameKind::Hello);

        let chat = ChatPayload {
            from: Some("viewer".into()),
            text: "hi".into(),
        };
        server.send(Frame::json(FrameKind::Chat, 0, &chat).unwrap());
        server.send(Frame::new(
            FrameKind::TalkbackAudio,
            40,
            Bytes::from_static(&[0u8; 8]),
        ));
        server.send(
            Frame::json(
                FrameKind::Goodbye,
                0,
                &GoodbyePayload {
                    reason: "moderated".into(),
                },
            )
            .unwrap(),
        );

        let timeout = Duration::from_secs(5);
        assert_eq!(
            inbound.recv_timeout(timeout).unwrap(),
            InboundMessage::Chat(chat)
        );
        assert!(matches!(
            inbound.recv_timeout(timeout).unwrap(),
            InboundMessage::TalkbackAudio { timestamp_ms: 40, .. }
        ));
        assert_eq!(
            inbound.recv_timeout(timeout).unwrap(),
            InboundMessage::Closed {
                reason: "moderated".into()
            }
        );
        assert!(client.state().is_failed());
    }

    #[test]
    fn test_server_loss_reported_once() {
        let server = LoopbackServer::start(LoopbackOptions::default()).unwrap();
        let mut client = client_for(&server);
        let inbound = client.connect(&hello()).unwrap();
        next_of_kind(&server, FrameKind::Hello);

        drop(server);

        let message = inbound.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(message, InboundMessage::Disconnected { .. }));
        assert!(inbound.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(matches!(
            client.send(Frame::new(FrameKind::Video, 0, Bytes::new())),
            Err(TransportError::NotConnected)
        ));
    }
}
