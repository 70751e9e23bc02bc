//! In-process ingest server for tests and local demos.

use std::thread::{self, JoinHandle};
use std::time::Instant;

use bytes::BytesMut;
use crossbeam_channel::{Receiver, Sender};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::frame::{read_frame, Frame, FrameKind, GoodbyePayload, HelloAck, LinktestReport};
use crate::TransportResult;

/// Behavior of a [`LoopbackServer`].
#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Broadcast id returned in `HelloAck`; `None` rejects every session.
    pub broadcast_id: Option<String>,

    /// Answer `LinktestEnd` with a report.
    pub answer_linktest: bool,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            broadcast_id: Some("loopback".to_string()),
            answer_linktest: true,
        }
    }
}

/// Ingest server on 127.0.0.1 serving one connection at a time.
///
/// Every frame it receives is forwarded to [`received`](Self::received);
/// frames given to [`send`](Self::send) go to the current client.
pub struct LoopbackServer {
    url: String,
    received: Receiver<Frame>,
    outbound: mpsc::UnboundedSender<Frame>,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl LoopbackServer {
    pub fn start(options: LoopbackOptions) -> TransportResult<Self> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let url = format!("livecast://{}", listener.local_addr()?);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (received_tx, received) = crossbeam_channel::unbounded();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = oneshot::channel();

        let thread = thread::Builder::new()
            .name("loopback-ingest".into())
            .spawn(move || {
                runtime.block_on(serve(listener, options, received_tx, outbound_rx, stop_rx));
            })?;

        Ok(Self {
            url,
            received,
            outbound,
            stop: Some(stop),
            thread: Some(thread),
        })
    }

    /// `livecast://` URL of the listening socket.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn received(&self) -> &Receiver<Frame> {
        &self.received
    }

    /// Send a frame to the connected client.
    pub fn send(&self, frame: Frame) {
        let _ = self.outbound.send(frame);
    }
}

impl Drop for LoopbackServer {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn serve(
    listener: std::net::TcpListener,
    options: LoopbackOptions,
    received: Sender<Frame>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    mut stop: oneshot::Receiver<()>,
) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            warn!(error = %e, "Loopback listener failed");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = &mut stop => return,
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        warn!(error = %e, "Loopback accept failed");
                        return;
                    }
                };
                tokio::select! {
                    _ = &mut stop => return,
                    result = serve_connection(stream, &options, &received, &mut outbound) => {
                        if let Err(e) = result {
                            debug!(error = %e, "Loopback connection ended");
                        }
                    }
                }
            }
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    options: &LoopbackOptions,
    received: &Sender<Frame>,
    outbound: &mut mpsc::UnboundedReceiver<Frame>,
) -> TransportResult<()> {
    let mut buf = BytesMut::new();
    let mut probe_started: Option<Instant> = None;
    let mut probe_bytes = 0u64;

    loop {
        tokio::select! {
            frame = read_frame(&mut stream, &mut buf) => {
                let Some(frame) = frame? else {
                    return Ok(());
                };
                let reply = match frame.kind {
                    FrameKind::Hello => Some(match &options.broadcast_id {
                        Some(id) => Frame::json(FrameKind::HelloAck, 0, &HelloAck {
                            broadcast_id: id.clone(),
                        })?,
                        None => Frame::json(FrameKind::Goodbye, 0, &GoodbyePayload {
                            reason: "rejected".to_string(),
                        })?,
                    }),
                    FrameKind::LinktestData => {
                        probe_started.get_or_insert_with(Instant::now);
                        probe_bytes += frame.encoded_len() as u64;
                        None
                    }
                    FrameKind::LinktestEnd if options.answer_linktest => {
                        let duration_ms = probe_started
                            .map_or(0, |t| t.elapsed().as_millis() as u64)
                            .max(1);
                        Some(Frame::json(FrameKind::LinktestReport, 0, &LinktestReport {
                            bytes_received: probe_bytes,
                            duration_ms,
                        })?)
                    }
                    _ => None,
                };
                let _ = received.send(frame);
                if let Some(reply) = reply {
                    stream.write_all(&reply.to_bytes()).await?;
                }
            }
            Some(frame) = outbound.recv() => {
                stream.write_all(&frame.to_bytes()).await?;
            }
        }
    }
}
