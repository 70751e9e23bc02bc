//! One-shot uplink bandwidth probe.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use crate::error::TransportError;
use crate::frame::{
    read_frame, Frame, FrameKind, GoodbyePayload, LinktestEnd, LinktestReport, SessionHello,
};
use crate::ingest::{millis, parse_endpoint};
use crate::{TransportResult, DEFAULT_INGEST_PORT};

/// Link test settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinktestConfig {
    /// Link-test endpoint, same URL forms as the ingest server.
    pub url: String,

    /// How long to send probe data.
    #[serde(with = "millis")]
    pub probe_duration: Duration,

    /// Upper bound on probe data.
    pub max_probe_bytes: u64,

    /// Size of one probe frame payload.
    pub chunk_bytes: usize,

    /// Whole test including the server report.
    #[serde(with = "millis")]
    pub timeout: Duration,

    /// Bitrate the uplink must sustain for a positive recommendation.
    pub min_bitrate_kbps: u32,
}

impl Default for LinktestConfig {
    fn default() -> Self {
        Self {
            url: format!("livecast://127.0.0.1:{DEFAULT_INGEST_PORT}"),
            probe_duration: Duration::from_secs(3),
            max_probe_bytes: 8 * 1024 * 1024,
            chunk_bytes: 16 * 1024,
            timeout: Duration::from_secs(10),
            min_bitrate_kbps: 0,
        }
    }
}

/// Outcome of a link test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinktestResult {
    pub speed_bytes_per_sec: f32,
    pub recommendation: bool,
}

impl LinktestResult {
    pub fn from_speed(speed_bytes_per_sec: f32, min_bitrate_kbps: u32) -> Self {
        let kbps = speed_bytes_per_sec * 8.0 / 1000.0;
        Self {
            speed_bytes_per_sec,
            recommendation: speed_bytes_per_sec > 0.0 && kbps >= min_bitrate_kbps as f32,
        }
    }

    fn negative(speed_bytes_per_sec: f32) -> Self {
        Self {
            speed_bytes_per_sec,
            recommendation: false,
        }
    }
}

/// Runs at most one link test at a time on its own thread and runtime.
pub struct LinkTester {
    running: Arc<AtomicBool>,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LinkTester {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
            thread: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start a test. `on_complete` runs on the test thread with the result;
    /// a timeout or failure gives a negative recommendation. It is not called
    /// when the test is cancelled.
    #[instrument(name = "linktest_start", skip(self, config, on_complete))]
    pub fn start<F>(&self, application_id: &str, config: LinktestConfig, on_complete: F) -> TransportResult<()>
    where
        F: FnOnce(LinktestResult) + Send + 'static,
    {
        if application_id.is_empty() {
            return Err(TransportError::MissingApplicationId);
        }
        let address = parse_endpoint(&config.url)?;

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TransportError::LinktestRunning);
        }

        info!(address = %address, "Starting link test");
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let running = Arc::clone(&self.running);
        let hello = SessionHello::probe(application_id);

        let spawned = thread::Builder::new()
            .name("linktest".into())
            .spawn(move || {
                let outcome = run_linktest(&address, &hello, &config, cancel_rx);
                running.store(false, Ordering::SeqCst);
                if let Some(result) = outcome {
                    info!(
                        speed = result.speed_bytes_per_sec,
                        recommendation = result.recommendation,
                        "Link test finished"
                    );
                    on_complete(result);
                }
            });

        match spawned {
            Ok(handle) => {
                *self.cancel.lock() = Some(cancel_tx);
                // The previous test thread has already finished
                *self.thread.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(TransportError::Io(e))
            }
        }
    }

    /// Cancel a running test and wait for its thread.
    pub fn cancel(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            let _ = cancel.send(());
        }
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Default for LinkTester {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LinkTester {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run_linktest(
    address: &str,
    hello: &SessionHello,
    config: &LinktestConfig,
    cancel: oneshot::Receiver<()>,
) -> Option<LinktestResult> {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!(error = %e, "Could not create link test runtime");
            return Some(LinktestResult::negative(0.0));
        }
    };

    let sent = AtomicU64::new(0);
    let started = Instant::now();

    runtime.block_on(async {
        tokio::select! {
            _ = cancel => {
                info!("Link test cancelled");
                None
            }
            outcome = tokio::time::timeout(config.timeout, probe(address, hello, config, &sent)) => {
                Some(match outcome {
                    Ok(Ok(speed)) => LinktestResult::from_speed(speed, config.min_bitrate_kbps),
                    Ok(Err(e)) => {
                        warn!(error = %e, "Link test failed");
                        LinktestResult::negative(0.0)
                    }
                    Err(_) => {
                        let elapsed = started.elapsed().as_secs_f32().max(f32::EPSILON);
                        let speed = sent.load(Ordering::Relaxed) as f32 / elapsed;
                        warn!(speed, "Link test timed out");
                        LinktestResult::negative(speed)
                    }
                })
            }
        }
    })
}

async fn probe(
    address: &str,
    hello: &SessionHello,
    config: &LinktestConfig,
    sent: &AtomicU64,
) -> TransportResult<f32> {
    let mut stream = TcpStream::connect(address)
        .await
        .map_err(|e| TransportError::ConnectionFailed(format!("TCP connect to {address}: {e}")))?;
    stream.set_nodelay(true)?;
    stream
        .write_all(&Frame::json(FrameKind::Hello, 0, hello)?.to_bytes())
        .await?;

    let chunk = Frame::new(
        FrameKind::LinktestData,
        0,
        Bytes::from(vec![0u8; config.chunk_bytes.max(1)]),
    )
    .to_bytes();
    let start = Instant::now();
    let mut total = 0u64;
    while start.elapsed() < config.probe_duration && total < config.max_probe_bytes {
        stream.write_all(&chunk).await?;
        total += chunk.len() as u64;
        sent.store(total, Ordering::Relaxed);
    }

    let elapsed_ms = start.elapsed().as_millis().min(u32::MAX as u128) as u32;
    debug!(bytes = total, elapsed_ms, "Probe data sent");
    let end = Frame::json(FrameKind::LinktestEnd, elapsed_ms, &LinktestEnd { bytes_sent: total })?;
    stream.write_all(&end.to_bytes()).await?;

    let mut buf = BytesMut::new();
    loop {
        let frame = read_frame(&mut stream, &mut buf).await?.ok_or_else(|| {
            TransportError::ConnectionLost("closed before the link test report".to_string())
        })?;
        match frame.kind {
            FrameKind::LinktestReport => {
                let report: LinktestReport = frame.parse_json()?;
                return Ok(report.speed_bytes_per_sec());
            }
            FrameKind::Goodbye => {
                let goodbye: GoodbyePayload = frame.parse_json().unwrap_or_default();
                return Err(TransportError::Rejected(goodbye.reason));
            }
            _ => {}
        }
    }
}
