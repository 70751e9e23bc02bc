//! Per-broadcast monitor thread.
//!
//! Closes one uplink measurement window per interval, feeds it to the
//! adaptation controller and reports metrics. Between windows it serves
//! inbound server messages: talkback requests and audio, chat, and session
//! end. A lost or closed session is handed back to the engine as a
//! [`StopReason`]; the monitor never tears the broadcast down itself.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, trace, warn};

use livecast_audio::AudioChunk;
use livecast_encoder::{AdaptationController, EncoderControl, QualityLadder, UplinkWindow};
use livecast_ipc::{EngineEvent, StopReason, TalkbackRequest};
use livecast_transport::{ControlMessage, InboundMessage, UplinkMonitor, UplinkSample};

use crate::chat::ChatRelay;
use crate::error::EngineError;
use crate::metrics::MetricsCollector;
use crate::outbound::Outbound;
use crate::talkback::{RequestOutcome, TalkbackChannel};
use crate::{send_event, EngineResult};

/// Longest wait between two stop-flag checks.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Engine state shared with the monitor of every broadcast.
#[derive(Clone)]
pub(crate) struct SessionLinks {
    pub events: Sender<EngineEvent>,
    pub talkback: Arc<Mutex<TalkbackChannel>>,
    pub chat: Arc<ChatRelay>,
    /// Latest uplink window, default (health 0) when not broadcasting.
    pub uplink: Arc<RwLock<UplinkSample>>,
    pub stop_requests: Sender<StopReason>,
    pub capture_drops: Arc<AtomicU64>,
}

/// Everything one monitor run owns.
pub(crate) struct MonitorContext {
    pub links: SessionLinks,
    pub inbound: Receiver<InboundMessage>,
    pub uplink: UplinkMonitor,
    pub adaptation: AdaptationController,
    pub ladder: QualityLadder,
    pub control: Arc<EncoderControl>,
    pub metrics: Arc<MetricsCollector>,
    pub outbound: Outbound,
    pub talkback_audio: Option<Sender<AudioChunk>>,
    pub interval: Duration,
    pub metrics_every: u32,
}

/// Handle to the running monitor thread.
pub(crate) struct BroadcastMonitor {
    should_stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BroadcastMonitor {
    pub fn start(context: MonitorContext) -> EngineResult<Self> {
        let should_stop = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&should_stop);
        let thread = thread::Builder::new()
            .name("broadcast-monitor".into())
            .spawn(move || Monitor::new(context).run(&stop))
            .map_err(|e| EngineError::Thread(e.to_string()))?;
        Ok(Self {
            should_stop,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for BroadcastMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn adaptation_window(sample: &UplinkSample) -> UplinkWindow {
    UplinkWindow {
        backlog_bytes: sample.backlog_bytes,
        backlog_growth: sample.backlog_growth,
        dropped_frames: sample.window_drops,
    }
}

struct Monitor {
    cx: MonitorContext,
    connected: bool,
    windows: u32,
    audio_sequence: u64,
}

impl Monitor {
    fn new(cx: MonitorContext) -> Self {
        Self {
            cx,
            connected: true,
            windows: 0,
            audio_sequence: 0,
        }
    }

    #[instrument(name = "broadcast_monitor", skip_all)]
    fn run(mut self, should_stop: &AtomicBool) {
        debug!("Monitor started");
        let mut next_window = Instant::now() + self.cx.interval;

        while !should_stop.load(Ordering::SeqCst) {
            let wait = next_window
                .saturating_duration_since(Instant::now())
                .min(POLL_INTERVAL);

            if self.connected {
                select! {
                    recv(self.cx.inbound) -> msg => match msg {
                        Ok(message) => self.on_inbound(message),
                        Err(_) => self.lose(StopReason::NetworkLost {
                            message: "inbound channel closed".into(),
                        }),
                    },
                    default(wait) => {}
                }
            } else {
                thread::sleep(wait);
            }

            if Instant::now() >= next_window {
                self.close_window();
                next_window += self.cx.interval;
            }
        }
        debug!(windows = self.windows, "Monitor stopped");
    }

    fn close_window(&mut self) {
        let sample = self.cx.uplink.measure(self.connected);
        *self.cx.links.uplink.write() = sample;
        self.windows += 1;

        if self.connected {
            if let Some(decision) = self.cx.adaptation.on_window(adaptation_window(&sample)) {
                let rung = self.cx.ladder.rung(decision.rung());
                self.cx.control.set_rung(decision.rung());
                send_event(
                    &self.cx.links.events,
                    EngineEvent::QualityChanged {
                        width: rung.width,
                        height: rung.height,
                        bitrate_kbps: rung.bitrate_kbps,
                    },
                );
            }
        }

        if self.windows % self.cx.metrics_every.max(1) == 0 {
            let metrics = self.cx.metrics.snapshot(&sample);
            for warning in self.cx.metrics.check_warnings(&metrics) {
                send_event(&self.cx.links.events, EngineEvent::PerformanceWarning(warning));
            }
            send_event(&self.cx.links.events, EngineEvent::Metrics(metrics));
            self.cx.metrics.mark_reported();
        }
    }

    fn on_inbound(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Control(control) => self.on_control(control),
            InboundMessage::Chat(payload) => {
                let message = self.cx.links.chat.incoming(payload);
                send_event(&self.cx.links.events, EngineEvent::ChatMessage(message));
            }
            InboundMessage::TalkbackAudio { timestamp_ms, data } => {
                self.on_talkback_audio(timestamp_ms, &data)
            }
            InboundMessage::Closed { reason } => {
                self.lose(StopReason::ServerClosed { message: reason })
            }
            InboundMessage::Disconnected { message } => {
                self.lose(StopReason::NetworkLost { message })
            }
        }
    }

    fn on_control(&mut self, control: ControlMessage) {
        match control {
            ControlMessage::TalkbackRequest {
                talkback_id,
                caller,
            } => {
                let request = TalkbackRequest {
                    talkback_id,
                    caller,
                };
                let (outcome, before, after) = {
                    let mut talkback = self.cx.links.talkback.lock();
                    let before = talkback.state();
                    let outcome = talkback.on_request(request.clone());
                    (outcome, before, talkback.state())
                };
                match outcome {
                    RequestOutcome::Queued => {
                        send_event(&self.cx.links.events, EngineEvent::TalkbackRequested(request));
                    }
                    RequestOutcome::AutoDeclined(reply) => {
                        if let Err(e) = self.cx.outbound.control(&reply) {
                            warn!("Failed to decline talkback: {}", e);
                        }
                    }
                    RequestOutcome::Duplicate => {
                        debug!(talkback_id, "Duplicate talkback request ignored");
                    }
                }
                if before != after {
                    send_event(&self.cx.links.events, EngineEvent::TalkbackStateChanged(after));
                }
            }
            ControlMessage::TalkbackEnd { talkback_id } => {
                let (ended, before, after) = {
                    let mut talkback = self.cx.links.talkback.lock();
                    let before = talkback.state();
                    let ended = talkback.on_remote_end(talkback_id);
                    (ended, before, talkback.state())
                };
                if ended {
                    send_event(&self.cx.links.events, EngineEvent::TalkbackEnded { talkback_id });
                }
                if before != after {
                    send_event(&self.cx.links.events, EngineEvent::TalkbackStateChanged(after));
                }
            }
            ControlMessage::Stop { reason } => {
                info!(%reason, "Server requested stop");
                self.lose(StopReason::ServerClosed { message: reason });
            }
            other => debug!(?other, "Ignoring control message"),
        }
    }

    fn on_talkback_audio(&mut self, timestamp_ms: u32, data: &[u8]) {
        if !self.cx.links.talkback.lock().is_active() {
            trace!("Talkback audio without an active session");
            return;
        }
        let Some(sender) = &self.cx.talkback_audio else {
            return;
        };
        let chunk = match AudioChunk::from_le_bytes(data, timestamp_ms as u64 * 10_000, self.audio_sequence) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!("Bad talkback audio: {}", e);
                return;
            }
        };
        self.audio_sequence += 1;
        if let Err(TrySendError::Full(_)) = sender.try_send(chunk) {
            trace!("Talkback audio queue full, dropping chunk");
        }
    }

    fn lose(&mut self, reason: StopReason) {
        if !self.connected {
            return;
        }
        self.connected = false;
        warn!(reason = %reason.message(), "Broadcast session ended");
        if self.cx.links.stop_requests.try_send(reason).is_err() {
            debug!("Stop already requested");
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use livecast_encoder::{AdaptationDecision, AdaptationParams};
    use livecast_ipc::{Orientation, TalkbackState};
    use livecast_transport::{ChatPayload, Frame, FrameKind, SendBuffer, SendBufferConfig};

    use super::*;

    struct Harness {
        inbound: Sender<InboundMessage>,
        events: Receiver<EngineEvent>,
        stops: Receiver<StopReason>,
        buffer: Arc<SendBuffer>,
        talkback: Arc<Mutex<TalkbackChannel>>,
        audio: Receiver<AudioChunk>,
        monitor: BroadcastMonitor,
    }

    fn harness(talkback_enabled: bool) -> Harness {
        let (inbound_tx, inbound) = crossbeam_channel::bounded(16);
        let (events_tx, events) = crossbeam_channel::bounded(256);
        let (stop_tx, stops) = crossbeam_channel::bounded(1);
        let (audio_tx, audio) = crossbeam_channel::bounded(8);
        let buffer = Arc::new(SendBuffer::new(SendBufferConfig::default()));
        let talkback = Arc::new(Mutex::new(TalkbackChannel::new(talkback_enabled)));
        let ladder = QualityLadder::new((1280, 720), 0, 30.0);
        let stats = Arc::new(livecast_encoder::PipelineStats::default());

        let links = SessionLinks {
            events: events_tx,
            talkback: Arc::clone(&talkback),
            chat: Arc::new(ChatRelay::new(10)),
            uplink: Arc::new(RwLock::new(UplinkSample::default())),
            stop_requests: stop_tx,
            capture_drops: Arc::new(AtomicU64::new(0)),
        };
        let context = MonitorContext {
            inbound,
            uplink: UplinkMonitor::new(Arc::clone(&buffer), 5),
            adaptation: AdaptationController::new(AdaptationParams::default(), ladder.len(), 1),
            control: Arc::new(EncoderControl::new(1, Orientation::LandscapeRight)),
            ladder,
            metrics: Arc::new(MetricsCollector::new(30.0, stats, Arc::clone(&links.capture_drops))),
            outbound: Outbound::new(Arc::clone(&buffer)),
            talkback_audio: Some(audio_tx),
            interval: Duration::from_millis(50),
            metrics_every: 1,
            links,
        };

        Harness {
            inbound: inbound_tx,
            events,
            stops,
            buffer,
            talkback,
            audio,
            monitor: BroadcastMonitor::start(context).unwrap(),
        }
    }

    fn wait_for<F: Fn(&EngineEvent) -> bool>(events: &Receiver<EngineEvent>, predicate: F) -> EngineEvent {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = events.recv_timeout(remaining).expect("event not received");
            if predicate(&event) {
                return event;
            }
        }
    }

    #[test]
    fn test_saturated_uplink_steps_down_every_run_of_windows() {
        let buffer = Arc::new(SendBuffer::new(SendBufferConfig {
            media_bytes: 100_000,
            ..Default::default()
        }));
        let mut uplink = UplinkMonitor::new(Arc::clone(&buffer), 5);
        let mut adaptation = AdaptationController::new(AdaptationParams::default(), 6, 5);
        let start = Instant::now();
        let mut step_downs = 0;

        // 50 KB produced and 20 KB sent per window
        for window in 1..=40u64 {
            for _ in 0..5 {
                buffer
                    .push(Frame::new(FrameKind::Video, 0, Bytes::from(vec![0u8; 9_990])))
                    .unwrap();
            }
            for _ in 0..2 {
                let frame = buffer.pop().unwrap();
                buffer.mark_sent(frame.encoded_len());
            }
            let sample = uplink.measure_at(start + Duration::from_secs(window), true);
            if let Some(decision) = adaptation.on_window(adaptation_window(&sample)) {
                assert!(matches!(decision, AdaptationDecision::StepDown { .. }));
                step_downs += 1;
            }
        }

        assert!(buffer.dropped_frames() > 0);
        assert_eq!(step_downs, 5);
        assert_eq!(adaptation.current(), 0);
    }

    #[test]
    fn test_emits_metrics_every_window() {
        let mut h = harness(true);
        let event = wait_for(&h.events, |e| matches!(e, EngineEvent::Metrics(_)));
        if let EngineEvent::Metrics(metrics) = event {
            assert_eq!(metrics.health, 100);
            assert_eq!(metrics.target_fps, 30.0);
        }
        h.monitor.stop();
    }

    #[test]
    fn test_talkback_request_reported() {
        let mut h = harness(true);
        h.inbound
            .send(InboundMessage::Control(ControlMessage::TalkbackRequest {
                talkback_id: 7,
                caller: "studio".into(),
            }))
            .unwrap();

        let event = wait_for(&h.events, |e| matches!(e, EngineEvent::TalkbackRequested(_)));
        assert!(matches!(event, EngineEvent::TalkbackRequested(r) if r.talkback_id == 7));
        wait_for(&h.events, |e| {
            matches!(e, EngineEvent::TalkbackStateChanged(TalkbackState::Pending))
        });
        h.monitor.stop();
        assert_eq!(h.talkback.lock().state(), TalkbackState::Pending);
    }

    #[test]
    fn test_disabled_talkback_is_declined_on_the_wire() {
        let mut h = harness(false);
        h.inbound
            .send(InboundMessage::Control(ControlMessage::TalkbackRequest {
                talkback_id: 3,
                caller: "studio".into(),
            }))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while h.buffer.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        h.monitor.stop();

        let frame = h.buffer.pop().unwrap();
        assert_eq!(frame.kind, FrameKind::Control);
        let reply: ControlMessage = frame.parse_json().unwrap();
        assert_eq!(reply, ControlMessage::TalkbackDecline { talkback_id: 3 });
    }

    #[test]
    fn test_talkback_audio_only_when_active() {
        let mut h = harness(true);
        let samples: Vec<u8> = [0.5f32, -0.5].iter().flat_map(|s| s.to_le_bytes()).collect();

        h.inbound
            .send(InboundMessage::TalkbackAudio {
                timestamp_ms: 0,
                data: samples.clone().into(),
            })
            .unwrap();

        {
            let mut talkback = h.talkback.lock();
            talkback.on_request(TalkbackRequest {
                talkback_id: 1,
                caller: "studio".into(),
            });
            talkback.accept(1).unwrap();
        }
        h.inbound
            .send(InboundMessage::TalkbackAudio {
                timestamp_ms: 20,
                data: samples.into(),
            })
            .unwrap();

        let chunk = h.audio.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(chunk.samples, vec![0.5, -0.5]);
        assert_eq!(chunk.pts_100ns, 200_000);
        h.monitor.stop();
        assert!(h.audio.try_recv().is_err());
    }

    #[test]
    fn test_chat_delivered() {
        let mut h = harness(true);
        h.inbound
            .send(InboundMessage::Chat(ChatPayload {
                from: Some("viewer".into()),
                text: "hello".into(),
            }))
            .unwrap();
        let event = wait_for(&h.events, |e| matches!(e, EngineEvent::ChatMessage(_)));
        assert!(matches!(event, EngineEvent::ChatMessage(m) if m.text == "hello"));
        h.monitor.stop();
    }

    #[test]
    fn test_disconnect_requests_stop_once() {
        let mut h = harness(true);
        h.inbound
            .send(InboundMessage::Disconnected {
                message: "reset".into(),
            })
            .unwrap();
        h.inbound
            .send(InboundMessage::Closed {
                reason: "late".into(),
            })
            .unwrap();

        let reason = h.stops.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(reason, StopReason::NetworkLost { message: "reset".into() });

        // Health drops to zero once the link is gone
        wait_for(&h.events, |e| matches!(e, EngineEvent::Metrics(m) if m.health == 0));
        h.monitor.stop();
        assert!(h.stops.try_recv().is_err());
    }
}
