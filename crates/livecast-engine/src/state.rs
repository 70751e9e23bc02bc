//! Broadcast resources and phased startup.
//!
//! A broadcast is brought up in [`StartupPhase`] order. A failure in any
//! phase rolls back every phase entered so far, newest first, leaving the
//! engine as it was before the start.

use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use livecast_audio::{AudioChunk, AudioMixer, AudioSource, LevelMeter, AUDIO_CHANNEL_CAPACITY};
use livecast_capture::CapturedFrame;
use livecast_encoder::{
    AdaptationController, AudioEncoderConfig, EncoderBackend, EncoderPipeline, PacketSink,
    PipelineConfig, QualityLadder,
};
use livecast_ipc::{BroadcastSettings, Orientation, StartupPhase};
use livecast_transport::{InboundMessage, IngestClient, SessionHello, UplinkMonitor};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::metrics::MetricsCollector;
use crate::monitor::{BroadcastMonitor, MonitorContext, SessionLinks};
use crate::outbound::Outbound;
use crate::recording::{recording_path, RecordingWriter};
use crate::talkback::TalkbackChannel;
use crate::EngineResult;

/// Everything needed to bring up one broadcast.
pub(crate) struct BroadcastPlan {
    pub settings: BroadcastSettings,
    pub hello: SessionHello,
    pub frames: Receiver<CapturedFrame>,
    pub ladder: QualityLadder,
    pub initial_rung: usize,
    pub fps: f32,
    pub orientation: Orientation,
    /// Full camera output, the size of a local recording.
    pub output: (u32, u32),
    pub links: SessionLinks,
}

/// Resources held by a running broadcast.
#[derive(Default)]
pub(crate) struct InitializedResources {
    mix: Option<Receiver<AudioChunk>>,
    monitor_audio: Option<Receiver<AudioChunk>>,
    talkback_audio: Option<Sender<AudioChunk>>,
    mixer_running: bool,
    mic_running: bool,

    ingest: Option<IngestClient>,
    inbound: Option<Receiver<InboundMessage>>,
    broadcast_id: Option<String>,
    outbound: Option<Outbound>,

    pipeline: Option<EncoderPipeline>,
    recording: Option<PathBuf>,

    metrics: Option<Arc<MetricsCollector>>,
    monitor: Option<BroadcastMonitor>,
}

/// Owns the audio devices and the encoder backend across broadcasts, and
/// the per-broadcast resources while one is running.
pub(crate) struct ResourceManager {
    config: EngineConfig,
    microphone: Mutex<Option<Box<dyn AudioSource>>>,
    mixer: Mutex<AudioMixer>,
    level: Arc<LevelMeter>,
    encoders: Arc<dyn EncoderBackend>,
    resources: Mutex<InitializedResources>,
    current_phase: Mutex<Option<StartupPhase>>,
}

impl ResourceManager {
    pub fn new(
        config: EngineConfig,
        microphone: Option<Box<dyn AudioSource>>,
        encoders: Arc<dyn EncoderBackend>,
    ) -> Self {
        let mixer = AudioMixer::new();
        let level = mixer.level();
        Self {
            config,
            microphone: Mutex::new(microphone),
            mixer: Mutex::new(mixer),
            level,
            encoders,
            resources: Mutex::new(InitializedResources::default()),
            current_phase: Mutex::new(None),
        }
    }

    /// Bring up every phase, calling `on_phase` as each one starts.
    /// Returns the broadcast id assigned by the server.
    #[instrument(name = "init_resources", skip_all)]
    pub fn initialize<F>(&self, plan: BroadcastPlan, mut on_phase: F) -> EngineResult<String>
    where
        F: FnMut(StartupPhase),
    {
        let mut plan = Some(plan);
        let mut phase = StartupPhase::InitAudio;

        loop {
            *self.current_phase.lock() = Some(phase);
            on_phase(phase);
            info!("Initializing phase: {:?}", phase);

            let result = match phase {
                StartupPhase::InitAudio => plan.as_ref().map_or(Ok(()), |p| self.init_audio(p)),
                StartupPhase::ConnectIngest => {
                    plan.as_ref().map_or(Ok(()), |p| self.connect_ingest(&p.hello))
                }
                StartupPhase::InitEncoder => plan.as_ref().map_or(Ok(()), |p| self.init_encoder(p)),
                StartupPhase::StartTransmission => match plan.take() {
                    Some(p) => self.start_transmission(p),
                    None => Ok(()),
                },
            };
            if let Err(e) = result {
                warn!(?phase, error = %e, "Startup phase failed");
                return Err(e);
            }

            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }

        self.resources
            .lock()
            .broadcast_id
            .clone()
            .ok_or_else(|| EngineError::NetworkFailure("no broadcast id".to_string()))
    }

    fn init_audio(&self, plan: &BroadcastPlan) -> EngineResult<()> {
        let audio_on = plan.settings.audio_quality.bitrate_kbps().is_some();
        let talkback = plan.settings.talkback;
        if !audio_on && !talkback {
            debug!("Audio off, no talkback");
            return Ok(());
        }

        let mic = if audio_on {
            match self.microphone.lock().as_mut() {
                Some(source) => {
                    let rx = source.start()?;
                    self.resources.lock().mic_running = true;
                    Some(rx)
                }
                None => {
                    warn!("No microphone, broadcasting silence");
                    None
                }
            }
        } else {
            None
        };

        let (talkback_tx, talkback_rx) = if talkback {
            let (tx, rx) = crossbeam_channel::bounded(AUDIO_CHANNEL_CAPACITY);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let mut mixer = self.mixer.lock();
        mixer.set_talkback_mix(plan.settings.talkback_mix);
        let outputs = mixer.start(mic, talkback_rx)?;

        let mut resources = self.resources.lock();
        resources.mixer_running = true;
        resources.mix = Some(outputs.mix);
        resources.monitor_audio = Some(outputs.monitor);
        resources.talkback_audio = talkback_tx;
        debug!(audio_on, talkback, "Audio initialized");
        Ok(())
    }

    fn connect_ingest(&self, hello: &SessionHello) -> EngineResult<()> {
        let mut client = IngestClient::new(self.config.ingest.clone())?;
        let inbound = client.connect(hello)?;
        let buffer = client
            .buffer()
            .ok_or_else(|| EngineError::NetworkFailure("connection has no send buffer".into()))?;

        let mut resources = self.resources.lock();
        resources.broadcast_id = client.broadcast_id();
        resources.outbound = Some(Outbound::new(buffer));
        resources.inbound = Some(inbound);
        resources.ingest = Some(client);
        debug!("Ingest connected");
        Ok(())
    }

    fn init_encoder(&self, plan: &BroadcastPlan) -> EngineResult<()> {
        let (outbound, mix) = {
            let resources = self.resources.lock();
            let outbound = resources
                .outbound
                .clone()
                .ok_or_else(|| EngineError::NetworkFailure("not connected".into()))?;
            (outbound, resources.mix.clone())
        };

        let audio = AudioEncoderConfig::for_quality(plan.settings.audio_quality);
        let audio_input = if audio.is_some() { mix } else { None };

        let (recording, sink, recording_size) = if plan.settings.save_locally {
            let path = recording_path(plan.settings.local_path.as_deref(), &self.config.recording_dir());
            let writer = RecordingWriter::create(&path)?;
            let sink: Box<dyn PacketSink> = Box::new(writer);
            (Some(path), Some(sink), Some(plan.output))
        } else {
            (None, None, None)
        };
        // Record the path first so a rollback can remove a partial file
        self.resources.lock().recording = recording;

        let config = PipelineConfig {
            ladder: plan.ladder.clone(),
            initial_rung: plan.initial_rung,
            fps: plan.fps,
            keyframe_interval_secs: self.config.keyframe_interval_secs,
            profile: self.config.profile,
            audio,
            orientation: plan.orientation,
            recording: recording_size,
        };

        let pipeline = EncoderPipeline::start(
            Arc::clone(&self.encoders),
            config,
            plan.frames.clone(),
            audio_input,
            Box::new(outbound.media_sink()),
            sink,
        )?;

        self.resources.lock().pipeline = Some(pipeline);
        debug!("Encoder initialized");
        Ok(())
    }

    fn start_transmission(&self, plan: BroadcastPlan) -> EngineResult<()> {
        let mut guard = self.resources.lock();
        let resources = &mut *guard;

        let (Some(pipeline), Some(outbound), Some(inbound)) = (
            resources.pipeline.as_ref(),
            resources.outbound.clone(),
            resources.inbound.take(),
        ) else {
            return Err(EngineError::NetworkFailure("broadcast not initialized".into()));
        };

        *plan.links.talkback.lock() = TalkbackChannel::new(plan.settings.talkback);

        let metrics = Arc::new(MetricsCollector::new(
            plan.fps,
            pipeline.stats(),
            Arc::clone(&plan.links.capture_drops),
        ));
        metrics.start();

        let context = MonitorContext {
            inbound,
            uplink: UplinkMonitor::new(Arc::clone(outbound.buffer()), self.config.health_windows),
            adaptation: AdaptationController::new(
                self.config.adaptation,
                pipeline.ladder().len(),
                plan.initial_rung,
            ),
            ladder: pipeline.ladder().clone(),
            control: pipeline.control(),
            metrics: Arc::clone(&metrics),
            outbound,
            talkback_audio: resources.talkback_audio.clone(),
            interval: self.config.measurement_interval(),
            metrics_every: self.config.metrics_every,
            links: plan.links,
        };

        resources.monitor = Some(BroadcastMonitor::start(context)?);
        resources.metrics = Some(metrics);
        debug!("Transmission started");
        Ok(())
    }

    /// Undo every phase entered so far and delete a partial recording.
    #[instrument(name = "rollback_resources", skip(self))]
    pub fn rollback(&self) {
        if let Some(path) = self.teardown() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed partial recording"),
                Err(e) => debug!(path = %path.display(), "No partial recording to remove: {}", e),
            }
        }
    }

    /// Tear down a running broadcast. Returns the finished recording.
    #[instrument(name = "shutdown_resources", skip(self))]
    pub fn shutdown(&self) -> Option<PathBuf> {
        info!("Shutting down broadcast resources");
        self.teardown()
    }

    fn teardown(&self) -> Option<PathBuf> {
        let current = self.current_phase.lock().take();
        let Some(mut phase) = current else {
            return None;
        };

        let mut recording = None;
        loop {
            debug!("Rolling back phase: {:?}", phase);
            if let Some(path) = self.rollback_phase(phase) {
                recording = Some(path);
            }
            match phase.previous() {
                Some(previous) => phase = previous,
                None => break,
            }
        }
        recording
    }

    fn rollback_phase(&self, phase: StartupPhase) -> Option<PathBuf> {
        match phase {
            StartupPhase::StartTransmission => {
                // Join the monitor without holding the lock
                let (monitor, metrics) = {
                    let mut resources = self.resources.lock();
                    (resources.monitor.take(), resources.metrics.take())
                };
                if let Some(mut monitor) = monitor {
                    monitor.stop();
                }
                if let Some(metrics) = metrics {
                    metrics.stop();
                }
                None
            }
            StartupPhase::InitEncoder => {
                let pipeline = self.resources.lock().pipeline.take();
                if let Some(mut pipeline) = pipeline {
                    if let Err(e) = pipeline.stop() {
                        warn!("Encoder stop failed: {}", e);
                    }
                }
                // The recording sink is closed with the pipeline
                self.resources.lock().recording.take()
            }
            StartupPhase::ConnectIngest => {
                let client = {
                    let mut resources = self.resources.lock();
                    resources.inbound = None;
                    resources.outbound = None;
                    resources.broadcast_id = None;
                    resources.ingest.take()
                };
                if let Some(mut client) = client {
                    if let Err(e) = client.disconnect() {
                        debug!("Disconnect: {}", e);
                    }
                }
                None
            }
            StartupPhase::InitAudio => {
                let (mixer_running, mic_running) = {
                    let mut resources = self.resources.lock();
                    resources.mix = None;
                    resources.monitor_audio = None;
                    resources.talkback_audio = None;
                    (
                        std::mem::take(&mut resources.mixer_running),
                        std::mem::take(&mut resources.mic_running),
                    )
                };
                if mixer_running {
                    if let Err(e) = self.mixer.lock().stop() {
                        warn!("Mixer stop failed: {}", e);
                    }
                }
                if mic_running {
                    if let Some(source) = self.microphone.lock().as_mut() {
                        if let Err(e) = source.stop() {
                            warn!("Microphone stop failed: {}", e);
                        }
                    }
                }
                None
            }
        }
    }

    pub fn outbound(&self) -> Option<Outbound> {
        self.resources.lock().outbound.clone()
    }

    pub fn encoder_control(&self) -> Option<Arc<livecast_encoder::EncoderControl>> {
        self.resources.lock().pipeline.as_ref().map(|p| p.control())
    }

    /// True from the first startup phase until teardown.
    pub fn is_running(&self) -> bool {
        self.current_phase.lock().is_some()
    }

    /// Microphone level meter, live while audio is running.
    pub fn audio_level(&self) -> Arc<LevelMeter> {
        Arc::clone(&self.level)
    }

    /// Talkback audio for local playback.
    pub fn audio_monitor(&self) -> Option<Receiver<AudioChunk>> {
        self.resources.lock().monitor_audio.clone()
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use livecast_audio::ToneSource;
    use livecast_encoder::DefaultBackend;
    use livecast_ipc::AudioQuality;
    use livecast_transport::{LoopbackOptions, LoopbackServer};
    use parking_lot::RwLock;

    use super::*;
    use crate::chat::ChatRelay;

    fn links() -> SessionLinks {
        let (events, _) = crossbeam_channel::unbounded();
        let (stop_requests, _) = crossbeam_channel::bounded(1);
        SessionLinks {
            events,
            talkback: Arc::new(Mutex::new(TalkbackChannel::default())),
            chat: Arc::new(ChatRelay::new(4)),
            uplink: Arc::new(RwLock::new(Default::default())),
            stop_requests,
            capture_drops: Arc::new(Default::default()),
        }
    }

    fn plan(settings: BroadcastSettings) -> BroadcastPlan {
        let (_frames_tx, frames) = crossbeam_channel::bounded(1);
        BroadcastPlan {
            hello: SessionHello::probe(&settings.application_id),
            settings,
            frames,
            ladder: QualityLadder::new((640, 360), 0, 30.0),
            initial_rung: 0,
            fps: 30.0,
            orientation: Orientation::LandscapeRight,
            output: (640, 360),
            links: links(),
        }
    }

    fn manager(url: &str) -> ResourceManager {
        let mut config = EngineConfig::default();
        config.ingest.url = url.to_string();
        ResourceManager::new(
            config,
            Some(Box::new(ToneSource::default())),
            Arc::new(DefaultBackend),
        )
    }

    #[test]
    fn test_rejected_session_rolls_back_audio() {
        let server = LoopbackServer::start(LoopbackOptions {
            broadcast_id: None,
            ..Default::default()
        })
        .unwrap();
        let manager = manager(server.url());

        let mut phases = Vec::new();
        let result = manager.initialize(
            plan(BroadcastSettings {
                application_id: "app".into(),
                talkback: true,
                ..Default::default()
            }),
            |phase| phases.push(phase),
        );

        assert!(matches!(result, Err(EngineError::NetworkFailure(_))));
        assert_eq!(phases, vec![StartupPhase::InitAudio, StartupPhase::ConnectIngest]);
        assert!(manager.audio_monitor().is_some());

        manager.rollback();
        assert!(!manager.is_running());
        assert!(manager.audio_monitor().is_none());
        assert!(!manager.mixer.lock().is_running());
    }

    #[test]
    fn test_audio_off_without_talkback_skips_mixer() {
        let server = LoopbackServer::start(LoopbackOptions {
            broadcast_id: None,
            ..Default::default()
        })
        .unwrap();
        let manager = manager(server.url());

        let _ = manager.initialize(
            plan(BroadcastSettings {
                application_id: "app".into(),
                audio_quality: AudioQuality::Off,
                ..Default::default()
            }),
            |_| {},
        );
        assert!(!manager.mixer.lock().is_running());
        manager.rollback();
    }

    #[test]
    fn test_rollback_without_start_is_noop() {
        let manager = manager("livecast://127.0.0.1:1");
        manager.rollback();
        assert!(manager.shutdown().is_none());
    }
}
