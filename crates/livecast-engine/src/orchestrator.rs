//! Main engine orchestrator.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use livecast_audio::{AudioChunk, AudioSource, LevelMeter, ToneSource};
use livecast_capture::{CameraDriver, CaptureSource, SyntheticCamera};
use livecast_encoder::{DefaultBackend, EncoderBackend, QualityLadder};
use livecast_ipc::{
    AudioQuality, BroadcastSettings, CameraPosition, CaptureConfig, ChatMessage, EngineCommand,
    EngineEvent, ExposureMode, FocusMode, Orientation, Point, Position, Rect, SessionState,
    Snapshot, StopReason, TalkbackState, TemperatureTint, UplinkMetrics, VideoPreset,
    WhiteBalanceGains,
};
use livecast_transport::{ControlMessage, LinkTester, LinktestResult, UplinkSample};

use crate::chat::ChatRelay;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::monitor::SessionLinks;
use crate::session::SessionSettings;
use crate::state::{BroadcastPlan, ResourceManager};
use crate::talkback::TalkbackChannel;
use crate::{send_event, EngineResult};

/// How long a snapshot request waits for the next frame.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(2);

/// Platform services the engine drives.
pub struct EngineDevices {
    pub camera: Arc<dyn CameraDriver>,
    /// `None` broadcasts silence when audio is on.
    pub microphone: Option<Box<dyn AudioSource>>,
    pub encoders: Arc<dyn EncoderBackend>,
}

impl EngineDevices {
    /// Synthetic camera, a test tone and the encoders compiled into this
    /// build.
    pub fn synthetic() -> Self {
        Self {
            camera: Arc::new(SyntheticCamera::new()),
            microphone: Some(Box::new(ToneSource::default())),
            encoders: Arc::new(DefaultBackend),
        }
    }
}

/// The broadcast engine.
///
/// All operations are synchronous and return once their effect is in
/// place; asynchronous outcomes (server messages, link-test results,
/// snapshots, metrics) arrive on the event channel.
pub struct Engine {
    config: EngineConfig,
    state: SessionState,
    events: Sender<EngineEvent>,
    capture: CaptureSource,
    settings: SessionSettings,
    resources: ResourceManager,
    links: SessionLinks,
    stop_requests: Receiver<StopReason>,
    linktest: LinkTester,
    last_linktest: Arc<RwLock<Option<LinktestResult>>>,
}

impl Engine {
    /// Create an engine with the capture preset applied. The engine starts
    /// in [`SessionState::Prepared`].
    #[instrument(name = "engine_new", skip_all)]
    pub fn new(
        config: EngineConfig,
        capture_config: CaptureConfig,
        devices: EngineDevices,
        events: Sender<EngineEvent>,
    ) -> EngineResult<Self> {
        let capture = CaptureSource::new(devices.camera, capture_config)?;
        let (stop_tx, stop_requests) = crossbeam_channel::bounded(1);

        let links = SessionLinks {
            events: events.clone(),
            talkback: Arc::new(Mutex::new(TalkbackChannel::default())),
            chat: Arc::new(ChatRelay::new(config.chat_history)),
            uplink: Arc::new(RwLock::new(UplinkSample::default())),
            stop_requests: stop_tx,
            capture_drops: capture.drop_counter(),
        };
        let resources = ResourceManager::new(config.clone(), devices.microphone, devices.encoders);

        let mut engine = Self {
            config,
            state: SessionState::Idle,
            events,
            capture,
            settings: SessionSettings::default(),
            resources,
            links,
            stop_requests,
            linktest: LinkTester::new(),
            last_linktest: Arc::new(RwLock::new(None)),
        };
        engine.transition_to(SessionState::Prepared);
        info!("Engine created");
        Ok(engine)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read access to the camera and its control state.
    pub fn capture(&self) -> &CaptureSource {
        &self.capture
    }

    pub fn settings(&self) -> &BroadcastSettings {
        self.settings.get()
    }

    // Lifecycle

    /// Open the camera. Valid once per engine.
    #[instrument(name = "start_capture", skip(self))]
    pub fn start_capture(&mut self) -> EngineResult<()> {
        if !self.state.is_prepared() {
            return Err(EngineError::invalid_state("start capture", &self.state));
        }
        self.capture.start()?;
        self.transition_to(SessionState::Capturing);
        Ok(())
    }

    /// Connect to the ingest server and start streaming. Returns the
    /// broadcast id. On failure the engine is back in `Capturing`.
    #[instrument(name = "start_broadcasting", skip(self))]
    pub fn start_broadcasting(&mut self) -> EngineResult<String> {
        if !self.state.can_start() {
            return Err(EngineError::invalid_state("start broadcasting", &self.state));
        }
        let settings = self.settings.get().clone();
        if settings.application_id.is_empty() {
            return Err(EngineError::InvalidArgument("application id is not set".to_string()));
        }

        let output = self.capture.output_dimensions();
        let (fps, max_dimension, orientation) = {
            let config = self.capture.config();
            (config.max_framerate, config.max_broadcast_dimension, config.orientation)
        };
        let ladder = QualityLadder::new(output, max_dimension, fps);
        let link_speed = self.last_linktest.read().map(|r| r.speed_bytes_per_sec);
        let initial_rung = ladder.initial_rung(link_speed);
        let top = ladder.rung(ladder.highest());

        // A stop request from the previous broadcast must not end this one
        while self.stop_requests.try_recv().is_ok() {}
        *self.links.uplink.write() = UplinkSample::default();

        info!(
            width = top.width,
            height = top.height,
            rungs = ladder.len(),
            initial_rung,
            "Starting broadcast"
        );
        let plan = BroadcastPlan {
            hello: self.settings.hello((top.width, top.height)),
            settings,
            frames: self.capture.frames(),
            ladder,
            initial_rung,
            fps,
            orientation,
            output,
            links: self.links.clone(),
        };

        let result = {
            let (state, events) = (&mut self.state, &self.events);
            self.resources.initialize(plan, |phase| {
                transition(state, events, SessionState::Connecting { phase })
            })
        };

        match result {
            Ok(broadcast_id) => {
                self.transition_to(SessionState::Broadcasting {
                    broadcast_id: broadcast_id.clone(),
                });
                self.send_event(EngineEvent::ConnectionEstablished {
                    broadcast_id: broadcast_id.clone(),
                });
                info!(%broadcast_id, "Broadcast started");
                Ok(broadcast_id)
            }
            Err(e) => {
                error!("Broadcast start failed: {}", e);
                self.resources.rollback();
                self.send_event(EngineEvent::ConnectionFailed {
                    message: e.to_string(),
                });
                self.transition_to(SessionState::Capturing);
                Err(e)
            }
        }
    }

    /// Stop the current broadcast. Does nothing when none is running.
    pub fn stop_broadcasting(&mut self) {
        self.stop_with(StopReason::UserRequested);
    }

    #[instrument(name = "stop_broadcast", skip(self))]
    fn stop_with(&mut self, reason: StopReason) {
        if !self.state.is_broadcast_active() {
            debug!("No broadcast to stop");
            return;
        }
        info!(reason = %reason.message(), "Stopping broadcast");
        self.transition_to(SessionState::Stopping {
            reason: reason.clone(),
        });

        let recording = self.resources.shutdown();
        while self.stop_requests.try_recv().is_ok() {}

        let (active, before) = {
            let mut talkback = self.links.talkback.lock();
            let before = talkback.state();
            (talkback.clear(), before)
        };
        if let Some(talkback_id) = active {
            self.send_event(EngineEvent::TalkbackEnded { talkback_id });
        }
        if before != TalkbackState::Idle {
            self.send_event(EngineEvent::TalkbackStateChanged(TalkbackState::Idle));
        }
        *self.links.uplink.write() = UplinkSample::default();

        self.send_event(EngineEvent::BroadcastStopped { reason });
        if let Some(path) = recording {
            self.send_event(EngineEvent::RecordingComplete {
                path: path.display().to_string(),
            });
        }
        self.transition_to(SessionState::Capturing);
        info!("Broadcast stopped");
    }

    /// Handle a stop requested by the broadcast monitor (lost connection,
    /// server goodbye). Returns true if a broadcast was stopped.
    pub fn poll(&mut self) -> bool {
        match self.stop_requests.try_recv() {
            Ok(reason) => {
                let active = self.state.is_broadcast_active();
                self.stop_with(reason);
                active
            }
            Err(_) => false,
        }
    }

    /// Stop everything and close the camera. The engine ends in `Idle`.
    #[instrument(name = "engine_shutdown", skip(self))]
    pub fn shutdown(&mut self) {
        if self.state.is_idle() {
            return;
        }
        self.stop_with(StopReason::Shutdown);
        self.linktest.cancel();
        if let Err(e) = self.capture.stop() {
            warn!("Capture stop failed: {}", e);
        }
        self.transition_to(SessionState::Idle);
        info!("Engine shut down");
    }

    /// Serve commands until `Shutdown` or until the command channel closes.
    #[instrument(name = "engine_run", skip_all)]
    pub fn run(&mut self, commands: &Receiver<EngineCommand>) {
        info!("Engine starting");
        self.send_event(EngineEvent::Ready);
        let stop_requests = self.stop_requests.clone();

        loop {
            select! {
                recv(commands) -> command => match command {
                    Ok(command) => match self.handle_command(command) {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => {
                            warn!(error = %e, "Command failed");
                            self.send_event(EngineEvent::Error {
                                recoverable: true,
                                message: e.to_string(),
                            });
                        }
                    },
                    Err(_) => {
                        info!("Command channel disconnected, shutting down");
                        self.shutdown();
                        break;
                    }
                },
                recv(stop_requests) -> reason => {
                    if let Ok(reason) = reason {
                        self.stop_with(reason);
                    }
                }
            }
        }

        self.send_event(EngineEvent::Shutdown);
        info!("Engine stopped");
    }

    /// Apply one command. Returns false once the engine has shut down.
    pub fn handle_command(&mut self, command: EngineCommand) -> EngineResult<bool> {
        debug!(?command, "Handling command");

        match command {
            EngineCommand::StartCapture => self.start_capture()?,
            EngineCommand::StartBroadcast => {
                self.start_broadcasting()?;
            }
            EngineCommand::StopBroadcast => self.stop_broadcasting(),
            EngineCommand::SwapCamera => self.swap_camera()?,
            EngineCommand::SetCameraPosition(position) => self.set_camera_position(position)?,
            EngineCommand::SetVirtualCameraEnabled(enabled) => self.set_virtual_camera_enabled(enabled)?,
            EngineCommand::SetZoom(zoom) => {
                self.set_zoom(zoom)?;
            }
            EngineCommand::SetTorch(on) => self.set_torch(on)?,
            EngineCommand::SetOrientation {
                orientation,
                preview_orientation,
                aspect,
            } => self.set_orientation(orientation, preview_orientation, aspect)?,
            EngineCommand::SetPreviewFrame(frame) => self.set_preview_frame(frame),
            EngineCommand::SetFramerate { max, min } => {
                self.set_framerate(max, min)?;
            }
            EngineCommand::SetFocus { point, mode } => self.set_focus(point, mode)?,
            EngineCommand::SetExposure { point, mode } => self.set_exposure(point, mode)?,
            EngineCommand::SetPointOfInterest {
                point,
                exposure_mode,
                focus_mode,
            } => self.set_point_of_interest(point, exposure_mode, focus_mode)?,
            EngineCommand::SetExposureTargetBias(bias) => {
                self.set_exposure_target_bias(bias)?;
            }
            EngineCommand::LockWhiteBalanceGains(gains) => {
                self.lock_white_balance_gains(gains)?;
            }
            EngineCommand::LockWhiteBalanceTemperatureTint(values) => {
                self.lock_white_balance_temperature_tint(values)?;
            }
            EngineCommand::LockCurrentWhiteBalance => {
                self.lock_current_white_balance_gains()?;
            }
            EngineCommand::UnlockWhiteBalance => self.unlock_white_balance(),
            EngineCommand::LockCurrentLensPosition => {
                self.lock_current_lens_position()?;
            }
            EngineCommand::SetApplicationId(id) => self.set_application_id(id)?,
            EngineCommand::SetAuthor(author) => self.set_author(author)?,
            EngineCommand::SetTitle(title) => self.set_title(title)?,
            EngineCommand::SetCustomData(data) => self.set_custom_data(data)?,
            EngineCommand::SetSaveOnServer(save) => self.set_save_on_server(save)?,
            EngineCommand::SetSaveLocally(save) => self.set_save_locally(save)?,
            EngineCommand::SetLocalPath(path) => self.set_local_path(path)?,
            EngineCommand::SetTalkback(enabled) => self.set_talkback(enabled)?,
            EngineCommand::SetTalkbackMix(enabled) => self.set_talkback_mix(enabled)?,
            EngineCommand::SetSendPosition(enabled) => self.set_send_position(enabled)?,
            EngineCommand::SetAudioQuality(quality) => self.set_audio_quality(quality)?,
            EngineCommand::SetVideoPreset(preset) => self.set_video_preset(preset)?,
            EngineCommand::SetMaxBroadcastDimension(dimension) => {
                self.set_max_broadcast_dimension(dimension)?;
            }
            EngineCommand::AcceptTalkback(id) => self.accept_talkback(id)?,
            EngineCommand::DeclineTalkback(id) => self.decline_talkback(id)?,
            EngineCommand::EndTalkback => self.end_talkback()?,
            EngineCommand::SendChat(text) => self.send_chat(text)?,
            EngineCommand::UpdatePosition(position) => self.update_position(position)?,
            EngineCommand::TakeSnapshot => self.take_snapshot()?,
            EngineCommand::StartLinktest => self.start_linktest()?,
            EngineCommand::GetState => self.send_state(),
            EngineCommand::Shutdown => {
                self.shutdown();
                return Ok(false);
            }
        }

        Ok(true)
    }

    // Camera

    pub fn swap_camera(&mut self) -> EngineResult<()> {
        Ok(self.capture.swap_camera()?)
    }

    pub fn set_camera_position(&mut self, position: CameraPosition) -> EngineResult<()> {
        Ok(self.capture.set_camera_position(position)?)
    }

    pub fn set_virtual_camera_enabled(&mut self, enabled: bool) -> EngineResult<()> {
        Ok(self.capture.set_virtual_camera_enabled(enabled)?)
    }

    /// Returns the zoom applied after clamping.
    pub fn set_zoom(&mut self, zoom: f32) -> EngineResult<f32> {
        Ok(self.capture.set_zoom(zoom)?)
    }

    pub fn set_torch(&mut self, on: bool) -> EngineResult<()> {
        Ok(self.capture.set_torch(on)?)
    }

    /// A live broadcast follows an orientation flip from the next frame.
    pub fn set_orientation(
        &mut self,
        orientation: Orientation,
        preview_orientation: Option<Orientation>,
        aspect: Option<(u32, u32)>,
    ) -> EngineResult<()> {
        self.capture
            .set_orientation(orientation, preview_orientation, aspect)?;
        if let Some(control) = self.resources.encoder_control() {
            control.set_orientation(orientation);
        }
        Ok(())
    }

    pub fn set_preview_frame(&mut self, frame: Rect) {
        self.capture.set_preview_frame(frame);
    }

    pub fn set_framerate(&mut self, max: f32, min: Option<f32>) -> EngineResult<(f32, f32)> {
        Ok(self.capture.set_framerate(max, min)?)
    }

    pub fn set_focus(&mut self, point: Point, mode: FocusMode) -> EngineResult<()> {
        Ok(self.capture.set_focus(point, mode)?)
    }

    pub fn set_exposure(&mut self, point: Point, mode: ExposureMode) -> EngineResult<()> {
        Ok(self.capture.set_exposure(point, mode)?)
    }

    pub fn set_point_of_interest(
        &mut self,
        point: Point,
        exposure_mode: ExposureMode,
        focus_mode: FocusMode,
    ) -> EngineResult<()> {
        Ok(self
            .capture
            .set_point_of_interest(point, exposure_mode, focus_mode)?)
    }

    pub fn set_exposure_target_bias(&mut self, bias: f32) -> EngineResult<f32> {
        Ok(self.capture.set_exposure_target_bias(bias)?)
    }

    pub fn lock_white_balance_gains(&mut self, gains: WhiteBalanceGains) -> EngineResult<WhiteBalanceGains> {
        Ok(self.capture.lock_white_balance_gains(gains)?)
    }

    pub fn lock_white_balance_temperature_tint(
        &mut self,
        values: TemperatureTint,
    ) -> EngineResult<WhiteBalanceGains> {
        Ok(self.capture.lock_white_balance_temperature_tint(values)?)
    }

    pub fn lock_current_white_balance_gains(&mut self) -> EngineResult<WhiteBalanceGains> {
        Ok(self.capture.lock_current_white_balance_gains()?)
    }

    pub fn unlock_white_balance(&mut self) {
        self.capture.unlock_white_balance();
    }

    pub fn lock_current_lens_position(&mut self) -> EngineResult<f32> {
        Ok(self.capture.lock_current_lens_position()?)
    }

    pub fn set_video_preset(&mut self, preset: VideoPreset) -> EngineResult<()> {
        Ok(self.capture.set_video_preset(preset)?)
    }

    pub fn set_max_broadcast_dimension(&mut self, dimension: u32) -> EngineResult<u32> {
        Ok(self.capture.set_max_broadcast_dimension(dimension)?)
    }

    /// Deliver a copy of the next frame as [`EngineEvent::SnapshotTaken`].
    pub fn take_snapshot(&self) -> EngineResult<()> {
        let frames = self.capture.request_snapshot()?;
        let events = self.events.clone();
        thread::Builder::new()
            .name("snapshot".into())
            .spawn(move || match frames.recv_timeout(SNAPSHOT_TIMEOUT) {
                Ok(frame) => send_event(
                    &events,
                    EngineEvent::SnapshotTaken(Snapshot {
                        width: frame.width,
                        height: frame.height,
                        data: frame.data.to_vec(),
                    }),
                ),
                Err(e) => warn!("Snapshot not delivered: {}", e),
            })
            .map_err(|e| EngineError::Thread(e.to_string()))?;
        Ok(())
    }

    // Settings

    pub fn set_application_id(&mut self, id: String) -> EngineResult<()> {
        self.settings.set_application_id(&self.state, id)
    }

    pub fn set_author(&mut self, author: String) -> EngineResult<()> {
        self.settings.set_author(&self.state, author)
    }

    /// Pushed to the server when live.
    pub fn set_title(&mut self, title: String) -> EngineResult<()> {
        match self.settings.set_title(&self.state, title) {
            Some(message) => self.send_control(&message),
            None => Ok(()),
        }
    }

    /// Pushed to the server when live.
    pub fn set_custom_data(&mut self, custom_data: String) -> EngineResult<()> {
        match self.settings.set_custom_data(&self.state, custom_data)? {
            Some(message) => self.send_control(&message),
            None => Ok(()),
        }
    }

    pub fn set_save_on_server(&mut self, save: bool) -> EngineResult<()> {
        self.settings.set_save_on_server(&self.state, save)
    }

    pub fn set_save_locally(&mut self, save: bool) -> EngineResult<()> {
        self.settings.set_save_locally(&self.state, save)
    }

    pub fn set_local_path(&mut self, path: Option<String>) -> EngineResult<()> {
        self.settings.set_local_path(&self.state, path)
    }

    pub fn set_talkback(&mut self, enabled: bool) -> EngineResult<()> {
        self.settings.set_talkback(&self.state, enabled)
    }

    pub fn set_talkback_mix(&mut self, enabled: bool) -> EngineResult<()> {
        self.settings.set_talkback_mix(&self.state, enabled)
    }

    pub fn set_send_position(&mut self, enabled: bool) -> EngineResult<()> {
        self.settings.set_send_position(&self.state, enabled)
    }

    pub fn set_audio_quality(&mut self, quality: AudioQuality) -> EngineResult<()> {
        self.settings.set_audio_quality(&self.state, quality)
    }

    // Talkback

    pub fn talkback_state(&self) -> TalkbackState {
        self.links.talkback.lock().state()
    }

    pub fn accept_talkback(&mut self, talkback_id: u32) -> EngineResult<()> {
        self.update_talkback(|talkback| talkback.accept(talkback_id))
    }

    pub fn decline_talkback(&mut self, talkback_id: u32) -> EngineResult<()> {
        self.update_talkback(|talkback| talkback.decline(talkback_id))
    }

    pub fn end_talkback(&mut self) -> EngineResult<()> {
        let mut ended = None;
        self.update_talkback(|talkback| {
            let (talkback_id, message) = talkback.end()?;
            ended = Some(talkback_id);
            Ok(message)
        })?;
        if let Some(talkback_id) = ended {
            self.send_event(EngineEvent::TalkbackEnded { talkback_id });
        }
        Ok(())
    }

    /// Apply a local talkback decision, tell the server and report a state
    /// change.
    fn update_talkback<F>(&mut self, apply: F) -> EngineResult<()>
    where
        F: FnOnce(&mut TalkbackChannel) -> EngineResult<ControlMessage>,
    {
        let (message, before, after) = {
            let mut talkback = self.links.talkback.lock();
            let before = talkback.state();
            let message = apply(&mut talkback)?;
            (message, before, talkback.state())
        };
        if let Err(e) = self.send_control(&message) {
            warn!("Talkback reply not sent: {}", e);
        }
        if before != after {
            self.send_event(EngineEvent::TalkbackStateChanged(after));
        }
        Ok(())
    }

    // Chat and position

    /// Queue a chat message on the live connection.
    pub fn send_chat(&mut self, text: String) -> EngineResult<()> {
        if !self.state.is_broadcasting() {
            return Err(EngineError::invalid_state("send chat", &self.state));
        }
        if text.is_empty() {
            return Err(EngineError::InvalidArgument("empty chat message".to_string()));
        }
        let outbound = self
            .resources
            .outbound()
            .ok_or_else(|| EngineError::invalid_state("send chat", &self.state))?;
        let payload = self.links.chat.outgoing(text);
        outbound.chat(&payload)?;
        Ok(())
    }

    /// Recent chat messages, oldest first.
    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.links.chat.history()
    }

    /// Send the device position. Ignored unless broadcasting with position
    /// reporting enabled.
    pub fn update_position(&mut self, position: Position) -> EngineResult<()> {
        if !self.state.is_broadcasting() || !self.settings.get().send_position {
            return Ok(());
        }
        if !position.latitude.is_finite() || !position.longitude.is_finite() {
            return Err(EngineError::InvalidArgument(format!("{:?}", position)));
        }
        self.send_control(&ControlMessage::Position(position))
    }

    // Uplink

    /// Run a one-shot uplink probe. The result arrives as
    /// [`EngineEvent::LinktestCompleted`] and seeds the initial rung of the
    /// next broadcast.
    #[instrument(name = "start_linktest", skip(self))]
    pub fn start_linktest(&mut self) -> EngineResult<()> {
        let settings = self.settings.get();
        let capture = self.capture.config();
        let ladder = QualityLadder::new(
            self.capture.output_dimensions(),
            capture.max_broadcast_dimension,
            capture.max_framerate,
        );

        let mut config = self.config.linktest.clone();
        config.min_bitrate_kbps =
            ladder.lowest().bitrate_kbps + settings.audio_quality.bitrate_kbps().unwrap_or(0);

        let last = Arc::clone(&self.last_linktest);
        let events = self.events.clone();
        self.linktest
            .start(&settings.application_id, config, move |result| {
                *last.write() = Some(result);
                send_event(
                    &events,
                    EngineEvent::LinktestCompleted {
                        speed_bytes_per_sec: result.speed_bytes_per_sec,
                        recommendation: result.recommendation,
                    },
                );
            })?;
        Ok(())
    }

    pub fn is_linktest_running(&self) -> bool {
        self.linktest.is_running()
    }

    /// Health and speed of the live uplink (zero when not broadcasting) and
    /// the recommendation of the last link test.
    pub fn uplink_metrics(&self) -> UplinkMetrics {
        let recommendation = self
            .last_linktest
            .read()
            .is_some_and(|r| r.recommendation);
        if !self.state.is_broadcasting() {
            return UplinkMetrics {
                recommendation,
                ..Default::default()
            };
        }
        let sample = *self.links.uplink.read();
        UplinkMetrics {
            health: sample.health,
            speed_bytes_per_sec: sample.speed_bytes_per_sec,
            recommendation,
        }
    }

    // Audio

    /// Microphone level meter.
    pub fn audio_level(&self) -> Arc<LevelMeter> {
        self.resources.audio_level()
    }

    /// Talkback audio for local playback while a broadcast with talkback
    /// is running.
    pub fn audio_monitor(&self) -> Option<Receiver<AudioChunk>> {
        self.resources.audio_monitor()
    }

    // Helpers

    fn send_control(&self, message: &ControlMessage) -> EngineResult<()> {
        match self.resources.outbound() {
            Some(outbound) => Ok(outbound.control(message)?),
            None => Ok(()),
        }
    }

    fn send_state(&self) {
        self.send_event(EngineEvent::StateChanged {
            previous: Box::new(self.state.clone()),
            current: Box::new(self.state.clone()),
        });
    }

    fn transition_to(&mut self, new_state: SessionState) {
        transition(&mut self.state, &self.events, new_state);
    }

    fn send_event(&self, event: EngineEvent) {
        send_event(&self.events, event);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn transition(state: &mut SessionState, events: &Sender<EngineEvent>, new_state: SessionState) {
    let previous = std::mem::replace(state, new_state.clone());

    debug!(
        previous = %previous.name(),
        current = %new_state.name(),
        "State transition"
    );

    send_event(
        events,
        EngineEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new_state),
        },
    );
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use bytes::Bytes;

    use livecast_encoder::{
        AudioEncoder, AudioEncoderConfig, EncodedAudioPacket, EncodedVideoPacket, EncoderResult,
        FrameType, VideoEncoder, VideoEncoderConfig,
    };
    use livecast_ipc::{event_channel, TalkbackRequest};
    use livecast_transport::{
        ChatPayload, Frame, FrameKind, LoopbackOptions, LoopbackServer,
    };

    use super::*;
    use crate::recording::RECORDING_MAGIC;

    const SPS_PPS: &[u8] = &[
        0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, 0xAB, // SPS
        0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80, // PPS
    ];

    /// Emits a keyframe slice, then P slices.
    struct MockVideo {
        frames: u64,
    }

    impl VideoEncoder for MockVideo {
        fn encode(&mut self, _frame: &[u8], pts_100ns: u64) -> EncoderResult<Option<EncodedVideoPacket>> {
            let is_keyframe = self.frames == 0;
            self.frames += 1;
            let nal = if is_keyframe { 0x65 } else { 0x41 };
            Ok(Some(EncodedVideoPacket {
                data: Bytes::from(vec![0, 0, 0, 1, nal, 0x88, 0x84]),
                pts_100ns,
                dts_100ns: pts_100ns,
                is_keyframe,
                frame_type: if is_keyframe { FrameType::I } else { FrameType::P },
            }))
        }

        fn flush(&mut self) -> EncoderResult<Vec<EncodedVideoPacket>> {
            Ok(Vec::new())
        }

        fn headers(&self) -> Option<Bytes> {
            Some(Bytes::from_static(SPS_PPS))
        }

        fn is_hardware_accelerated(&self) -> bool {
            false
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    struct MockAudio;

    impl AudioEncoder for MockAudio {
        fn encode(&mut self, _samples: &[f32], pts_100ns: u64) -> EncoderResult<Option<EncodedAudioPacket>> {
            Ok(Some(EncodedAudioPacket {
                data: Bytes::from_static(&[0x21, 0x10]),
                pts_100ns,
            }))
        }

        fn flush(&mut self) -> EncoderResult<Vec<EncodedAudioPacket>> {
            Ok(Vec::new())
        }

        fn name(&self) -> &'static str {
            "mock-audio"
        }
    }

    struct MockBackend;

    impl EncoderBackend for MockBackend {
        fn video(&self, _config: VideoEncoderConfig) -> EncoderResult<Box<dyn VideoEncoder>> {
            Ok(Box::new(MockVideo { frames: 0 }))
        }

        fn audio(&self, _config: AudioEncoderConfig) -> EncoderResult<Box<dyn AudioEncoder>> {
            Ok(Box::new(MockAudio))
        }
    }

    struct Harness {
        engine: Engine,
        events: Receiver<EngineEvent>,
        server: LoopbackServer,
    }

    fn harness(options: LoopbackOptions) -> Harness {
        let server = LoopbackServer::start(options).unwrap();
        let mut config = EngineConfig::default();
        config.ingest.url = server.url().to_string();
        config.linktest.url = server.url().to_string();
        config.measurement_interval_ms = 50;

        let (events_tx, events) = event_channel();
        let devices = EngineDevices {
            camera: Arc::new(SyntheticCamera::new()),
            microphone: Some(Box::new(ToneSource::default())),
            encoders: Arc::new(MockBackend),
        };
        let engine = Engine::new(config, CaptureConfig::default(), devices, events_tx).unwrap();
        Harness {
            engine,
            events,
            server,
        }
    }

    fn live(options: LoopbackOptions) -> Harness {
        let mut h = harness(options);
        h.engine.start_capture().unwrap();
        h.engine.set_application_id("app".into()).unwrap();
        h
    }

    fn wait_event<F: Fn(&EngineEvent) -> bool>(events: &Receiver<EngineEvent>, predicate: F) -> EngineEvent {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = events.recv_timeout(remaining).expect("event not received");
            if predicate(&event) {
                return event;
            }
        }
    }

    fn wait_frame(server: &LoopbackServer, kind: FrameKind) -> Frame {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let frame = server
                .received()
                .recv_timeout(remaining)
                .expect("frame not received");
            if frame.kind == kind {
                return frame;
            }
        }
    }

    #[test]
    fn test_lifecycle_states() {
        let mut h = harness(LoopbackOptions::default());
        assert!(h.engine.state().is_prepared());
        assert!(matches!(
            h.engine.start_broadcasting(),
            Err(EngineError::InvalidState { .. })
        ));

        h.engine.start_capture().unwrap();
        assert!(h.engine.state().is_capturing());
        assert!(matches!(
            h.engine.start_capture(),
            Err(EngineError::InvalidState { .. })
        ));
        assert!(matches!(
            h.engine.start_broadcasting(),
            Err(EngineError::InvalidArgument(_))
        ));

        h.engine.set_application_id("app".into()).unwrap();
        let id = h.engine.start_broadcasting().unwrap();
        assert_eq!(id, "loopback");
        assert_eq!(
            h.engine.state(),
            &SessionState::Broadcasting {
                broadcast_id: "loopback".into()
            }
        );
        wait_event(&h.events, |e| matches!(e, EngineEvent::ConnectionEstablished { .. }));

        let hello: livecast_transport::SessionHello =
            wait_frame(&h.server, FrameKind::Hello).parse_json().unwrap();
        assert_eq!(hello.application_id, "app");
        assert_eq!((hello.video_width, hello.video_height), (1280, 720));
        wait_frame(&h.server, FrameKind::VideoConfig);
        let video = wait_frame(&h.server, FrameKind::Video);
        assert!(video.is_keyframe());

        h.engine.stop_broadcasting();
        assert!(h.engine.state().is_capturing());
        let stopped = wait_event(&h.events, |e| matches!(e, EngineEvent::BroadcastStopped { .. }));
        assert!(matches!(
            stopped,
            EngineEvent::BroadcastStopped {
                reason: StopReason::UserRequested
            }
        ));

        // Idempotent
        h.engine.stop_broadcasting();
        h.engine.shutdown();
        assert!(h.engine.state().is_idle());
    }

    #[test]
    fn test_rejected_session_returns_to_capturing() {
        let mut h = live(LoopbackOptions {
            broadcast_id: None,
            ..Default::default()
        });

        let result = h.engine.start_broadcasting();
        assert!(matches!(result, Err(EngineError::NetworkFailure(_))));
        assert!(h.engine.state().is_capturing());

        // Phases are reported before the failure
        let mut saw_connecting = false;
        loop {
            match h.events.try_recv().unwrap() {
                EngineEvent::StateChanged { current, .. } => saw_connecting |= current.is_connecting(),
                EngineEvent::ConnectionFailed { .. } => break,
                _ => {}
            }
        }
        assert!(saw_connecting);
    }

    #[test]
    fn test_settings_frozen_while_live() {
        let mut h = live(LoopbackOptions::default());
        h.engine.start_broadcasting().unwrap();

        assert!(matches!(
            h.engine.set_author("someone".into()),
            Err(EngineError::InvalidState { .. })
        ));
        assert!(matches!(
            h.engine.set_audio_quality(AudioQuality::Low),
            Err(EngineError::InvalidState { .. })
        ));

        h.engine.set_title("Live now".into()).unwrap();
        let control = wait_frame(&h.server, FrameKind::Control);
        let message: ControlMessage = control.parse_json().unwrap();
        assert_eq!(
            message,
            ControlMessage::UpdateTitle {
                title: "Live now".into()
            }
        );

        let too_long = "x".repeat(livecast_ipc::MAX_CUSTOM_DATA_BYTES + 1);
        assert!(matches!(
            h.engine.set_custom_data(too_long),
            Err(EngineError::InvalidArgument(_))
        ));

        h.engine.stop_broadcasting();
        h.engine.set_author("someone".into()).unwrap();
        assert_eq!(h.engine.settings().author, "someone");
    }

    #[test]
    fn test_server_loss_stops_broadcast() {
        let mut h = live(LoopbackOptions::default());
        h.engine.start_broadcasting().unwrap();
        drop(h.server);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !h.engine.poll() {
            assert!(Instant::now() < deadline, "stop not requested");
            thread::sleep(Duration::from_millis(20));
        }
        assert!(h.engine.state().is_capturing());

        let stopped = wait_event(&h.events, |e| matches!(e, EngineEvent::BroadcastStopped { .. }));
        assert!(matches!(
            stopped,
            EngineEvent::BroadcastStopped {
                reason: StopReason::NetworkLost { .. } | StopReason::ServerClosed { .. }
            }
        ));
        assert_eq!(h.engine.uplink_metrics().health, 0);
    }

    #[test]
    fn test_talkback_round_trip() {
        let mut h = live(LoopbackOptions::default());
        h.engine.set_talkback(true).unwrap();
        h.engine.start_broadcasting().unwrap();
        wait_frame(&h.server, FrameKind::Hello);

        for id in [5, 6] {
            h.server.send(
                Frame::json(
                    FrameKind::Control,
                    0,
                    &ControlMessage::TalkbackRequest {
                        talkback_id: id,
                        caller: "studio".into(),
                    },
                )
                .unwrap(),
            );
        }
        let event = wait_event(&h.events, |e| matches!(e, EngineEvent::TalkbackRequested(_)));
        assert!(matches!(
            event,
            EngineEvent::TalkbackRequested(TalkbackRequest { talkback_id: 5, .. })
        ));
        wait_event(&h.events, |e| matches!(e, EngineEvent::TalkbackRequested(_)));
        assert_eq!(h.engine.talkback_state(), TalkbackState::Pending);

        assert!(matches!(
            h.engine.accept_talkback(9),
            Err(EngineError::UnknownTalkbackId(9))
        ));
        h.engine.accept_talkback(5).unwrap();
        assert_eq!(h.engine.talkback_state(), TalkbackState::Active);
        let reply: ControlMessage = wait_frame(&h.server, FrameKind::Control).parse_json().unwrap();
        assert_eq!(reply, ControlMessage::TalkbackAccept { talkback_id: 5 });
        assert!(h.engine.audio_monitor().is_some());

        // Only one active session
        assert!(matches!(
            h.engine.accept_talkback(6),
            Err(EngineError::InvalidState { .. })
        ));

        h.engine.end_talkback().unwrap();
        let reply: ControlMessage = wait_frame(&h.server, FrameKind::Control).parse_json().unwrap();
        assert_eq!(reply, ControlMessage::TalkbackEnd { talkback_id: 5 });
        // Request 6 is still queued
        assert_eq!(h.engine.talkback_state(), TalkbackState::Pending);
        wait_event(&h.events, |e| matches!(e, EngineEvent::TalkbackEnded { talkback_id: 5 }));

        h.engine.stop_broadcasting();
        assert_eq!(h.engine.talkback_state(), TalkbackState::Idle);
    }

    #[test]
    fn test_chat_both_directions() {
        let mut h = live(LoopbackOptions::default());
        assert!(matches!(
            h.engine.send_chat("hi".into()),
            Err(EngineError::InvalidState { .. })
        ));

        h.engine.start_broadcasting().unwrap();
        assert!(matches!(
            h.engine.send_chat(String::new()),
            Err(EngineError::InvalidArgument(_))
        ));
        h.engine.send_chat("hello viewers".into()).unwrap();
        let chat: ChatPayload = wait_frame(&h.server, FrameKind::Chat).parse_json().unwrap();
        assert_eq!(chat.text, "hello viewers");

        h.server.send(
            Frame::json(
                FrameKind::Chat,
                0,
                &ChatPayload {
                    from: Some("viewer".into()),
                    text: "hello back".into(),
                },
            )
            .unwrap(),
        );
        wait_event(&h.events, |e| matches!(e, EngineEvent::ChatMessage(m) if m.text == "hello back"));

        let history = h.engine.chat_history();
        assert_eq!(history.len(), 2);
        assert!(history[0].from.is_none());
        assert_eq!(history[1].from.as_deref(), Some("viewer"));
    }

    #[test]
    fn test_local_recording_completed_on_stop() {
        let mut h = live(LoopbackOptions::default());
        let path = std::env::temp_dir().join(format!("livecast-test-{}.lcr", uuid::Uuid::new_v4()));
        h.engine.set_save_locally(true).unwrap();
        h.engine
            .set_local_path(Some(path.display().to_string()))
            .unwrap();

        h.engine.start_broadcasting().unwrap();
        wait_frame(&h.server, FrameKind::Video);
        h.engine.stop_broadcasting();

        let event = wait_event(&h.events, |e| matches!(e, EngineEvent::RecordingComplete { .. }));
        assert!(matches!(event, EngineEvent::RecordingComplete { path: p } if p == path.display().to_string()));

        let data = std::fs::read(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(&data[..4], RECORDING_MAGIC);
        assert!(data.len() > 4);
    }

    #[test]
    fn test_uplink_metrics_zero_when_idle() {
        let mut h = live(LoopbackOptions::default());
        assert_eq!(h.engine.uplink_metrics(), UplinkMetrics::default());

        h.engine.start_broadcasting().unwrap();
        wait_event(&h.events, |e| matches!(e, EngineEvent::Metrics(_)));
        assert!(h.engine.uplink_metrics().health > 0);

        h.engine.stop_broadcasting();
        assert_eq!(h.engine.uplink_metrics().health, 0);
        assert_eq!(h.engine.uplink_metrics().speed_bytes_per_sec, 0.0);
    }

    #[test]
    fn test_camera_operations() {
        let mut h = harness(LoopbackOptions::default());
        h.engine.set_framerate(60.0, Some(10.0)).unwrap();
        h.engine.start_capture().unwrap();

        assert!(matches!(
            h.engine.set_framerate(25.0, None),
            Err(EngineError::InvalidState { .. })
        ));
        assert!(matches!(
            h.engine.set_video_preset(VideoPreset::High),
            Err(EngineError::InvalidState { .. })
        ));

        h.engine.set_torch(true).unwrap();
        h.engine.swap_camera().unwrap();
        assert_eq!(h.engine.capture().camera_position(), CameraPosition::Front);
        assert!(!h.engine.capture().torch());
        assert!(matches!(
            h.engine.set_torch(true),
            Err(EngineError::CapabilityUnsupported(_))
        ));

        // Axis change after capture start
        assert!(h
            .engine
            .set_orientation(Orientation::Portrait, None, None)
            .is_err());
        h.engine
            .set_orientation(Orientation::LandscapeLeft, None, None)
            .unwrap();

        h.engine.take_snapshot().unwrap();
        let event = wait_event(&h.events, |e| matches!(e, EngineEvent::SnapshotTaken(_)));
        assert!(matches!(event, EngineEvent::SnapshotTaken(s) if s.width > 0 && !s.data.is_empty()));
    }

    #[test]
    fn test_linktest_result_cached() {
        let mut h = harness(LoopbackOptions::default());
        assert!(matches!(
            h.engine.start_linktest(),
            Err(EngineError::InvalidArgument(_))
        ));

        h.engine.set_application_id("app".into()).unwrap();
        h.engine.start_linktest().unwrap();
        assert!(matches!(
            h.engine.start_linktest(),
            Err(EngineError::InvalidState { .. })
        ));

        let event = wait_event(&h.events, |e| matches!(e, EngineEvent::LinktestCompleted { .. }));
        if let EngineEvent::LinktestCompleted {
            speed_bytes_per_sec,
            recommendation,
        } = event
        {
            assert!(speed_bytes_per_sec > 0.0);
            assert_eq!(h.engine.uplink_metrics().recommendation, recommendation);
        }
    }

    #[test]
    fn test_run_reports_command_errors() {
        let mut h = harness(LoopbackOptions::default());
        let (commands_tx, commands) = livecast_ipc::command_channel();
        commands_tx.send(EngineCommand::SendChat("early".into())).unwrap();
        commands_tx.send(EngineCommand::StartCapture).unwrap();
        commands_tx.send(EngineCommand::Shutdown).unwrap();

        h.engine.run(&commands);

        wait_event(&h.events, |e| matches!(e, EngineEvent::Ready));
        let error = wait_event(&h.events, |e| matches!(e, EngineEvent::Error { .. }));
        assert!(matches!(error, EngineEvent::Error { recoverable: true, .. }));
        wait_event(&h.events, |e| matches!(e, EngineEvent::Shutdown));
        assert!(h.engine.state().is_idle());
    }
}
