//! Encoder worker thread.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{never, select, Receiver, Sender, TrySendError};
use tracing::{debug, error, info, instrument, trace, warn};

use livecast_audio::AudioChunk;
use livecast_capture::CapturedFrame;
use livecast_ipc::Orientation;

use crate::backend::EncoderBackend;
use crate::control::EncoderControl;
use crate::error::EncoderError;
use crate::ladder::{QualityLadder, QualityRung};
use crate::scale::Nv12Transform;
use crate::{
    AudioEncoder, AudioEncoderConfig, EncodedAudioPacket, EncodedVideoPacket, EncoderResult,
    H264Profile, VideoEncoder, VideoEncoderConfig,
};

/// Output of the pipeline, in stream order.
#[derive(Debug, Clone)]
pub enum EncodedPacket {
    /// Sent before the first frame of every new video encoder.
    VideoConfig {
        width: u32,
        height: u32,
        headers: Bytes,
    },
    Video(EncodedVideoPacket),
    /// Sent once before the first audio packet.
    AudioConfig(AudioEncoderConfig),
    Audio(EncodedAudioPacket),
}

impl EncodedPacket {
    pub fn len(&self) -> usize {
        match self {
            Self::VideoConfig { headers, .. } => headers.len(),
            Self::Video(p) => p.data.len(),
            Self::AudioConfig(_) => 0,
            Self::Audio(p) => p.data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer of encoded packets. Must not block the encoder thread.
pub trait PacketSink: Send {
    fn send(&mut self, packet: EncodedPacket) -> EncoderResult<()>;
}

impl PacketSink for Sender<EncodedPacket> {
    fn send(&mut self, packet: EncodedPacket) -> EncoderResult<()> {
        match self.try_send(packet) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                trace!("Encoded packet channel full, dropping packet");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(EncoderError::OutputDisconnected),
        }
    }
}

/// Settings for one run of the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub ladder: QualityLadder,
    pub initial_rung: usize,
    pub fps: f32,
    pub keyframe_interval_secs: u32,
    pub profile: H264Profile,
    /// `None` when audio is off.
    pub audio: Option<AudioEncoderConfig>,
    pub orientation: Orientation,
    /// Recording size (the full camera output), `None` when not recording.
    pub recording: Option<(u32, u32)>,
}

/// Counters updated by the worker.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_in: AtomicU64,
    frames_encoded: AtomicU64,
    encode_drops: AtomicU64,
    bytes_out: AtomicU64,
    width: AtomicU32,
    height: AtomicU32,
    bitrate_kbps: AtomicU32,
}

impl PipelineStats {
    pub fn frames_in(&self) -> u64 {
        self.frames_in.load(Ordering::Relaxed)
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded.load(Ordering::Relaxed)
    }

    pub fn encode_drops(&self) -> u64 {
        self.encode_drops.load(Ordering::Relaxed)
    }

    /// Live stream bytes produced.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    /// Current live resolution and target bitrate.
    pub fn rung(&self) -> QualityRung {
        QualityRung {
            width: self.width.load(Ordering::Relaxed),
            height: self.height.load(Ordering::Relaxed),
            bitrate_kbps: self.bitrate_kbps.load(Ordering::Relaxed),
        }
    }

    fn set_rung(&self, rung: QualityRung) {
        self.width.store(rung.width, Ordering::Relaxed);
        self.height.store(rung.height, Ordering::Relaxed);
        self.bitrate_kbps.store(rung.bitrate_kbps, Ordering::Relaxed);
    }
}

/// Running encoder pipeline.
pub struct EncoderPipeline {
    control: Arc<EncoderControl>,
    stats: Arc<PipelineStats>,
    ladder: QualityLadder,
    should_stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EncoderPipeline {
    /// Create the encoders and start the worker thread.
    ///
    /// Encoder creation errors are returned here rather than from the worker.
    #[instrument(name = "pipeline_start", skip_all, fields(rungs = config.ladder.len()))]
    pub fn start(
        backend: Arc<dyn EncoderBackend>,
        config: PipelineConfig,
        frames: Receiver<CapturedFrame>,
        audio: Option<Receiver<AudioChunk>>,
        live: Box<dyn PacketSink>,
        recording: Option<Box<dyn PacketSink>>,
    ) -> EncoderResult<Self> {
        if config.ladder.is_empty() {
            return Err(EncoderError::Initialization("empty quality ladder".into()));
        }

        let initial_rung = config.initial_rung.min(config.ladder.highest());
        let control = Arc::new(EncoderControl::new(initial_rung, config.orientation));
        let stats = Arc::new(PipelineStats::default());
        let should_stop = Arc::new(AtomicBool::new(false));

        let rung = config.ladder.rung(initial_rung);
        let live_video = backend.video(video_config(&config, rung.width, rung.height, rung.bitrate_kbps))?;
        let live_audio = match &config.audio {
            Some(audio_config) => Some(backend.audio(audio_config.clone())?),
            None => None,
        };

        let recorder = match (config.recording, recording) {
            (Some((width, height)), Some(sink)) => {
                let top = config.ladder.rung(config.ladder.highest());
                let video = backend.video(video_config(&config, width, height, top.bitrate_kbps))?;
                let audio = match &config.audio {
                    Some(audio_config) => Some(backend.audio(audio_config.clone())?),
                    None => None,
                };
                Some(Output::new(video, audio, sink, (width, height)))
            }
            _ => None,
        };

        info!(
            width = rung.width,
            height = rung.height,
            bitrate_kbps = rung.bitrate_kbps,
            recording = recorder.is_some(),
            "Encoder pipeline starting"
        );

        let mut worker = Worker {
            backend,
            config,
            control: Arc::clone(&control),
            stats: Arc::clone(&stats),
            should_stop: Arc::clone(&should_stop),
            live: Output::new(live_video, live_audio, live, (rung.width, rung.height)),
            live_rung: initial_rung,
            recorder,
            start: Instant::now(),
            audio_anchor: None,
            audio_samples: 0,
        };
        stats.set_rung(rung);
        worker.send_configs()?;

        let ladder = worker.config.ladder.clone();
        let thread = thread::Builder::new()
            .name("encoder".into())
            .spawn(move || worker.run(frames, audio))
            .map_err(|e| EncoderError::Thread(e.to_string()))?;

        Ok(Self {
            control,
            stats,
            ladder,
            should_stop,
            thread: Some(thread),
        })
    }

    /// Shared control for rung and orientation changes.
    pub fn control(&self) -> Arc<EncoderControl> {
        Arc::clone(&self.control)
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn ladder(&self) -> &QualityLadder {
        &self.ladder
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the worker after the frame in progress and flush the encoders.
    #[instrument(name = "pipeline_stop", skip(self))]
    pub fn stop(&mut self) -> EncoderResult<()> {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| EncoderError::Thread("encoder thread panicked".into()))?;
            info!(frames = self.stats.frames_encoded(), "Encoder pipeline stopped");
        }
        Ok(())
    }
}

impl Drop for EncoderPipeline {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn video_config(config: &PipelineConfig, width: u32, height: u32, bitrate_kbps: u32) -> VideoEncoderConfig {
    VideoEncoderConfig {
        width,
        height,
        fps: config.fps.round().max(1.0) as u32,
        bitrate_kbps,
        keyframe_interval_secs: config.keyframe_interval_secs,
        profile: config.profile,
    }
}

/// One encoded stream: live or recording.
struct Output {
    video: Box<dyn VideoEncoder>,
    audio: Option<Box<dyn AudioEncoder>>,
    sink: Box<dyn PacketSink>,
    size: (u32, u32),
    transform: Option<Nv12Transform>,
}

impl Output {
    fn new(
        video: Box<dyn VideoEncoder>,
        audio: Option<Box<dyn AudioEncoder>>,
        sink: Box<dyn PacketSink>,
        size: (u32, u32),
    ) -> Self {
        Self {
            video,
            audio,
            sink,
            size,
            transform: None,
        }
    }

    fn send_video_config(&mut self) -> EncoderResult<()> {
        self.sink.send(EncodedPacket::VideoConfig {
            width: self.size.0,
            height: self.size.1,
            headers: self.video.headers().unwrap_or_default(),
        })
    }

    /// Encode one frame. Returns the bytes produced.
    fn encode_frame(&mut self, frame: &CapturedFrame, quarter_turns: u8, pts_100ns: u64) -> EncoderResult<usize> {
        let src = (frame.width, frame.height);
        let stale = self
            .transform
            .as_ref()
            .map_or(true, |t| !t.matches(src, quarter_turns, self.size));
        if stale {
            self.transform = Some(Nv12Transform::new(src, quarter_turns, self.size));
        }

        let pixels = match &self.transform {
            Some(transform) => transform.apply(&frame.data)?,
            None => return Ok(0),
        };

        match self.video.encode(&pixels, pts_100ns)? {
            Some(packet) => {
                let len = packet.data.len();
                self.sink.send(EncodedPacket::Video(packet))?;
                Ok(len)
            }
            None => Ok(0),
        }
    }

    fn encode_audio(&mut self, samples: &[f32], pts_100ns: u64) -> EncoderResult<usize> {
        let Some(encoder) = self.audio.as_mut() else {
            return Ok(0);
        };
        match encoder.encode(samples, pts_100ns)? {
            Some(packet) => {
                let len = packet.data.len();
                self.sink.send(EncodedPacket::Audio(packet))?;
                Ok(len)
            }
            None => Ok(0),
        }
    }

    fn flush(&mut self) -> EncoderResult<()> {
        for packet in self.video.flush()? {
            self.sink.send(EncodedPacket::Video(packet))?;
        }
        if let Some(audio) = self.audio.as_mut() {
            for packet in audio.flush()? {
                self.sink.send(EncodedPacket::Audio(packet))?;
            }
        }
        Ok(())
    }
}

enum Step {
    Processed(EncoderResult<()>),
    Idle,
    FramesClosed,
    AudioClosed,
}

struct Worker {
    backend: Arc<dyn EncoderBackend>,
    config: PipelineConfig,
    control: Arc<EncoderControl>,
    stats: Arc<PipelineStats>,
    should_stop: Arc<AtomicBool>,
    live: Output,
    live_rung: usize,
    recorder: Option<Output>,
    start: Instant,
    audio_anchor: Option<u64>,
    audio_samples: u64,
}

impl Worker {
    fn run(mut self, frames: Receiver<CapturedFrame>, audio: Option<Receiver<AudioChunk>>) {
        debug!("Encoder thread started");

        let mut audio_rx = audio.unwrap_or_else(never);

        while !self.should_stop.load(Ordering::SeqCst) {
            let step = select! {
                recv(frames) -> msg => match msg {
                    Ok(frame) => Step::Processed(self.on_frame(&frame)),
                    Err(_) => Step::FramesClosed,
                },
                recv(audio_rx) -> msg => match msg {
                    Ok(chunk) => Step::Processed(self.on_audio(&chunk)),
                    Err(_) => Step::AudioClosed,
                },
                default(Duration::from_millis(100)) => Step::Idle,
            };

            match step {
                Step::Processed(Ok(())) | Step::Idle => {}
                Step::Processed(Err(EncoderError::OutputDisconnected)) => {
                    warn!("Live output closed, stopping encoder");
                    break;
                }
                Step::Processed(Err(e)) => {
                    self.stats.encode_drops.fetch_add(1, Ordering::Relaxed);
                    warn!("Encode failed: {}", e);
                }
                Step::FramesClosed => {
                    debug!("Frame channel closed");
                    break;
                }
                Step::AudioClosed => audio_rx = never(),
            }
        }

        if let Err(e) = self.live.flush() {
            debug!("Live flush ended: {}", e);
        }
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.flush() {
                error!("Recording flush failed: {}", e);
            }
        }
        debug!("Encoder thread exiting");
    }

    fn send_configs(&mut self) -> EncoderResult<()> {
        self.live.send_video_config()?;
        if let Some(audio) = &self.config.audio {
            self.live.sink.send(EncodedPacket::AudioConfig(audio.clone()))?;
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.send_video_config()?;
            if let Some(audio) = &self.config.audio {
                recorder.sink.send(EncodedPacket::AudioConfig(audio.clone()))?;
            }
        }
        Ok(())
    }

    fn pts(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.start).as_nanos() as u64 / 100
    }

    fn on_frame(&mut self, frame: &CapturedFrame) -> EncoderResult<()> {
        self.stats.frames_in.fetch_add(1, Ordering::Relaxed);

        let requested = self.control.rung().min(self.config.ladder.highest());
        if requested != self.live_rung {
            self.switch_rung(requested);
        }

        let turns = self.control.quarter_turns();
        let pts = self.pts(frame.timestamp.capture_time);

        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.encode_frame(frame, turns, pts) {
                warn!("Recording encode failed: {}", e);
            }
        }

        let bytes = self.live.encode_frame(frame, turns, pts)?;
        self.stats.frames_encoded.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
        Ok(())
    }

    fn switch_rung(&mut self, index: usize) {
        let rung = self.config.ladder.rung(index);
        let config = video_config(&self.config, rung.width, rung.height, rung.bitrate_kbps);

        match self.backend.video(config) {
            Ok(encoder) => {
                if let Err(e) = self.live.flush() {
                    debug!("Flush before rung change failed: {}", e);
                }
                self.live.video = encoder;
                self.live.size = (rung.width, rung.height);
                self.live.transform = None;
                self.live_rung = index;
                self.stats.set_rung(rung);
                if let Err(e) = self.live.send_video_config() {
                    warn!("Failed to send video config: {}", e);
                }
                info!(
                    rung = index,
                    width = rung.width,
                    height = rung.height,
                    bitrate_kbps = rung.bitrate_kbps,
                    "Live quality changed"
                );
            }
            Err(e) => {
                error!(rung = index, "Failed to create encoder, keeping current rung: {}", e);
                self.control.set_rung(self.live_rung);
            }
        }
    }

    fn on_audio(&mut self, chunk: &AudioChunk) -> EncoderResult<()> {
        let Some(audio) = &self.config.audio else {
            return Ok(());
        };
        let sample_rate = audio.sample_rate.max(1) as u64;

        let samples = if audio.channels == 1 {
            downmix(&chunk.samples)
        } else {
            chunk.samples.clone()
        };

        let now = self.pts(Instant::now());
        let anchor = *self.audio_anchor.get_or_insert(now);
        let pts = anchor + self.audio_samples * 10_000_000 / sample_rate;
        self.audio_samples += (chunk.samples.len() / livecast_audio::CHANNELS as usize) as u64;

        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.encode_audio(&samples, pts) {
                warn!("Recording audio encode failed: {}", e);
            }
        }

        let bytes = self.live.encode_audio(&samples, pts)?;
        self.stats.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Average interleaved stereo into mono.
fn downmix(samples: &[f32]) -> Vec<f32> {
    samples
        .chunks_exact(2)
        .map(|pair| (pair[0] + pair[1]) * 0.5)
        .collect()
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use livecast_capture::CaptureTimestamp;

    use super::*;
    use crate::FrameType;

    /// Packets carry the encoder's width and height.
    struct MockVideo {
        config: VideoEncoderConfig,
        frames: u64,
    }

    impl VideoEncoder for MockVideo {
        fn encode(&mut self, frame: &[u8], pts_100ns: u64) -> EncoderResult<Option<EncodedVideoPacket>> {
            let expected = (self.config.width * self.config.height * 3 / 2) as usize;
            if frame.len() != expected {
                return Err(EncoderError::InvalidInput(format!("{} != {}", frame.len(), expected)));
            }
            let mut data = self.config.width.to_be_bytes().to_vec();
            data.extend_from_slice(&self.config.height.to_be_bytes());
            let is_keyframe = self.frames == 0;
            self.frames += 1;
            Ok(Some(EncodedVideoPacket {
                data: Bytes::from(data),
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
            Some(Bytes::from_static(&[0, 0, 0, 1, 0x67]))
        }

        fn is_hardware_accelerated(&self) -> bool {
            false
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    struct MockAudio {
        seen: Arc<Mutex<Vec<usize>>>,
    }

    impl AudioEncoder for MockAudio {
        fn encode(&mut self, samples: &[f32], pts_100ns: u64) -> EncoderResult<Option<EncodedAudioPacket>> {
            self.seen.lock().push(samples.len());
            Ok(Some(EncodedAudioPacket {
                data: Bytes::from_static(&[0xAA]),
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

    #[derive(Default)]
    struct MockBackend {
        video_configs: Mutex<Vec<VideoEncoderConfig>>,
        audio_samples: Arc<Mutex<Vec<usize>>>,
    }

    impl EncoderBackend for MockBackend {
        fn video(&self, config: VideoEncoderConfig) -> EncoderResult<Box<dyn VideoEncoder>> {
            self.video_configs.lock().push(config.clone());
            Ok(Box::new(MockVideo { config, frames: 0 }))
        }

        fn audio(&self, _config: AudioEncoderConfig) -> EncoderResult<Box<dyn AudioEncoder>> {
            Ok(Box::new(MockAudio {
                seen: Arc::clone(&self.audio_samples),
            }))
        }
    }

    fn frame(width: u32, height: u32, sequence: u64) -> CapturedFrame {
        CapturedFrame::new(
            Bytes::from(vec![16u8; CapturedFrame::nv12_buffer_size(width, height)]),
            width,
            height,
            CaptureTimestamp::now(Instant::now()),
            sequence,
            0,
        )
    }

    fn config(audio: Option<AudioEncoderConfig>, recording: Option<(u32, u32)>) -> PipelineConfig {
        let ladder = QualityLadder::new((640, 360), 0, 30.0);
        PipelineConfig {
            initial_rung: ladder.highest(),
            ladder,
            fps: 30.0,
            keyframe_interval_secs: 2,
            profile: H264Profile::Main,
            audio,
            orientation: Orientation::LandscapeRight,
            recording,
        }
    }

    fn video_size(packet: &EncodedPacket) -> Option<(u32, u32)> {
        match packet {
            EncodedPacket::Video(p) => {
                let w = u32::from_be_bytes([p.data[0], p.data[1], p.data[2], p.data[3]]);
                let h = u32::from_be_bytes([p.data[4], p.data[5], p.data[6], p.data[7]]);
                Some((w, h))
            }
            _ => None,
        }
    }

    fn next_video(rx: &Receiver<EncodedPacket>) -> (u32, u32) {
        loop {
            let packet = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            if let Some(size) = video_size(&packet) {
                return size;
            }
        }
    }

    #[test]
    fn test_config_precedes_frames() {
        let backend = Arc::new(MockBackend::default());
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(4);
        let (live_tx, live_rx) = crossbeam_channel::bounded(64);

        let mut pipeline = EncoderPipeline::start(
            backend.clone(),
            config(None, None),
            frame_rx,
            None,
            Box::new(live_tx),
            None,
        )
        .unwrap();

        frame_tx.send(frame(640, 360, 0)).unwrap();

        match live_rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            EncodedPacket::VideoConfig { width, height, headers } => {
                assert_eq!((width, height), (640, 360));
                assert!(!headers.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(next_video(&live_rx), (640, 360));

        pipeline.stop().unwrap();
        assert_eq!(pipeline.stats().frames_encoded(), 1);
    }

    #[test]
    fn test_rung_change_leaves_recording_untouched() {
        let backend = Arc::new(MockBackend::default());
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(4);
        let (live_tx, live_rx) = crossbeam_channel::bounded(64);
        let (rec_tx, rec_rx) = crossbeam_channel::bounded(64);

        let mut pipeline = EncoderPipeline::start(
            backend.clone(),
            config(None, Some((640, 360))),
            frame_rx,
            None,
            Box::new(live_tx),
            Some(Box::new(rec_tx)),
        )
        .unwrap();

        frame_tx.send(frame(640, 360, 0)).unwrap();
        assert_eq!(next_video(&live_rx), (640, 360));

        pipeline.control().set_rung(0);
        frame_tx.send(frame(640, 360, 1)).unwrap();
        let lowest = pipeline.ladder().lowest();
        assert_eq!(next_video(&live_rx), (lowest.width, lowest.height));
        assert_eq!(pipeline.stats().rung(), lowest);

        assert_eq!(next_video(&rec_rx), (640, 360));
        assert_eq!(next_video(&rec_rx), (640, 360));

        pipeline.stop().unwrap();
        // Live at top, recording, then live at the lowest rung
        assert_eq!(backend.video_configs.lock().len(), 3);
    }

    #[test]
    fn test_portrait_frames_are_rotated() {
        let backend = Arc::new(MockBackend::default());
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(4);
        let (live_tx, live_rx) = crossbeam_channel::bounded(64);

        let ladder = QualityLadder::new((360, 640), 0, 30.0);
        let config = PipelineConfig {
            initial_rung: ladder.highest(),
            ladder,
            orientation: Orientation::Portrait,
            ..config(None, None)
        };
        let mut pipeline =
            EncoderPipeline::start(backend, config, frame_rx, None, Box::new(live_tx), None).unwrap();

        frame_tx.send(frame(640, 360, 0)).unwrap();
        assert_eq!(next_video(&live_rx), (360, 640));
        pipeline.stop().unwrap();
    }

    #[test]
    fn test_mono_audio_is_downmixed() {
        let backend = Arc::new(MockBackend::default());
        let (_frame_tx, frame_rx) = crossbeam_channel::bounded::<CapturedFrame>(4);
        let (audio_tx, audio_rx) = crossbeam_channel::bounded(4);
        let (live_tx, live_rx) = crossbeam_channel::bounded(64);

        let audio = AudioEncoderConfig::for_quality(livecast_ipc::AudioQuality::Low);
        let mut pipeline = EncoderPipeline::start(
            backend.clone(),
            config(audio, None),
            frame_rx,
            Some(audio_rx),
            Box::new(live_tx),
            None,
        )
        .unwrap();

        audio_tx.send(AudioChunk::silence(0, 0)).unwrap();
        loop {
            if let EncodedPacket::Audio(_) = live_rx.recv_timeout(Duration::from_secs(2)).unwrap() {
                break;
            }
        }
        pipeline.stop().unwrap();
        assert_eq!(backend.audio_samples.lock().as_slice(), &[480]);
    }

    #[test]
    fn test_downmix() {
        assert_eq!(downmix(&[1.0, 0.0, -0.5, -0.5]), vec![0.5, -0.5]);
    }
}
