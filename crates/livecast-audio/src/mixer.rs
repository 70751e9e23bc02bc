//! Microphone and talkback mixing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use tracing::{debug, info, instrument, trace};

use crate::chunk::AudioChunk;
use crate::error::AudioError;
use crate::level::LevelMeter;
use crate::{AudioResult, AUDIO_CHANNEL_CAPACITY};

/// Receivers produced by a running mixer.
pub struct MixerOutputs {
    /// Broadcast and recording mix.
    pub mix: Receiver<AudioChunk>,

    /// Talkback audio for local playback.
    pub monitor: Receiver<AudioChunk>,
}

/// Audio mixer combining the microphone with inbound talkback audio.
pub struct AudioMixer {
    mix_thread: Option<JoinHandle<()>>,
    should_stop: Arc<AtomicBool>,
    mic_volume: Arc<RwLock<f32>>,
    talkback_volume: Arc<RwLock<f32>>,
    mic_muted: Arc<AtomicBool>,
    talkback_mix: Arc<AtomicBool>,
    level: Arc<LevelMeter>,
}

struct MixState {
    mic_input: Option<Receiver<AudioChunk>>,
    talkback_input: Option<Receiver<AudioChunk>>,
    mix_sender: Sender<AudioChunk>,
    monitor_sender: Sender<AudioChunk>,
    should_stop: Arc<AtomicBool>,
    mic_volume: Arc<RwLock<f32>>,
    talkback_volume: Arc<RwLock<f32>>,
    mic_muted: Arc<AtomicBool>,
    talkback_mix: Arc<AtomicBool>,
    level: Arc<LevelMeter>,
}

impl AudioMixer {
    /// Create a new audio mixer.
    pub fn new() -> Self {
        Self {
            mix_thread: None,
            should_stop: Arc::new(AtomicBool::new(false)),
            mic_volume: Arc::new(RwLock::new(1.0)),
            talkback_volume: Arc::new(RwLock::new(1.0)),
            mic_muted: Arc::new(AtomicBool::new(false)),
            talkback_mix: Arc::new(AtomicBool::new(false)),
            level: Arc::new(LevelMeter::new()),
        }
    }

    /// Start mixing audio from the given inputs.
    #[instrument(name = "mixer_start", skip(self, mic_input, talkback_input))]
    pub fn start(
        &mut self,
        mic_input: Option<Receiver<AudioChunk>>,
        talkback_input: Option<Receiver<AudioChunk>>,
    ) -> AudioResult<MixerOutputs> {
        if self.mix_thread.is_some() {
            return Err(AudioError::AlreadyStarted);
        }
        info!("Starting audio mixer");

        let (mix_sender, mix) = crossbeam_channel::bounded(AUDIO_CHANNEL_CAPACITY);
        let (monitor_sender, monitor) = crossbeam_channel::bounded(AUDIO_CHANNEL_CAPACITY);

        self.should_stop.store(false, Ordering::SeqCst);
        self.level.reset();

        let state = MixState {
            mic_input,
            talkback_input,
            mix_sender,
            monitor_sender,
            should_stop: Arc::clone(&self.should_stop),
            mic_volume: Arc::clone(&self.mic_volume),
            talkback_volume: Arc::clone(&self.talkback_volume),
            mic_muted: Arc::clone(&self.mic_muted),
            talkback_mix: Arc::clone(&self.talkback_mix),
            level: Arc::clone(&self.level),
        };

        let handle = thread::Builder::new()
            .name("audio-mixer".into())
            .spawn(move || mix_thread(state))
            .map_err(|e| AudioError::Thread(e.to_string()))?;

        self.mix_thread = Some(handle);
        Ok(MixerOutputs { mix, monitor })
    }

    /// Stop the mixer.
    #[instrument(name = "mixer_stop", skip(self))]
    pub fn stop(&mut self) -> AudioResult<()> {
        self.should_stop.store(true, Ordering::SeqCst);

        if let Some(handle) = self.mix_thread.take() {
            handle
                .join()
                .map_err(|_| AudioError::MixerError("mixer thread panicked".into()))?;
            info!("Audio mixer stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.mix_thread.is_some()
    }

    /// Set microphone volume.
    pub fn set_mic_volume(&self, volume: f32) {
        *self.mic_volume.write() = volume.clamp(0.0, 1.0);
    }

    /// Set talkback volume.
    pub fn set_talkback_volume(&self, volume: f32) {
        *self.talkback_volume.write() = volume.clamp(0.0, 1.0);
    }

    /// Set microphone muted state.
    pub fn set_mic_muted(&self, muted: bool) {
        self.mic_muted.store(muted, Ordering::SeqCst);
    }

    /// Route talkback audio into the broadcast mix as well as the monitor.
    pub fn set_talkback_mix(&self, enabled: bool) {
        self.talkback_mix.store(enabled, Ordering::SeqCst);
    }

    pub fn talkback_mix(&self) -> bool {
        self.talkback_mix.load(Ordering::SeqCst)
    }

    /// Microphone level meter.
    pub fn level(&self) -> Arc<LevelMeter> {
        Arc::clone(&self.level)
    }
}

impl Default for AudioMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioMixer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn mix_thread(state: MixState) {
    debug!("Mixer thread started");

    let mut mix_buffer = vec![0.0f32; AudioChunk::LEN];
    let mut sequence = 0u64;
    let start_time = Instant::now();

    // 10ms chunks
    let chunk_duration = Duration::from_millis(10);
    let mut next_chunk_time = start_time;

    while !state.should_stop.load(Ordering::SeqCst) {
        mix_buffer.fill(0.0);

        if let Some(ref mic_rx) = state.mic_input {
            if let Ok(chunk) = mic_rx.try_recv() {
                if state.mic_muted.load(Ordering::SeqCst) {
                    state.level.update(&[0.0]);
                } else {
                    let volume = *state.mic_volume.read();
                    mix_into(&mut mix_buffer, &chunk.samples, volume);
                    state.level.update(&chunk.samples);
                }
            }
        }

        if let Some(ref talkback_rx) = state.talkback_input {
            if let Ok(chunk) = talkback_rx.try_recv() {
                if state.talkback_mix.load(Ordering::SeqCst) {
                    let volume = *state.talkback_volume.read();
                    mix_into(&mut mix_buffer, &chunk.samples, volume);
                }
                if let Err(TrySendError::Full(_)) = state.monitor_sender.try_send(chunk) {
                    trace!("Monitor channel full, dropping talkback chunk");
                }
            }
        }

        for sample in mix_buffer.iter_mut() {
            *sample = soft_clip(*sample);
        }

        let pts_100ns = next_chunk_time.duration_since(start_time).as_nanos() as u64 / 100;
        let output = AudioChunk::new(mix_buffer.clone(), pts_100ns, sequence);

        match state.mix_sender.try_send(output) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                trace!("Mixed audio channel full, dropping chunk");
            }
            Err(TrySendError::Disconnected(_)) => {
                break;
            }
        }

        sequence += 1;
        next_chunk_time += chunk_duration;

        let now = Instant::now();
        if next_chunk_time > now {
            thread::sleep(next_chunk_time - now);
        }
    }

    debug!("Mixer thread exiting");
}

/// Add `samples` scaled by `volume` into `buffer`.
fn mix_into(buffer: &mut [f32], samples: &[f32], volume: f32) {
    for (out, &sample) in buffer.iter_mut().zip(samples) {
        *out += sample * volume;
    }
}

/// Soft clipping function to prevent harsh digital clipping.
fn soft_clip(sample: f32) -> f32 {
    if sample > 1.0 {
        1.0 - (-sample + 1.0).exp() * 0.5
    } else if sample < -1.0 {
        -1.0 + (sample + 1.0).exp() * 0.5
    } else {
        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: f32) -> AudioChunk {
        AudioChunk::new(vec![value; AudioChunk::LEN], 0, 0)
    }

    fn first_mix(talkback_mix: bool) -> (AudioChunk, AudioChunk) {
        let (mic_tx, mic_rx) = crossbeam_channel::bounded(4);
        let (tb_tx, tb_rx) = crossbeam_channel::bounded(4);
        mic_tx.send(constant(0.25)).unwrap();
        tb_tx.send(constant(0.5)).unwrap();

        let mut mixer = AudioMixer::new();
        mixer.set_talkback_mix(talkback_mix);
        let outputs = mixer.start(Some(mic_rx), Some(tb_rx)).unwrap();

        let mix = outputs.mix.recv_timeout(Duration::from_secs(1)).unwrap();
        let monitor = outputs.monitor.recv_timeout(Duration::from_secs(1)).unwrap();
        mixer.stop().unwrap();
        (mix, monitor)
    }

    #[test]
    fn test_talkback_only_on_monitor_without_mix() {
        let (mix, monitor) = first_mix(false);
        assert!(mix.samples.iter().all(|&s| (s - 0.25).abs() < 1e-6));
        assert!(monitor.samples.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_talkback_summed_into_mix() {
        let (mix, monitor) = first_mix(true);
        assert!(mix.samples.iter().all(|&s| (s - 0.75).abs() < 1e-6));
        assert_eq!(monitor.samples.len(), AudioChunk::LEN);
    }

    #[test]
    fn test_start_twice_fails() {
        let mut mixer = AudioMixer::new();
        let _outputs = mixer.start(None, None).unwrap();
        assert!(matches!(mixer.start(None, None), Err(AudioError::AlreadyStarted)));
        mixer.stop().unwrap();
        assert!(!mixer.is_running());
    }

    #[test]
    fn test_mix_into_applies_volume() {
        let mut buffer = vec![0.1, 0.1];
        mix_into(&mut buffer, &[1.0, -1.0], 0.5);
        assert!((buffer[0] - 0.6).abs() < 1e-6);
        assert!((buffer[1] + 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_soft_clip() {
        assert_eq!(soft_clip(0.5), 0.5);
        assert!(soft_clip(3.0) < 1.0);
        assert!(soft_clip(-3.0) > -1.0);
    }
}
