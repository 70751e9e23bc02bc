//! Audio input sources.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, info, instrument, trace};

use crate::chunk::AudioChunk;
use crate::error::AudioError;
use crate::{AudioResult, AUDIO_CHANNEL_CAPACITY, CHANNELS, SAMPLES_PER_CHUNK, SAMPLE_RATE};

/// A microphone or other capture device delivering 10ms chunks.
pub trait AudioSource: Send {
    /// Start capturing.
    fn start(&mut self) -> AudioResult<Receiver<AudioChunk>>;

    /// Stop capturing.
    fn stop(&mut self) -> AudioResult<()>;

    /// Check if capture is active.
    fn is_active(&self) -> bool;
}

/// Sine wave source paced in real time.
pub struct ToneSource {
    frequency: f32,
    amplitude: f32,
    should_stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ToneSource {
    pub fn new(frequency: f32, amplitude: f32) -> Self {
        Self {
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            should_stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl Default for ToneSource {
    fn default() -> Self {
        Self::new(440.0, 0.25)
    }
}

impl AudioSource for ToneSource {
    #[instrument(name = "tone_source_start", skip(self), fields(frequency = self.frequency))]
    fn start(&mut self) -> AudioResult<Receiver<AudioChunk>> {
        if self.thread.is_some() {
            return Err(AudioError::AlreadyStarted);
        }

        let (sender, receiver) = crossbeam_channel::bounded(AUDIO_CHANNEL_CAPACITY);
        self.should_stop.store(false, Ordering::SeqCst);

        let should_stop = Arc::clone(&self.should_stop);
        let (frequency, amplitude) = (self.frequency, self.amplitude);
        let handle = thread::Builder::new()
            .name("tone-source".into())
            .spawn(move || tone_thread(frequency, amplitude, sender, should_stop))
            .map_err(|e| AudioError::Thread(e.to_string()))?;

        self.thread = Some(handle);
        info!("Tone source started");
        Ok(receiver)
    }

    fn stop(&mut self) -> AudioResult<()> {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            handle
                .join()
                .map_err(|_| AudioError::Thread("tone source panicked".into()))?;
            info!("Tone source stopped");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.thread.is_some() && !self.should_stop.load(Ordering::SeqCst)
    }
}

impl Drop for ToneSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn tone_thread(frequency: f32, amplitude: f32, sender: Sender<AudioChunk>, should_stop: Arc<AtomicBool>) {
    let chunk_duration = Duration::from_millis(10);
    let start = Instant::now();
    let mut next_chunk_time = start;
    let mut sequence = 0u64;
    let mut phase = 0.0f32;
    let step = TAU * frequency / SAMPLE_RATE as f32;

    while !should_stop.load(Ordering::SeqCst) {
        let mut samples = Vec::with_capacity(AudioChunk::LEN);
        for _ in 0..SAMPLES_PER_CHUNK {
            let value = phase.sin() * amplitude;
            samples.extend(std::iter::repeat(value).take(CHANNELS as usize));
            phase = (phase + step) % TAU;
        }

        let pts_100ns = next_chunk_time.duration_since(start).as_nanos() as u64 / 100;
        match sender.try_send(AudioChunk::new(samples, pts_100ns, sequence)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("Tone channel full, dropping chunk"),
            Err(TrySendError::Disconnected(_)) => break,
        }

        sequence += 1;
        next_chunk_time += chunk_duration;
        let now = Instant::now();
        if next_chunk_time > now {
            thread::sleep(next_chunk_time - now);
        }
    }

    debug!(chunks = sequence, "Tone source thread exiting");
}
