//! Runtime control of a running encoder pipeline.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use livecast_ipc::Orientation;

/// Settings the encoder worker picks up at the next frame.
#[derive(Debug)]
pub struct EncoderControl {
    rung: AtomicUsize,
    quarter_turns: AtomicU8,
}

impl EncoderControl {
    pub fn new(rung: usize, orientation: Orientation) -> Self {
        Self {
            rung: AtomicUsize::new(rung),
            quarter_turns: AtomicU8::new(orientation.quarter_turns()),
        }
    }

    pub fn rung(&self) -> usize {
        self.rung.load(Ordering::SeqCst)
    }

    pub fn set_rung(&self, rung: usize) {
        self.rung.store(rung, Ordering::SeqCst);
    }

    /// Rotation applied to captured frames.
    pub fn quarter_turns(&self) -> u8 {
        self.quarter_turns.load(Ordering::SeqCst)
    }

    /// Only a flip on the same axis keeps the output dimensions valid.
    pub fn set_orientation(&self, orientation: Orientation) {
        self.quarter_turns
            .store(orientation.quarter_turns(), Ordering::SeqCst);
    }
}
