//! Prioritized outgoing frame buffer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::trace;

use crate::error::TransportError;
use crate::frame::Frame;
use crate::TransportResult;

/// Buffer lane. Lanes are drained in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Control,
    Media,
    Chat,
}

/// Bounds of the send buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendBufferConfig {
    /// Media lane bound in payload bytes.
    pub media_bytes: usize,

    /// Chat lane bound in messages.
    pub chat_messages: usize,
}

impl Default for SendBufferConfig {
    fn default() -> Self {
        Self {
            media_bytes: 2 * 1024 * 1024,
            chat_messages: 64,
        }
    }
}

#[derive(Default)]
struct Lanes {
    control: VecDeque<Frame>,
    media: VecDeque<Frame>,
    chat: VecDeque<Frame>,
    media_bytes: usize,
    backlog_bytes: u64,
}

impl Lanes {
    fn pop(&mut self) -> Option<Frame> {
        let frame = if let Some(frame) = self.control.pop_front() {
            frame
        } else if let Some(frame) = self.media.pop_front() {
            self.media_bytes -= frame.encoded_len();
            frame
        } else {
            self.chat.pop_front()?
        };
        self.backlog_bytes -= frame.encoded_len() as u64;
        Some(frame)
    }

    /// Drop the oldest media frame that is not stream configuration.
    fn drop_oldest_media(&mut self) -> bool {
        let Some(index) = self.media.iter().position(|f| !f.kind.is_config()) else {
            return false;
        };
        if let Some(frame) = self.media.remove(index) {
            self.media_bytes -= frame.encoded_len();
            self.backlog_bytes -= frame.encoded_len() as u64;
        }
        true
    }
}

/// Frames waiting for the socket, shared between producers and the writer
/// task.
///
/// Control frames always go first, then media, then chat. The media lane is
/// bounded in bytes and drops its oldest frames when full; the chat lane is
/// bounded in count. The control lane is unbounded.
pub struct SendBuffer {
    config: SendBufferConfig,
    lanes: Mutex<Lanes>,
    notify: Notify,
    closed: AtomicBool,
    enqueued_bytes: AtomicU64,
    sent_bytes: AtomicU64,
    dropped_frames: AtomicU64,
}

impl SendBuffer {
    pub fn new(config: SendBufferConfig) -> Self {
        Self {
            config,
            lanes: Mutex::new(Lanes::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            enqueued_bytes: AtomicU64::new(0),
            sent_bytes: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Queue a frame on the lane of its kind. Never blocks.
    pub fn push(&self, frame: Frame) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        let len = frame.encoded_len();
        let mut dropped = 0u64;
        {
            let mut lanes = self.lanes.lock();
            match frame.kind.lane() {
                Lane::Control => lanes.control.push_back(frame),
                Lane::Media => {
                    while lanes.media_bytes + len > self.config.media_bytes
                        && lanes.drop_oldest_media()
                    {
                        dropped += 1;
                    }
                    lanes.media_bytes += len;
                    lanes.media.push_back(frame);
                }
                Lane::Chat => {
                    if lanes.chat.len() >= self.config.chat_messages.max(1) {
                        if let Some(old) = lanes.chat.pop_front() {
                            lanes.backlog_bytes -= old.encoded_len() as u64;
                            dropped += 1;
                        }
                    }
                    lanes.chat.push_back(frame);
                }
            }
            lanes.backlog_bytes += len as u64;
        }

        if dropped > 0 {
            trace!(dropped, "Send buffer full, dropped oldest frames");
            self.dropped_frames.fetch_add(dropped, Ordering::Relaxed);
        }
        self.enqueued_bytes.fetch_add(len as u64, Ordering::Relaxed);
        self.notify.notify_one();
        Ok(())
    }

    /// Take the next frame in priority order.
    pub fn pop(&self) -> Option<Frame> {
        self.lanes.lock().pop()
    }

    /// Wait for the next frame. Returns `None` once the buffer is closed and
    /// drained.
    pub async fn next(&self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.pop() {
                return Some(frame);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting frames and discard queued media and chat. Queued
    /// control frames are still delivered.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        {
            let mut lanes = self.lanes.lock();
            lanes.media.clear();
            lanes.chat.clear();
            lanes.media_bytes = 0;
            lanes.backlog_bytes = lanes.control.iter().map(|f| f.encoded_len() as u64).sum();
        }
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Record bytes written to the socket.
    pub fn mark_sent(&self, bytes: usize) {
        self.sent_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Bytes queued and not yet taken by the writer.
    pub fn backlog_bytes(&self) -> u64 {
        self.lanes.lock().backlog_bytes
    }

    pub fn len(&self) -> usize {
        let lanes = self.lanes.lock();
        lanes.control.len() + lanes.media.len() + lanes.chat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes ever queued.
    pub fn enqueued_bytes(&self) -> u64 {
        self.enqueued_bytes.load(Ordering::Relaxed)
    }

    /// Total bytes written to the socket.
    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes.load(Ordering::Relaxed)
    }

    /// Frames dropped because a lane was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}
