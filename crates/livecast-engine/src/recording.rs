//! Local copy of a broadcast.
//!
//! A recording is the `LCR1` magic followed by wire frames in stream order,
//! so any ingest frame reader can replay it.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use tracing::{error, info, warn};

use livecast_encoder::{EncodedPacket, EncoderError, EncoderResult, PacketSink};

use crate::outbound::packet_to_frame;

/// First bytes of every recording file.
pub const RECORDING_MAGIC: &[u8; 4] = b"LCR1";

/// Recording file for a broadcast: the configured path, or a unique file in
/// `dir`.
pub fn recording_path(local_path: Option<&str>, dir: &Path) -> PathBuf {
    match local_path {
        Some(path) => PathBuf::from(path),
        None => dir.join(format!("livecast-{}.lcr", uuid::Uuid::new_v4())),
    }
}

/// Encoder sink writing a recording file. The file is flushed when the
/// sink is dropped by the encoder thread.
pub struct RecordingWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    scratch: BytesMut,
    failed: bool,
}

impl RecordingWriter {
    pub fn create(path: &Path) -> EncoderResult<Self> {
        let file = File::create(path).map_err(|e| {
            EncoderError::Initialization(format!("recording {}: {}", path.display(), e))
        })?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(RECORDING_MAGIC)
            .map_err(|e| EncoderError::Initialization(e.to_string()))?;
        info!(path = %path.display(), "Recording started");
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            scratch: BytesMut::new(),
            failed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PacketSink for RecordingWriter {
    fn send(&mut self, packet: EncodedPacket) -> EncoderResult<()> {
        if self.failed {
            return Ok(());
        }
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let frame = match packet_to_frame(&packet) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(e) => return Err(EncoderError::Encoding(e.to_string())),
        };

        self.scratch.clear();
        frame.encode(&mut self.scratch);
        if let Err(e) = writer.write_all(&self.scratch) {
            // Keep the live stream going; the file stays truncated
            error!(path = %self.path.display(), "Recording write failed: {}", e);
            self.failed = true;
        }
        Ok(())
    }
}

impl Drop for RecordingWriter {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                warn!(path = %self.path.display(), "Recording flush failed: {}", e);
            } else {
                info!(path = %self.path.display(), "Recording finalized");
            }
        }
    }
}
