//! Engine configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```json
//! { "ingest": { "url": "livecast://ingest.example.com:7070" } }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use livecast_encoder::{AdaptationParams, H264Profile};
use livecast_transport::{IngestConfig, LinktestConfig, HEALTH_WINDOWS};

use crate::error::EngineError;
use crate::EngineResult;

/// Settings that do not change during the life of an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ingest: IngestConfig,

    pub linktest: LinktestConfig,

    pub adaptation: AdaptationParams,

    /// Length of one uplink measurement window.
    pub measurement_interval_ms: u64,

    /// Windows averaged into the health score.
    pub health_windows: usize,

    /// Measurement windows between two `Metrics` events.
    pub metrics_every: u32,

    pub keyframe_interval_secs: u32,

    pub profile: H264Profile,

    /// Directory for local recordings without an explicit path. Defaults to
    /// the system temp dir.
    pub recording_dir: Option<PathBuf>,

    /// Chat messages kept in history.
    pub chat_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ingest: IngestConfig::default(),
            linktest: LinktestConfig::default(),
            adaptation: AdaptationParams::default(),
            measurement_interval_ms: 1000,
            health_windows: HEALTH_WINDOWS,
            metrics_every: 1,
            keyframe_interval_secs: 2,
            profile: H264Profile::Main,
            recording_dir: None,
            chat_history: 100,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn measurement_interval(&self) -> Duration {
        Duration::from_millis(self.measurement_interval_ms.max(10))
    }

    pub(crate) fn recording_dir(&self) -> PathBuf {
        self.recording_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
