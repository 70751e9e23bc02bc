//! Connection state of the ingest client.

use serde::{Deserialize, Serialize};

/// Connection state of an [`IngestClient`](crate::IngestClient).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,

    /// TCP connect and handshake in progress.
    Connecting,

    /// Handshake done, streaming.
    Connected { broadcast_id: String },

    /// Connection failed or was lost. There is no automatic reconnect.
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Status message for display.
    pub fn message(&self) -> String {
        match self {
            Self::Disconnected => "Disconnected".to_string(),
            Self::Connecting => "Connecting...".to_string(),
            Self::Connected { broadcast_id } => format!("Connected ({broadcast_id})"),
            Self::Failed { reason } => format!("Failed: {reason}"),
        }
    }
}
