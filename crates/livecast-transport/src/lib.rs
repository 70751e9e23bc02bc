//! Ingest uplink for live broadcasting.
//!
//! Media, control and chat frames share one TCP connection to the ingest
//! server. Outgoing frames wait in a prioritized [`SendBuffer`]; an
//! [`UplinkMonitor`] turns its counters into health and congestion samples
//! for the adaptation loop. [`LinkTester`] runs a one-shot bandwidth probe
//! before a broadcast.

mod connection;
mod error;
mod frame;
mod health;
mod ingest;
mod linktest;
mod loopback;
mod nal;
mod send_buffer;
mod uplink;

pub use connection::ConnectionState;
pub use error::TransportError;
pub use frame::{
    ChatPayload, ControlMessage, Frame, FrameKind, GoodbyePayload, HelloAck, LinktestEnd,
    LinktestReport, SessionHello, FLAG_KEYFRAME, PROTOCOL_VERSION,
};
pub use health::HealthEstimator;
pub use ingest::{InboundMessage, IngestClient, IngestConfig, TransportStatistics};
pub use linktest::{LinkTester, LinktestConfig, LinktestResult};
pub use loopback::{LoopbackOptions, LoopbackServer};
pub use nal::{
    annex_b_to_avcc, build_avc_decoder_config, decoder_config_from_headers, extract_sps_pps,
    filter_parameter_sets, nals_to_avcc, parse_annex_b, NalUnit, NalUnitType,
};
pub use send_buffer::{Lane, SendBuffer, SendBufferConfig};
pub use uplink::{UplinkMonitor, UplinkSample};

/// Channel capacity for inbound control, chat and talkback messages.
pub const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Largest accepted frame payload.
pub const MAX_FRAME_PAYLOAD: usize = 4 * 1024 * 1024;

/// Default port of the ingest and link-test endpoints.
pub const DEFAULT_INGEST_PORT: u16 = 7070;

/// Number of measurement windows averaged into the health score.
pub const HEALTH_WINDOWS: usize = 5;
