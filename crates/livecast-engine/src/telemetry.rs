//! Logging setup for hosts embedding the engine.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_DIRECTIVES: &str = "info,livecast_engine=debug,livecast_capture=info,\
livecast_audio=info,livecast_encoder=info,livecast_transport=info";

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` wins over `directives`; `None` falls back to
/// [`DEFAULT_DIRECTIVES`]. Returns false if a subscriber was already set.
pub fn init_logging(directives: Option<&str>) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives.unwrap_or(DEFAULT_DIRECTIVES)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
