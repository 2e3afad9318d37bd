//! Logging setup and configuration

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter applied when `RUST_LOG` is unset and the embedder has no opinion:
/// service and protocol crates at info, everything else quiet
pub const DEFAULT_LOG_FILTER: &str = "bulkusb=info,common=info,protocol=info";

/// Setup tracing subscriber for the embedding process
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies. Call once
/// before starting the worker thread so its startup lines are captured.
///
/// ```no_run
/// common::setup_logging(common::logging::DEFAULT_LOG_FILTER).unwrap();
/// ```
pub fn setup_logging(default_filter: &str) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    Ok(())
}
