//! Tracing integration for structured logging.
//!
//! The CLI's `--debug` and `--trace` flags map onto tracing levels; trace
//! level carries the per-tick seq/ack telemetry of the channel loop.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::Result;

/// Initialize the logging system.
///
/// Levels: default `warn`, `--debug` raises to `debug`, `--trace` to `trace`.
/// `RUST_LOG` overrides the computed filter.
pub fn init_logging(debug: bool, trace: bool) -> Result<()> {
    let level = if trace {
        "trace"
    } else if debug {
        "debug"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "cliptun={level},cliptun_core={level},cliptun_cli={level}"
        ))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(trace),
        )
        .try_init()
        .map_err(|e| crate::Error::Io(std::io::Error::other(e.to_string())))?;

    Ok(())
}

/// Initialize logging with defaults for testing.
///
/// Silently ignores errors (logging may already be initialized).
pub fn init_test_logging() {
    let _ = init_logging(true, false);
}
