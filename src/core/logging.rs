//! Diagnostic tracing for the vault.
//!
//! Library code only emits `tracing` events; the binary decides where they go.
//! Output is stderr, compact format, filtered by `RUST_LOG` when set.
//!
//! ```bash
//! RUST_LOG=taskvault=debug taskvault verify
//! ```

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber. `fallback` is used when `RUST_LOG` is
/// unset or unparsable. Calling this twice is a no-op.
pub fn init(fallback: &str) {
    let filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| EnvFilter::try_new(fallback).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
