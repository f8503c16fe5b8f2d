//! Tracing initialization.
//!
//! Both binaries log through one subscriber setup so their output lines
//! up when run side by side.

use crate::ColorWhen;
use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset; the metrics server's HTTP stack
/// is kept quiet
pub const DEFAULT_FILTER: &str = "info,hyper=warn";

/// Initialize tracing subscriber.
///
/// - Respects `RUST_LOG` via `EnvFilter`, falling back to [`DEFAULT_FILTER`].
/// - ANSI color controlled by `ColorWhen`.
/// - Logs go to stderr so stdout stays free for piped PCM.
pub fn init_tracing(color: ColorWhen) -> Result<()> {
    // ---
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(color.for_logs())
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    Ok(())
}
