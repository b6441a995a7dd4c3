//! Tracing initialization.
//!
//! Centralizes tracing config so both binaries behave the same.

use crate::ColorWhen;
use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize tracing subscriber.
///
/// - Respects `RUST_LOG` via `EnvFilter`; `default_level` applies when
///   the environment does not set one.
/// - ANSI color controlled by `ColorWhen`.
pub fn init_tracing(color: ColorWhen, default_level: &str) -> Result<()> {
    // ---
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(env_filter)
        .with_ansi(color.should_color_stderr())
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
