//! Logging system setup.
//!
//! `RUST_LOG` takes precedence over the level given on the command line.
//! Thread names are always included since startup work hops between the
//! main thread and the named worker threads.

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global tracing subscriber.
///
/// # Arguments
///
/// * `level` - Filter directive used when `RUST_LOG` is unset, e.g. `"info"`
///   or `"realm_bootstrap=debug"`
/// * `json_format` - Emit one JSON object per line instead of plain text
///
/// # Returns
///
/// `Ok(())` once the subscriber is installed.
///
/// # Errors
///
/// * The filter directive cannot be parsed
/// * A global subscriber is already installed
///
/// # Examples
///
/// ```rust,ignore
/// use crate::logging::setup_logging;
///
/// setup_logging("info", false)?;
/// tracing::info!("logging ready");
/// ```
pub fn setup_logging(level: &str, json_format: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_thread_names(true),
            )
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(false).with_thread_names(true))
            .try_init()?;
    }

    Ok(())
}
