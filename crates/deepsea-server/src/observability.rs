//! Tracing setup for the server binary.
//!
//! The filter sits behind a reload layer so the level from the configuration
//! file can replace the bootstrap level once the file has been read.

use std::sync::OnceLock;

use tracing_subscriber::filter::{Directive, ParseError};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// Dependencies that are chatty at debug level.
const QUIET_DIRECTIVES: &[&str] = &["hyper=info", "hyper_util=info", "tungstenite=info"];

/// Build a filter for `level`, keeping noisy dependencies at info.
pub fn filter_for(level: &str) -> Result<EnvFilter, ParseError> {
    let mut filter = EnvFilter::try_new(level)?;
    for directive in QUIET_DIRECTIVES {
        filter = filter.add_directive(directive.parse::<Directive>()?);
    }
    Ok(filter)
}

/// Install the global subscriber at info level, or `RUST_LOG` when set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| filter_for("info").ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let (filter, handle) = reload::Layer::new(filter);
    let _ = FILTER_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Switch to the configured level. `RUST_LOG` wins when set.
///
/// Returns whether the filter changed.
pub fn apply_logging_level(level: &str) -> bool {
    if std::env::var_os("RUST_LOG").is_some() {
        return false;
    }
    let Some(handle) = FILTER_HANDLE.get() else {
        return false;
    };
    match filter_for(level) {
        Ok(filter) => handle.reload(filter).is_ok(),
        Err(e) => {
            tracing::warn!(level, error = %e, "Ignoring invalid log level");
            false
        }
    }
}
