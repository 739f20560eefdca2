//! Tracing setup.
//!
//! Logging starts at `info` so configuration loading is visible, then switches
//! to the configured `[logging] level`. A valid `RUST_LOG` overrides both.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

pub fn init_tracing() {
    let directives = filter_directives("info", rust_log().as_deref());
    let (filter, handle) = reload::Layer::new(EnvFilter::new(directives));
    let _ = FILTER_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// Switch to the configured level unless `RUST_LOG` is in charge.
/// No-op before [`init_tracing`].
pub fn apply_logging_level(level: &str) {
    let Some(handle) = FILTER_HANDLE.get() else {
        return;
    };
    let directives = filter_directives(level, rust_log().as_deref());
    if let Err(e) = handle.modify(|f| *f = EnvFilter::new(&directives)) {
        tracing::warn!(error = %e, level, "failed to apply logging level");
    }
}

fn rust_log() -> Option<String> {
    std::env::var(EnvFilter::DEFAULT_ENV).ok()
}

/// `RUST_LOG` when it is non-empty and parses, otherwise `configured`.
fn filter_directives(configured: &str, rust_log: Option<&str>) -> String {
    match rust_log {
        Some(directives)
            if !directives.trim().is_empty() && EnvFilter::try_new(directives).is_ok() =>
        {
            directives.to_string()
        }
        _ => configured.to_string(),
    }
}
