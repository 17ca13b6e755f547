//! Tracing initialisation for the `modfleet` binary.
//!
//! Call [`init_tracing`] once at program start. Log lines go to stderr so
//! that names-only output on stdout stays machine readable. Later calls are
//! ignored; the global subscriber can only be set once per process.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::domain::options::Verbosity;

/// Directive used when `RUST_LOG` is unset.
pub fn default_directive(verbosity: Verbosity) -> String {
    match verbosity.tracing_level() {
        Some(level) => level.as_str().to_ascii_lowercase(),
        None => "off".to_string(),
    }
}

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON log lines.
/// * `verbosity`: default filter when `RUST_LOG` is not set.
pub fn init_tracing(json: bool, verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
