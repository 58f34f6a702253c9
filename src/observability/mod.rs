//! Observability setup.
//!
//! The library itself only emits `tracing` events and `metrics` facade
//! calls; wiring a subscriber is the binary's job through [`init`]. No
//! exporter is attached to the metrics facade here — embedders install
//! their own recorder if they want one.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line text.
    #[default]
    Text,
    /// One JSON object per line, for log shippers.
    Json,
}

/// Initializes the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from `verbose`
/// (`debug` for the crate vs `info`). Safe to call more than once: a
/// second initialization is a no-op, which keeps tests that share a
/// process from panicking.
pub fn init(format: LogFormat, verbose: bool) {
    let default_filter = if verbose {
        "andamento=debug,info"
    } else {
        "andamento=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let result = match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already initialized");
    }
}
