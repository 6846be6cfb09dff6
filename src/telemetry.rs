//! Tracing setup for the binary.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Initialize the global subscriber: compact stderr output filtered by
/// `RUST_LOG`, or by verbosity when `RUST_LOG` is unset.
///
/// Safe to call once; a second call is a no-op (useful in tests).
pub fn init(verbose: u8) {
    let default_filter = match verbose {
        0 => "chorus=info",
        1 => "chorus=debug",
        _ => "chorus=trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = Registry::default()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .try_init();
}
