//! Development-time tracing for debugging the toolkit.
//!
//! Tracing is separate from the build log: compiler and installer output plus
//! stage separators go to an [`OutputSink`](crate::io::sink::OutputSink) and
//! are unaffected by `RUST_LOG`. Tracing goes to stderr only.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Directive used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "warn,nuitka_toolkit=debug" } else { "warn" }
}

/// Initialize tracing subscriber for development logging.
///
/// `RUST_LOG` wins over `verbose` when set. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=nuitka_toolkit::pipeline=debug nuitka-toolkit build
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .compact(),
        )
        .init();
}
