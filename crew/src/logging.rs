//! Development-time tracing for debugging crew runs.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Diagnostics via `RUST_LOG`, output to stderr.
//!   Never mixed into the final answer printed on stdout.
//!
//! - **Run transcripts (`io/transcript`)**: Product artifacts under the
//!   configured transcript directory. Unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "warn,crew=info" } else { "warn" }
}

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset, or `crew=info`
/// with `--verbose`.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=crew=debug cargo run -- run --inquiry "..."
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_raises_crew_level() {
        assert_eq!(default_directive(false), "warn");
        assert!(default_directive(true).contains("crew=info"));
        assert!(EnvFilter::try_new(default_directive(true)).is_ok());
    }
}
