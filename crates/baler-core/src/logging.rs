//! Subscriber setup helpers, available with the `logging` feature.
//!
//! baler-core follows the library pattern: it only emits `tracing`
//! events (entry registration, cache restores, chunk creation and
//! removal, seal progress), and an embedder normally installs its own
//! subscriber. For embedders without one, these helpers install a
//! compact subscriber scoped to the baler crates so a noisy host
//! application doesn't drown the compilation trace.

use std::sync::Once;

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INSTALL: Once = Once::new();

/// Filter directives covering the workspace's crates at one level.
fn baler_directives(level: Level) -> String {
    format!("baler_core={level},baler_hooks={level}")
}

/// Install a compact subscriber showing baler events at `level`.
///
/// Installation happens at most once per process; later calls (from
/// this function or [`init_from_env`]) are no-ops. Returns whether this
/// call performed the install, so an embedder can tell its own
/// subscriber won.
pub fn init(level: Level) -> bool {
    let mut installed = false;
    INSTALL.call_once(|| {
        tracing_subscriber::registry()
            .with(EnvFilter::new(baler_directives(level)))
            .with(
                fmt::layer().compact().with_target(true).without_time(), // Let consumers control timestamp format
            )
            .init();
        installed = true;
    });
    installed
}

/// Install a subscriber filtered by `RUST_LOG`.
///
/// Falls back to `baler_core=info` when the variable is unset or does
/// not parse. Same once-per-process semantics as [`init`].
pub fn init_from_env() -> bool {
    let mut installed = false;
    INSTALL.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(baler_directives(Level::INFO)));
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(true).without_time())
            .init();
        installed = true;
    });
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_cover_workspace_crates() {
        assert_eq!(
            baler_directives(Level::DEBUG),
            "baler_core=DEBUG,baler_hooks=DEBUG"
        );
        assert_eq!(
            baler_directives(Level::WARN),
            "baler_core=WARN,baler_hooks=WARN"
        );
    }

    #[test]
    fn test_install_happens_at_most_once() {
        // The very first call wins; everything after is a no-op,
        // whichever entry point it came through.
        let first = init(Level::DEBUG);
        assert!(first);
        assert!(!init(Level::INFO));
        assert!(!init_from_env());
    }
}
