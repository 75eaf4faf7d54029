//! Logging init (SPEC_FULL.md §9.1), matching the teacher's
//! `tracing` + `tracing-subscriber` stack. Installed once, idempotently, so
//! both the CLI binary and `#[tokio::test]`s can call it freely.

use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Installs a global `tracing` subscriber reading `RUST_LOG`/`DEBUG`-style
/// filters from the environment. Safe to call multiple times; only the
/// first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
