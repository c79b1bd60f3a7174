//! Dev/demo tracing setup, gated behind the `cli` feature.
//!
//! Grounded in `effect_system.rs`'s `effect.command`/`effect.subscription`
//! span convention: this crate's `model`/`reaction` modules already emit
//! spans via `#[tracing::instrument]`, so the only thing left to supply is
//! a subscriber. Real embedders wire their own; this helper exists for the
//! CLI demo and for anyone reaching for a one-line default in examples or
//! tests.

/// Install a `tracing-subscriber` `fmt` layer reading `RUST_LOG` (or
/// `info` if unset). Intended for binaries and demos, not library code —
/// a host embedding [`crate::ModelCoordinator`] in a larger application is
/// expected to own its own subscriber.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
