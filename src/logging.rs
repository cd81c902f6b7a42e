//! Logging bootstrap.
//!
//! Everything in mixdown logs through `tracing`: control-plane entry
//! points and mixer ticks at `trace`, lifecycle transitions at `info`,
//! confined data-plane failures at `error`. Hosts that already install a
//! subscriber get those events wherever they route them; hosts without
//! one can call [`init`] for a sensible default.

/// Install a console subscriber tuned for mixdown's log volume.
///
/// `tick` and the control calls each emit one `trace` event per
/// invocation, so at a 60 Hz host loop a blanket `trace` default would
/// drown everything else. The fallback filter is therefore
/// `mixdown=info`; raise individual targets through `MIXDOWN_LOG` when
/// chasing a problem, e.g.
/// `MIXDOWN_LOG=mixdown::service=trace,mixdown::voice=debug`.
#[cfg(feature = "logging")]
pub fn init() {
    init_with_default("mixdown=info");
}

/// Like [`init`], with a caller-chosen fallback filter for when
/// `MIXDOWN_LOG` is unset or unparsable.
#[cfg(feature = "logging")]
pub fn init_with_default(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("MIXDOWN_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Targets matter more than timestamps here: mixdown::voice vs
    // mixdown::service tells you which side of the data plane failed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init();
}

/// No-op stand-in when the `logging` feature is disabled, so hosts can
/// call the bootstrap unconditionally without pulling in
/// `tracing-subscriber`.
#[cfg(not(feature = "logging"))]
pub fn init() {}

/// No-op stand-in when the `logging` feature is disabled.
#[cfg(not(feature = "logging"))]
pub fn init_with_default(_default_filter: &str) {}
