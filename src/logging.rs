use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber filtered through `RUST_LOG`.
///
/// Without `RUST_LOG`, only `info` and above is printed. Set e.g.
/// `RUST_LOG=harbor_reconcile=debug` to see the apply plan and every
/// requeue. Fails when a global subscriber is already installed.
pub fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|error| anyhow::anyhow!("cannot install the logging subscriber: {error}"))
}
