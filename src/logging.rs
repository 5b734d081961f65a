use anyhow::Context as _;
use tracing_subscriber::EnvFilter;

/// HTTP plumbing stays quiet unless asked for explicitly via `RUST_LOG`.
const DEFAULT_FILTER: &str = "info,hyper_util=warn,reqwest=warn";

pub fn init() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("build log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;

    Ok(())
}
