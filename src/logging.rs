// Tracing setup
use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr; stdout carries the report.
pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .map_err(|e| anyhow::anyhow!("invalid log level '{level}': {e}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::Error::msg(e.to_string()))?;
    Ok(())
}
