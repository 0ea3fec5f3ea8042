use anyhow::{anyhow, Context};
use rollershutter_arduino_lib::config::AdapterConfig;
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "ROLLERSHUTTER_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .ok_or_else(|| anyhow!("usage: rollershutter-arduino <config.json> (or set {})", CONFIG_ENV))?;

    let config = AdapterConfig::load(&path).with_context(|| format!("Failed to load configuration from {}", path))?;
    log::info!("Loaded configuration from {}", path);

    rollershutter_arduino_lib::run(config).await
}
