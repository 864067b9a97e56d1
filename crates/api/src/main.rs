//! SafeTrail - Main Entry Point

use anyhow::Context;
use api::config::CONFIG_PATH_ENV;
use api::{init_logging, run_server, AppConfig};
use tracing::info;

/// `--config <path>` wins over `SAFETRAIL_CONFIG`
fn config_path() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    std::env::var(CONFIG_PATH_ENV).ok()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = config_path();
    let config = AppConfig::load(path.as_deref()).context("failed to load configuration")?;
    init_logging(&config.logging)?;

    info!("=== SafeTrail v{} ===", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &path {
        info!("Configuration loaded from {}", path);
    }

    run_server(config).await
}
