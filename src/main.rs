use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use skyreply_backend::config::BotConfig;
use skyreply_backend::runtime::BackendRuntime;

fn main() -> Result<()> {
    // A missing .env is fine; the variables may come from the environment.
    let dotenv_path = dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,skyreply=debug,skyreply_backend=debug")),
        )
        .init();

    if let Some(path) = dotenv_path {
        tracing::debug!("Loaded environment from {:?}", path);
    }

    let config = BotConfig::load();
    tracing::info!("Skyreply starting as {}", config.handle);

    let rt = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    rt.block_on(run(config))
}

async fn run(config: BotConfig) -> Result<()> {
    let runtime = BackendRuntime::bootstrap(config)
        .await
        .context("failed to bootstrap reply bot")?;

    runtime.run_until(tokio::signal::ctrl_c()).await
}
