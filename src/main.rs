//! Forge Agent - HTTP Server Entry Point
//!
//! Starts the HTTP server that exposes the agent protocol.

use forge_agent::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forge_agent=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        model = %config.default_model,
        workspace = %config.workspace_path.display(),
        "Loaded configuration"
    );

    api::serve(config).await?;

    Ok(())
}
