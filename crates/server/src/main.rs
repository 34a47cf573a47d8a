use anyhow::Context as _;
use clap::Parser as _;
use tracing_subscriber::EnvFilter;

use repost_server::app::{self, Factories};
use repost_server::cli::Config;
use repost_server::routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tokio::fs::create_dir_all(&cfg.cache_path)
        .await
        .with_context(|| format!("create cache directory {}", cfg.cache_path.display()))?;

    let factories = Factories::from_config(&cfg);
    let app = app::start(&cfg, factories).await?;
    let router = routes::app(app.state.clone());

    let listener = tokio::net::TcpListener::bind(cfg.bind)
        .await
        .with_context(|| format!("bind {}", cfg.bind))?;
    tracing::info!(addr = %cfg.bind, "repostd listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve http")?;

    app.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested");
}
