//! herald - 単一セッションを共有する HTTP サービス
//!
//! 起動の流れ:
//! 1. `.env` を読み込み、tracing を初期化
//! 2. `CONFIG_NAME` の YAML を読み、未設定値を環境変数から補完
//! 3. ScraperQueue を 1 つだけ作って start し、axum の State で共有
//! 4. Ctrl-C で HTTP を止めてから queue を stop

mod config;
mod observability;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use herald_core::ScraperQueueBuilder;
use herald_core::impls::InMemorySession;
use tracing::{Instrument, info, info_span, warn};

use crate::config::{AppConfig, EnvSecrets};
use crate::observability::{LogFormat, init_tracing};

#[derive(Debug, Parser)]
#[command(name = "herald", about = "Serialize API calls onto one messaging-platform session")]
struct Cli {
    /// Directory holding the YAML configuration files.
    #[arg(long, env = "HERALD_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// File name inside the config directory; must end with `.yaml`.
    #[arg(long, env = "CONFIG_NAME")]
    config_name: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ignore error: .env is optional
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(LogFormat::from_env());

    let span = info_span!("app", service = "herald");
    run(cli).instrument(span).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let path = config::config_path(&cli.config_dir, cli.config_name.as_deref())?;
    let mut config = AppConfig::load(&path)?;
    config
        .fill_secrets(&EnvSecrets)
        .context("failed to load secrets")?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(project_id) = &config.gcp.project_id {
        info!(project_id = project_id.as_str(), "gcp project configured");
    }

    let session = match &config.scraper.fixture_path {
        Some(fixture) => InMemorySession::load(fixture)
            .with_context(|| format!("failed to load fixture {}", fixture.display()))?,
        None => {
            warn!("scraper.fixture_path not set, serving an empty platform");
            InMemorySession::new()
        }
    };
    info!(session_name = %config.scraper.session_name, "platform session configured");

    let queue = Arc::new(
        ScraperQueueBuilder::new()
            .policy(config.queue.policy())
            .try_build(session)?,
    );
    queue.start().await?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, routes::router(Arc::clone(&queue)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    queue.stop().await;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
