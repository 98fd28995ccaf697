use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use depot_core::{CacheEngine, ProxyConfig};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "depot",
    version,
    about = "Local caching proxy for PyPI, npm and Maven registries"
)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "DEPOT_LISTEN", default_value = "0.0.0.0:8000")]
    listen: SocketAddr,

    /// Cache root (overrides NEXUS_CACHE_DIR)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let mut config = ProxyConfig::from_env();
    if let Some(dir) = cli.cache_dir {
        config = config.with_cache_dir(dir);
    }

    let engine = CacheEngine::new(config).context("failed to initialise cache")?;
    let config = engine.config();
    info!(
        cache_dir = %engine.root().path().display(),
        pypi = %config.pypi_url,
        pypi_files = %config.pypi_files_url,
        npm = %config.npm_url,
        maven = %config.maven_url,
        "cache engine ready"
    );

    let listener = TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("failed to bind {}", cli.listen))?;
    info!(addr = %cli.listen, "depot listening");

    axum::serve(listener, depot_server::router(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}
