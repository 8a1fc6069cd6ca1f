use claude_bridge::config::config_search_paths;
use claude_bridge::{build_router, AppState, BridgeConfig, SharedLogger};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "claude-bridge",
    about = "Serve the Messages API on top of any Chat-Completions backend",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Backend base URL, including the version segment (overrides config)
    #[arg(long)]
    backend_url: Option<String>,

    /// Log file path
    #[arg(long, default_value = "claude-bridge.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claude_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = BridgeConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.listen.port = port;
    }
    if let Some(host) = cli.host {
        config.listen.host = host;
    }
    if let Some(url) = cli.backend_url {
        config.backend.base_url = url;
    }

    config.validate()?;

    let logger = SharedLogger::new(&cli.log_file)?;

    info!("claude-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("  Backend:   {}", config.backend.base_url);
    info!("  Listen:    {}", config.listen_addr());
    info!(
        "  Timeouts:  request={}s connect={}s",
        config.timeouts.request_secs, config.timeouts.connect_secs
    );
    info!(
        "  Retry:     {} attempts, {}ms base, {}ms cap",
        config.retry.max_attempts, config.retry.base_delay_ms, config.retry.max_delay_ms
    );
    info!("  Aliases:   {} configured", config.models.len());
    info!("  Log file:  {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting claude-bridge backend={} listen={}",
            config.backend.base_url,
            config.listen_addr()
        ),
    );

    let bind_addr = config.listen_addr();
    let state = Arc::new(AppState::new(config, logger.clone())?);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    logger.info("shutdown", "Server stopped");
    logger.compact()?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received, draining connections");
    }
}
