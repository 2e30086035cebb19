use clap::Parser;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feedlens::{serve, spawn_purge_task, AppConfig, AppServices};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "feedlens")]
#[command(about = "Feed reader API with article summaries, key points and sentiment")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[arg(short, long, env = "FEEDLENS_PORT", default_value = "5050")]
    port: u16,

    #[arg(long, env = "FEEDLENS_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Default tracing level when RUST_LOG is unset
    #[arg(long, env = "FEEDLENS_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("feedlens={},tower_http=info", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(message) = run(args).await {
        error!("{message}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), String> {
    let config = AppConfig::from_env().map_err(|e| format!("invalid configuration: {e}"))?;
    let services = AppServices::from_config(&config).map_err(|e| format!("startup failed: {e}"))?;

    let purge_task = spawn_purge_task(services.clone(), PURGE_INTERVAL);

    let bind_addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| format!("failed to bind to {bind_addr}: {e}"))?;

    info!(ai_available = services.ai_available(), "feedlens listening on http://{bind_addr}");
    info!("   curl http://{}/api/feeds", bind_addr);

    let result = serve(listener, services, shutdown_signal())
        .await
        .map_err(|e| format!("server error: {e}"));
    purge_task.abort();
    info!("server stopped");
    result
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
