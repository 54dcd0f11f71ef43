//! Artemis gateway binary entry point.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use artemis_gateway::server::{create_app, AppConfig};
use artemis_gateway::{log_banner, log_success};

#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Artemis task execution gateway.
#[derive(Parser, Debug)]
#[command(name = "artemis-gateway", version, about)]
struct Args {
    /// Path to the base YAML config file. Falls back to `ARTEMIS_CONFIG`,
    /// then `config/config.yaml`.
    #[arg(long, env = "ARTEMIS_CONFIG")]
    config: Option<String>,

    /// Environment overlay name. Falls back to `ARTEMIS_ENV`.
    #[arg(long, env = "ARTEMIS_ENV")]
    env: Option<String>,

    /// Bind address override. Falls back to `server.host`/`server.port`
    /// from the loaded config.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    log_banner!("Artemis v1.0.0", "Starting task execution gateway");

    let args = Args::parse();

    let app_config = AppConfig {
        config_path: args.config,
        config_env: args.env,
        static_units: Vec::new(),
        known_constructors: HashMap::new(),
    };

    let (router, engine) = create_app(app_config)?;

    let addr = args.bind.unwrap_or_else(|| {
        let config = engine.config();
        let ip = config
            .server
            .host
            .parse()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0]));
        SocketAddr::new(ip, config.server.port)
    });
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log_success!("Artemis gateway listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("joining in-flight async workers before exit");
    engine.join_workers(Duration::from_secs(5)).await;

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
