//! relayhub server
//!
//! Run with: cargo run --bin relayhub -- --config relayhub.toml
//!
//! Without `--config`, the default locations are searched
//! (`~/.config/relayhub/config.toml`, `/etc/relayhub/config.toml`,
//! `./relayhub.toml`). `RELAYHUB_*` environment variables override file
//! values; `RUST_LOG` overrides the configured log level.

use clap::Parser;
use relayhub::api::{serve, ApiConfig, AppState};
use relayhub::broker::{close_code, Broker, BrokerConfig};
use relayhub::config::{Config, LoggingConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "relayhub")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "WebSocket session broker")]
struct Args {
    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (mut config, source, skipped) = match &args.config {
        Some(path) => (Config::load_with_env(path)?, Some(path.clone()), Vec::new()),
        None => {
            let loaded = Config::load_default()?;
            (loaded.config, loaded.source, loaded.skipped)
        }
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config.logging);

    tracing::info!("Starting relayhub v{}", env!("CARGO_PKG_VERSION"));
    for (path, err) in &skipped {
        tracing::warn!("Failed to load config from {:?}: {}", path, err);
    }
    match &source {
        Some(path) => tracing::info!("Loaded config from {:?}", path),
        None => tracing::info!("Using default config with environment overrides"),
    }

    let broker_config = BrokerConfig::from(&config.session);
    tracing::info!(
        message_buffer_size = broker_config.message_buffer_size,
        ping_period = ?broker_config.ping_period,
        pong_wait = ?broker_config.pong_wait,
        "Session settings"
    );

    let broker = Arc::new(
        Broker::builder(broker_config)
            .on_connect(|session| {
                tracing::debug!(
                    app_id = %session.app_id(),
                    user_id = %session.user_id(),
                    params = ?session.params(),
                    "on_connect"
                );
            })
            .on_message(|session, payload| {
                tracing::debug!(
                    app_id = %session.app_id(),
                    user_id = %session.user_id(),
                    bytes = payload.len(),
                    "Message received"
                );
            })
            .on_error(|session, err| {
                tracing::warn!(
                    app_id = %session.app_id(),
                    user_id = %session.user_id(),
                    session_id = %session.id(),
                    error = %err,
                    "Session error"
                );
            })
            .on_close(|session, code, reason| {
                tracing::debug!(
                    session_id = %session.id(),
                    code,
                    code_name = close_code::describe(code),
                    reason,
                    "Peer closed"
                );
            })
            .build(),
    );

    let api_config = ApiConfig::from(&config.server);
    let state = AppState::new(Arc::clone(&broker), api_config.clone());

    let result = serve(state, &api_config).await;

    // Close every session whether or not the server exited cleanly
    broker.shutdown().await;
    result?;

    tracing::info!("relayhub shutdown complete");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("relayhub={},tower_http=info", logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
