use anyhow::Context;
use quizpulse_relay::config::{LogFormat, RelayConfig};
use quizpulse_relay::{serve, AppState};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();
    init_tracing(&config);

    if config.is_dev_jwt_secret() {
        warn!("QUIZPULSE_RELAY_JWT_SECRET is unset; using the development secret");
    }
    if config.issuer_key.is_none() {
        warn!("QUIZPULSE_RELAY_ISSUER_KEY is unset; anyone can mint sessions");
    }

    let listen_addr = config.listen_addr;
    let state = AppState::new(config)?;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {listen_addr}"))?;

    info!(listen_addr = %listen_addr, "starting relay server");
    serve(listener, state, shutdown_signal()).await
}

fn init_tracing(config: &RelayConfig) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
