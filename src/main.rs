use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use riskfin::app;
use riskfin::config::Config;
use riskfin::observability::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration
    let config = Config::parse();

    // Initialize tracing
    init_tracing(&config.log_level, config.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting riskfin decision finalizer"
    );

    let cancel = CancellationToken::new();
    let signalled = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signalled.cancel();
    });

    let grace = config.shutdown_grace();
    app::run(config, cancel.clone()).await?;

    // In-flight handlers get a short window, then the process exits.
    cancel.cancel();
    info!(grace_ms = grace.as_millis() as u64, "Shutting down...");
    tokio::time::sleep(grace).await;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
