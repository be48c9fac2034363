use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chordkv::config::Config;
use chordkv::node::{Maintenance, Node};
use chordkv::transport::{self, HttpTransport, Transport};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

/// How long in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.logfile.as_deref())?;

    let addr = config.advertised_addr();
    info!("starting node at {addr}");

    let node = Arc::new(Node::new(&addr));
    let transport = Arc::new(HttpTransport::new()?);
    let app = transport::router(node.clone(), transport.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance = Maintenance::new(node.clone(), transport.clone() as Arc<dyn Transport>);
    tokio::spawn(maintenance.run(shutdown_rx));

    info!("listening on {addr}");

    let mut drain = shutdown_tx.subscribe();
    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                info!("shutdown signal received, draining connections");
                let _ = shutdown_tx.send(true);
            })
            .await
    };

    tokio::select! {
        result = server => result.context("server error")?,
        _ = async {
            // Bound the drain window; a stuck handler must not block exit.
            let _ = drain.changed().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => warn!("drain window elapsed, aborting remaining connections"),
    }

    info!("server exited cleanly");
    Ok(())
}

fn init_tracing(logfile: Option<&Path>) -> Result<()> {
    match logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .init();
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install ctrl-c handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
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
}
