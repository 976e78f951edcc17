// src/main.rs
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::info;

use rust_load_balancer::{
    cli::Cli,
    config::Config,
    health::HealthChecker,
    proxy::{Backend, BackendPool, ReverseProxy},
    server::{handler::RequestHandler, ServerBuilder},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rust_load_balancer=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;

    info!(
        backends = config.backends.len(),
        port = config.port,
        health_check_interval = ?config.health_check_interval,
        timeout = ?config.timeout,
        "starting load balancer"
    );

    let backends = config
        .backends
        .iter()
        .cloned()
        .map(|url| Arc::new(Backend::new(url)))
        .collect();
    let pool = Arc::new(BackendPool::new(backends));

    let health_checker = Arc::new(HealthChecker::new(
        pool.clone(),
        config.health_check_interval,
    ));
    tokio::spawn(health_checker.clone().run());

    let proxy = Arc::new(ReverseProxy::new(pool.clone(), config.timeout));
    let handler = RequestHandler::new(proxy, pool);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!("listening on {}", addr);

    tokio::select! {
        result = ServerBuilder::new(addr).with_handler(handler).serve() => {
            result?;
        }
        _ = shutdown_signal() => {
            health_checker.shutdown();
            info!("shutdown complete");
        }
    }

    Ok(())
}

/// Waits for Ctrl+C or SIGTERM so the process exits 0 on a clean shutdown
/// rather than being killed mid-request.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
