use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};

use assetd::config::ServerConfig;
use assetd::inventory::InventoryManager;
use assetd::observability;
use assetd::wire;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env()?;
    observability::init(config.metrics_port)?;
    let tls = config.tls_acceptor()?;
    std::fs::create_dir_all(&config.data_dir)?;

    let inventories = Arc::new(InventoryManager::new(
        config.data_dir.clone(),
        config.inventory_settings(),
    ));
    let connections = Arc::new(Semaphore::new(config.max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(
        "assetd listening on {addr} (data_dir {}, max_connections {}, overdue after {}ms, tls {})",
        config.data_dir.display(),
        config.max_connections,
        config.overdue_after_ms,
        if tls.is_some() { "on" } else { "off" },
    );
    if let Some(port) = config.metrics_port {
        info!("metrics at http://0.0.0.0:{port}/metrics");
    }

    let shutdown = shutdown_signal()?;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    let Ok(permit) = connections.clone().try_acquire_owned() else {
                        warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        continue;
                    };
                    spawn_connection(socket, peer, permit, &inventories, &config, tls.clone());
                }
                Err(e) => error!("accept error: {e}"),
            },
            _ = &mut shutdown => {
                info!("shutdown signal received, no longer accepting");
                break;
            }
        }
    }

    drain_connections(&connections, &config).await;
    info!("assetd stopped");
    Ok(())
}

fn spawn_connection(
    socket: TcpStream,
    peer: SocketAddr,
    permit: OwnedSemaphorePermit,
    inventories: &Arc<InventoryManager>,
    config: &ServerConfig,
    tls: Option<TlsAcceptor>,
) {
    info!("connection from {peer}");
    metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
    metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
    let inventories = inventories.clone();
    let password = config.password.clone();

    tokio::spawn(async move {
        if let Err(e) = wire::process_connection(socket, inventories, password, tls).await {
            error!("connection error from {peer}: {e}");
        }
        metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
        drop(permit);
    });
}

/// Resolves on ctrl-c, or SIGTERM on unix.
fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    Ok(async move {
        #[cfg(unix)]
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        #[cfg(not(unix))]
        let _ = tokio::signal::ctrl_c().await;
    })
}

/// Wait for open connections to release their permits, up to the drain timeout.
async fn drain_connections(connections: &Semaphore, config: &ServerConfig) {
    let max = config.max_connections;
    let deadline = tokio::time::Instant::now() + config.drain_timeout;
    while connections.available_permits() < max {
        if tokio::time::Instant::now() >= deadline {
            let open = max - connections.available_permits();
            warn!("drain timeout, {open} connections still open");
            return;
        }
        tokio::time::sleep(config.drain_poll).await;
    }
    info!("all connections drained");
}
