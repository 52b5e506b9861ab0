use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use repairdesk::config::ServerConfig;
use repairdesk::engine::{Engine, EngineOptions};
use repairdesk::fixtures::Fixtures;
use repairdesk::notify::NotifyHub;
use repairdesk::time::SystemClock;
use repairdesk::{compactor, mcp, observability, tls, wire};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries MCP frames when the stdio server is enabled.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let config = ServerConfig::from_env()?;
    observability::init(config.metrics_port)?;

    let tls_acceptor = match &config.tls {
        Some(files) => Some(tls::load_tls_acceptor(files)?),
        None => None,
    };

    let fixtures = match &config.data_dir {
        Some(dir) => Fixtures::load(dir)?,
        None => {
            warn!("no fixture directory found, starting empty");
            Fixtures::default()
        }
    };
    if let Some(parent) = config.wal_path.as_deref().and_then(|p| p.parent()) {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let options = EngineOptions {
        wal_path: config.wal_path.clone(),
        rng_seed: config.seed,
        clock: Arc::new(SystemClock),
    };
    let engine = Arc::new(Engine::new(fixtures, options, Arc::new(NotifyHub::new()))?);

    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        compactor::run_compactor(compactor_engine, threshold).await;
    });

    if config.mcp_stdio {
        let mcp_engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = mcp::serve(mcp_engine, tokio::io::stdin(), tokio::io::stdout()).await {
                tracing::error!("mcp server error: {e}");
            }
        });
    }

    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("repairdesk listening on {addr}");
    info!(
        "  data_dir: {}",
        config
            .data_dir
            .as_ref()
            .map_or("none".to_string(), |d| d.display().to_string())
    );
    info!(
        "  wal: {}",
        config
            .wal_path
            .as_ref()
            .map_or("disabled".to_string(), |p| p.display().to_string())
    );
    info!("  max_connections: {max_connections}");
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!("  mcp stdio: {}", if config.mcp_stdio { "enabled" } else { "disabled" });
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    #[cfg(unix)]
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async move {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                let password = config.password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, engine, password, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    if let Err(e) = engine.compact_wal().await {
        warn!("final WAL compaction failed: {e}");
    }
    info!("repairdesk stopped");
    Ok(())
}
