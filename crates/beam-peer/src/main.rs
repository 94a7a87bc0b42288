mod cli;
mod registry_client;
mod storage;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use beam_transfer::{
    CHUNK_SIZE, OutgoingFile, SessionConfig, TcpAcceptor, TcpConnector, TracingObserver,
    TransferObserver, receive_over, send_to_many,
};

use crate::cli::{Cli, Command};
use crate::registry_client::{PresenceChange, PresenceView, RegistryClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beam=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Peers => list_peers(&cli.server).await,
        Command::Send {
            file,
            targets,
            chunk_size,
            timeout,
        } => send(&cli.server, &file, &targets, session_config(chunk_size, timeout)).await,
        Command::Receive {
            listen,
            name,
            out,
            once,
        } => receive(&cli.server, &listen, name, &out, once).await,
    }
}

fn session_config(chunk_size: Option<usize>, timeout_secs: u64) -> SessionConfig {
    SessionConfig {
        chunk_size: chunk_size.unwrap_or(CHUNK_SIZE),
        handshake_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
    }
}

async fn list_peers(server: &str) -> anyhow::Result<()> {
    let mut registry = RegistryClient::connect(server).await?;
    registry.query().await?;
    let peers = registry
        .next_update()
        .await?
        .context("registry closed before answering")?;
    registry.close().await;

    if peers.is_empty() {
        println!("no peers online");
    }
    for peer in peers {
        println!("{}", peer);
    }
    Ok(())
}

async fn send(
    server: &str,
    path: &Path,
    targets: &[String],
    config: SessionConfig,
) -> anyhow::Result<()> {
    let file = OutgoingFile::from_path(path)
        .await
        .with_context(|| format!("cannot send {}", path.display()))?;

    // Presence is advisory: an unlisted target is still attempted.
    match online_peers(server).await {
        Ok(online) => {
            for target in targets.iter().filter(|t| !online.contains(*t)) {
                warn!("{} is not registered, trying anyway", target);
            }
        }
        Err(e) => warn!("could not check presence: {:#}", e),
    }

    info!(
        "sending {} ({} bytes) to {} peer(s)",
        file.metadata.file_name,
        file.metadata.total_size,
        targets.len()
    );
    let results = send_to_many(
        Arc::new(TcpConnector),
        targets,
        file,
        config,
        Arc::new(TracingObserver),
    )
    .await;

    let mut failed = 0;
    for (target, result) in &results {
        match result {
            Ok(report) => println!("{}: sent {} bytes", target, report.bytes_sent),
            Err(e) => {
                failed += 1;
                eprintln!("{}: {}", target, e);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{} of {} transfers failed", failed, results.len());
    }
    Ok(())
}

async fn online_peers(server: &str) -> anyhow::Result<Vec<String>> {
    let mut registry = RegistryClient::connect(server).await?;
    registry.query().await?;
    let peers = registry.next_update().await?.unwrap_or_default();
    registry.close().await;
    Ok(peers)
}

/// Identifier to register when none was given: the listen address, with an
/// unspecified host replaced by loopback.
fn default_identifier(local: SocketAddr) -> String {
    if local.ip().is_unspecified() {
        warn!(
            "listening on {}; registering loopback only, pass --name to be reachable",
            local
        );
        SocketAddr::from((Ipv4Addr::LOCALHOST, local.port())).to_string()
    } else {
        local.to_string()
    }
}

async fn receive(
    server: &str,
    listen: &str,
    name: Option<String>,
    out: &Path,
    once: bool,
) -> anyhow::Result<()> {
    let acceptor = TcpAcceptor::bind(listen)
        .await
        .with_context(|| format!("cannot listen on {}", listen))?;
    let local = acceptor.local_addr()?;
    let identifier = name.unwrap_or_else(|| default_identifier(local));

    let mut registry = RegistryClient::connect(server).await?;
    registry.register(&identifier).await?;
    info!("registered as {}, saving into {}", identifier, out.display());

    let mut view = PresenceView::excluding(identifier.clone());
    let config = SessionConfig::default();
    let observer: Arc<dyn TransferObserver> = Arc::new(TracingObserver);
    let (saved_tx, mut saved_rx) = mpsc::unbounded_channel::<PathBuf>();

    loop {
        tokio::select! {
            update = registry.next_update() => match update? {
                Some(peers) => {
                    for change in view.apply(peers) {
                        match change {
                            PresenceChange::Joined(peer) => info!("peer joined: {}", peer),
                            PresenceChange::Left(peer) => info!("peer left: {}", peer),
                        }
                    }
                }
                None => {
                    warn!("registry closed the connection");
                    break;
                }
            },

            accepted = acceptor.accept() => match accepted {
                Ok(channel) => {
                    let config = config.clone();
                    let observer = observer.clone();
                    let out = out.to_path_buf();
                    let saved_tx = saved_tx.clone();
                    tokio::spawn(async move {
                        let peer = channel.peer_addr().to_string();
                        // Failures are reported through the observer.
                        let Ok(transfer) =
                            receive_over(channel, &peer, &config, observer.as_ref()).await
                        else {
                            return;
                        };
                        match storage::save(&out, &transfer).await {
                            Ok(path) => {
                                info!("saved {} from {}", path.display(), peer);
                                if once {
                                    let _ = saved_tx.send(path);
                                }
                            }
                            Err(e) => warn!(
                                "failed to save {} from {}: {}",
                                transfer.metadata.file_name, peer, e
                            ),
                        }
                    });
                }
                Err(e) => warn!("failed to accept transfer: {}", e),
            },

            Some(path) = saved_rx.recv() => {
                println!("{}", path.display());
                break;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    registry.close().await;
    Ok(())
}
