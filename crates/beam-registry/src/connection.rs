use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use beam_types::events::RegistryCommand;

use crate::registry::{ConnectionHandle, Registry};

/// Longest identifier accepted in a `register` command.
pub const MAX_IDENTIFIER_LEN: usize = 256;

/// Drive one registry WebSocket until either side goes away.
///
/// The server sends a Ping every `heartbeat`; after 2 consecutive missed
/// Pongs the connection is dropped. Whatever ends the connection, its
/// records are deregistered before returning.
pub async fn handle_connection(socket: WebSocket, registry: Registry, heartbeat: Duration) {
    let (mut sender, mut receiver) = socket.split();
    let (handle, mut events_rx) = ConnectionHandle::new();
    let conn_id = handle.id();

    info!("{} connected to registry", conn_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward registry events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("{} failed to encode event: {}", conn_id, e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("{} heartbeat timeout (missed {} pongs), dropping connection", conn_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_registry = registry.clone();
    let recv_handle = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<RegistryCommand>(&text) {
                    Ok(cmd) => handle_command(&recv_registry, &recv_handle, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            conn_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Binary(data) => {
                    warn!("{} sent unexpected binary frame ({} bytes)", conn_id, data.len());
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.deregister(&handle).await;
    info!("{} disconnected from registry", conn_id);
}

async fn handle_command(registry: &Registry, handle: &ConnectionHandle, cmd: RegistryCommand) {
    match cmd {
        RegistryCommand::Register { identifier } => {
            if identifier.is_empty() || identifier.len() > MAX_IDENTIFIER_LEN {
                warn!(
                    "{} tried to register invalid identifier ({} bytes)",
                    handle.id(),
                    identifier.len()
                );
                return;
            }
            info!("{} registered as {}", handle.id(), identifier);
            registry.register(identifier, handle.clone()).await;
        }

        RegistryCommand::Query => {
            if !registry.send_snapshot(handle).await {
                warn!("{} went away before query reply", handle.id());
            }
        }
    }
}
