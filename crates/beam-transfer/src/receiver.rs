//! Receive driver: runs a [`ReceiverSession`] over a channel.
//!
//! ```text
//! Open -> send ready -> ready-ack -> metadata -> chunk ... chunk -> Complete
//! ```
//!
//! The handshake timeout covers everything up to metadata. Once chunks are
//! flowing the driver waits for as long as the channel stays up.

use tokio::time::Instant;
use tracing::debug;

use crate::channel::{ChannelEvent, PeerChannel};
use crate::config::SessionConfig;
use crate::error::{ChannelError, TransferError};
use crate::observer::TransferObserver;
use crate::protocol::ControlMessage;
use crate::session::{CompletedTransfer, Phase, ReceiverSession, ReceiverStep};

/// Receive one file over `channel`. `peer` labels the sender in reports.
/// The channel is closed before returning, whatever the outcome.
pub async fn receive_over<C: PeerChannel>(
    mut channel: C,
    peer: &str,
    config: &SessionConfig,
    observer: &dyn TransferObserver,
) -> Result<CompletedTransfer, TransferError> {
    let mut session = ReceiverSession::new(peer);
    let result = drive(&mut channel, &mut session, config, observer).await;
    channel.close().await;

    match &result {
        Ok(transfer) => observer.on_complete(peer, transfer),
        Err(e) => observer.on_error(peer, e),
    }
    result
}

fn in_handshake(phase: Phase) -> bool {
    matches!(
        phase,
        Phase::Idle | Phase::AwaitingReady | Phase::StreamingMetadata
    )
}

async fn drive<C: PeerChannel>(
    channel: &mut C,
    session: &mut ReceiverSession,
    config: &SessionConfig,
    observer: &dyn TransferObserver,
) -> Result<CompletedTransfer, TransferError> {
    let deadline = config
        .handshake_timeout
        .map(|timeout| (Instant::now() + timeout, timeout));

    loop {
        let event = match deadline {
            Some((at, timeout)) if in_handshake(session.phase()) => {
                match tokio::time::timeout_at(at, channel.recv()).await {
                    Ok(event) => event,
                    Err(_) => return Err(session.on_handshake_timeout(timeout)),
                }
            }
            _ => channel.recv().await,
        };

        match event {
            ChannelEvent::Open => {
                if session.on_open() {
                    debug!("channel from {} open, sending ready", session.peer());
                    if let Err(e) = channel.send(ControlMessage::Ready.into()).await {
                        return Err(session.on_channel_error(e));
                    }
                }
            }
            ChannelEvent::Data(message) => match session.on_message(message)? {
                ReceiverStep::Nothing => {}
                ReceiverStep::Progress(progress) => observer.on_progress(session.peer(), progress),
                ReceiverStep::Complete { progress, transfer } => {
                    observer.on_progress(session.peer(), progress);
                    return Ok(transfer);
                }
            },
            ChannelEvent::Closed => return Err(session.on_channel_error(ChannelError::Closed)),
            ChannelEvent::Error(e) => return Err(session.on_channel_error(e)),
        }
    }
}
