use std::time::Duration;

use crate::codec::SizeMismatch;
use crate::session::Phase;

/// Failures of the point-to-point channel itself.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    #[error("peer {0} is unreachable")]
    Unreachable(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed control message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("unknown frame kind 0x{0:02x}")]
    UnknownFrameKind(u8),
}

/// Everything that can end a transfer session early. Each error is local to
/// the session that raised it.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// A message arrived that the current phase does not allow.
    #[error("protocol violation: unexpected {message} while {phase}")]
    Protocol { phase: Phase, message: &'static str },

    /// The channel errored or closed before the transfer finished.
    #[error("channel to {peer} failed after {bytes_transferred} bytes: {source}")]
    Channel {
        peer: String,
        bytes_transferred: u64,
        #[source]
        source: ChannelError,
    },

    /// All chunks arrived but their total disagrees with the metadata.
    #[error("data integrity error: {0}")]
    SizeMismatch(#[from] SizeMismatch),

    #[error("no handshake from {peer} within {timeout:?}")]
    HandshakeTimeout { peer: String, timeout: Duration },

    /// Reading the outgoing payload failed.
    #[error("failed to read payload: {0}")]
    Source(#[from] std::io::Error),

    /// The task driving the session panicked or was cancelled.
    #[error("transfer task aborted: {0}")]
    Aborted(String),
}

impl TransferError {
    /// Bytes moved before the failure, where known.
    pub fn bytes_transferred(&self) -> Option<u64> {
        match self {
            Self::Channel {
                bytes_transferred, ..
            } => Some(*bytes_transferred),
            Self::SizeMismatch(mismatch) => Some(mismatch.actual),
            _ => None,
        }
    }
}
