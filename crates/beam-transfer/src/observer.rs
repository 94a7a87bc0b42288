//! Presentation-side hooks for transfer sessions.
//!
//! Drivers report progress after every chunk, completion with the assembled
//! file, and the error that ended a failed session. The `peer` argument is
//! the target identifier on the sending side and the channel's peer label
//! on the receiving side.

use crate::error::TransferError;
use crate::session::{CompletedTransfer, Progress};

/// Implementations can render a progress bar, write to tracing, or discard
/// everything. Every method has a no-op default.
pub trait TransferObserver: Send + Sync {
    fn on_progress(&self, _peer: &str, _progress: Progress) {}

    fn on_complete(&self, _peer: &str, _transfer: &CompletedTransfer) {}

    fn on_error(&self, _peer: &str, _error: &TransferError) {}
}

/// Observer that uses the `tracing` crate.
pub struct TracingObserver;

impl TransferObserver for TracingObserver {
    fn on_progress(&self, peer: &str, progress: Progress) {
        // Per-chunk spam stays at trace.
        tracing::trace!(
            peer,
            bytes = progress.bytes_transferred,
            total = progress.total_size,
            "progress {:.1}%",
            progress.percent(),
        );
    }

    fn on_complete(&self, peer: &str, transfer: &CompletedTransfer) {
        tracing::info!(
            peer,
            file_name = %transfer.metadata.file_name,
            mime_type = %transfer.metadata.mime_type,
            bytes = transfer.payload.len(),
            "transfer complete",
        );
    }

    fn on_error(&self, peer: &str, error: &TransferError) {
        tracing::warn!(peer, "transfer failed: {}", error);
    }
}

/// No-op observer.
pub struct NullObserver;

impl TransferObserver for NullObserver {}
