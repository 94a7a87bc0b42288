//! Transfer session state machines.
//!
//! ```text
//! receiver  Idle -open-> AwaitingReady -ready-ack-> StreamingMetadata
//!                -metadata-> StreamingChunks -last chunk-> Complete
//! sender    Idle -open-> AwaitingAck -ready-> StreamingMetadata
//!                -metadata sent-> StreamingChunks -all sent-> Complete
//! any phase -violation/close/error-> Failed
//! ```
//!
//! Sessions do no I/O. Each incoming message goes through one dispatch
//! function that either moves the phase forward, tells the driver what to
//! do next, or returns the error that failed the session. A session is
//! owned by the task driving its channel, so it needs no locking.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::codec::Reassembler;
use crate::error::{ChannelError, TransferError};
use crate::protocol::{ControlMessage, TransferMetadata, WireMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Receiver: channel open, `ready` sent, waiting for `ready-ack`.
    AwaitingReady,
    /// Sender: channel open, waiting for the receiver's `ready`.
    AwaitingAck,
    StreamingMetadata,
    StreamingChunks,
    Complete,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AwaitingReady => "awaiting-ready",
            Self::AwaitingAck => "awaiting-ack",
            Self::StreamingMetadata => "streaming-metadata",
            Self::StreamingChunks => "streaming-chunks",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Bytes moved so far against the declared total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub bytes_transferred: u64,
    pub total_size: u64,
}

impl Progress {
    /// Fraction done in `0.0..=1.0`. An empty transfer is fully done.
    pub fn fraction(&self) -> f64 {
        if self.total_size == 0 {
            return 1.0;
        }
        (self.bytes_transferred as f64 / self.total_size as f64).min(1.0)
    }

    pub fn percent(&self) -> f64 {
        self.fraction() * 100.0
    }
}

/// A fully received file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTransfer {
    pub metadata: TransferMetadata,
    pub payload: Bytes,
}

/// What the receive driver should surface after a message.
#[derive(Debug)]
pub enum ReceiverStep {
    Nothing,
    Progress(Progress),
    Complete {
        progress: Progress,
        transfer: CompletedTransfer,
    },
}

/// Receiving end of one channel.
#[derive(Debug)]
pub struct ReceiverSession {
    peer: String,
    phase: Phase,
    ready_sent: bool,
    metadata: Option<TransferMetadata>,
    bytes_transferred: u64,
    buffer: Reassembler,
}

impl ReceiverSession {
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            phase: Phase::Idle,
            ready_sent: false,
            metadata: None,
            bytes_transferred: 0,
            buffer: Reassembler::default(),
        }
    }

    pub fn role(&self) -> Role {
        Role::Receiver
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn metadata(&self) -> Option<&TransferMetadata> {
        self.metadata.as_ref()
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// The channel opened. Returns true exactly once per session: when the
    /// caller must send `ready`. Late or repeated opens return false.
    pub fn on_open(&mut self) -> bool {
        if self.ready_sent || self.phase != Phase::Idle {
            return false;
        }
        self.ready_sent = true;
        self.phase = Phase::AwaitingReady;
        true
    }

    pub fn on_message(&mut self, message: WireMessage) -> Result<ReceiverStep, TransferError> {
        match (self.phase, message) {
            (Phase::AwaitingReady, WireMessage::Control(ControlMessage::ReadyAck)) => {
                self.phase = Phase::StreamingMetadata;
                Ok(ReceiverStep::Nothing)
            }
            // Redundant ack.
            (
                Phase::StreamingMetadata | Phase::StreamingChunks,
                WireMessage::Control(ControlMessage::ReadyAck),
            ) => Ok(ReceiverStep::Nothing),
            (Phase::StreamingMetadata, WireMessage::Control(ControlMessage::Metadata(metadata))) => {
                self.begin(metadata)
            }
            (Phase::StreamingChunks, WireMessage::Chunk(chunk)) => self.accept_chunk(chunk),
            (phase, message) => Err(self.violation(phase, message.name())),
        }
    }

    /// The channel closed. Fails the session unless it already completed.
    pub fn on_close(&mut self) -> Result<(), TransferError> {
        if self.phase == Phase::Complete {
            return Ok(());
        }
        Err(self.on_channel_error(ChannelError::Closed))
    }

    pub fn on_channel_error(&mut self, source: ChannelError) -> TransferError {
        self.fail();
        TransferError::Channel {
            peer: self.peer.clone(),
            bytes_transferred: self.bytes_transferred,
            source,
        }
    }

    pub fn on_handshake_timeout(&mut self, timeout: Duration) -> TransferError {
        self.fail();
        TransferError::HandshakeTimeout {
            peer: self.peer.clone(),
            timeout,
        }
    }

    fn begin(&mut self, metadata: TransferMetadata) -> Result<ReceiverStep, TransferError> {
        debug!(
            "{} announced {} ({}, {} bytes)",
            self.peer, metadata.file_name, metadata.mime_type, metadata.total_size
        );
        self.buffer = Reassembler::new(metadata.total_size);
        self.bytes_transferred = 0;
        self.phase = Phase::StreamingChunks;
        self.metadata = Some(metadata);

        if self.buffer.is_done() {
            // Zero-length file: nothing to wait for.
            return self.complete();
        }
        Ok(ReceiverStep::Nothing)
    }

    fn accept_chunk(&mut self, chunk: Bytes) -> Result<ReceiverStep, TransferError> {
        self.bytes_transferred = self.buffer.push(chunk);
        if self.buffer.is_done() {
            return self.complete();
        }
        Ok(ReceiverStep::Progress(self.progress()))
    }

    fn complete(&mut self) -> Result<ReceiverStep, TransferError> {
        let progress = self.progress();
        let buffer = std::mem::take(&mut self.buffer);

        match (buffer.finish(), self.metadata.clone()) {
            (Ok(payload), Some(metadata)) => {
                self.phase = Phase::Complete;
                Ok(ReceiverStep::Complete {
                    progress,
                    transfer: CompletedTransfer { metadata, payload },
                })
            }
            (Err(mismatch), _) => {
                self.fail();
                Err(mismatch.into())
            }
            (Ok(_), None) => Err(self.violation(self.phase, "chunk")),
        }
    }

    fn progress(&self) -> Progress {
        Progress {
            bytes_transferred: self.bytes_transferred,
            total_size: self.buffer.expected(),
        }
    }

    fn violation(&mut self, phase: Phase, message: &'static str) -> TransferError {
        self.fail();
        TransferError::Protocol { phase, message }
    }

    fn fail(&mut self) {
        if self.phase != Phase::Complete {
            self.phase = Phase::Failed;
        }
    }
}

/// What the send driver should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderStep {
    Nothing,
    /// Send `ready-ack`, then metadata, then the chunks.
    BeginStream,
}

/// Sending end of one channel, to one recipient.
#[derive(Debug)]
pub struct SenderSession {
    target: String,
    phase: Phase,
    metadata: TransferMetadata,
    bytes_sent: u64,
}

impl SenderSession {
    pub fn new(target: impl Into<String>, metadata: TransferMetadata) -> Self {
        Self {
            target: target.into(),
            phase: Phase::Idle,
            metadata,
            bytes_sent: 0,
        }
    }

    pub fn role(&self) -> Role {
        Role::Sender
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn metadata(&self) -> &TransferMetadata {
        &self.metadata
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// The channel opened. Sending still waits for the receiver's `ready`.
    pub fn on_open(&mut self) {
        if self.phase == Phase::Idle {
            self.phase = Phase::AwaitingAck;
        }
    }

    pub fn on_message(&mut self, message: WireMessage) -> Result<SenderStep, TransferError> {
        match (self.phase, message) {
            // Idle covers a `ready` that beat our own open notification.
            (Phase::Idle | Phase::AwaitingAck, WireMessage::Control(ControlMessage::Ready)) => {
                self.phase = Phase::StreamingMetadata;
                Ok(SenderStep::BeginStream)
            }
            // Duplicate ready: a stream is already under way or done.
            (
                Phase::StreamingMetadata | Phase::StreamingChunks | Phase::Complete,
                WireMessage::Control(ControlMessage::Ready),
            ) => Ok(SenderStep::Nothing),
            (phase, message) => {
                self.fail();
                Err(TransferError::Protocol {
                    phase,
                    message: message.name(),
                })
            }
        }
    }

    /// `ready-ack` and metadata have been handed to the channel.
    pub fn metadata_sent(&mut self) {
        if self.phase == Phase::StreamingMetadata {
            self.phase = Phase::StreamingChunks;
        }
    }

    /// One chunk has been handed to the channel.
    pub fn chunk_sent(&mut self, len: usize) -> Progress {
        self.bytes_sent += len as u64;
        Progress {
            bytes_transferred: self.bytes_sent,
            total_size: self.metadata.total_size,
        }
    }

    /// The source is exhausted. Complete if it produced exactly the declared
    /// number of bytes.
    pub fn finish(&mut self) -> Result<(), TransferError> {
        if self.bytes_sent != self.metadata.total_size {
            self.fail();
            return Err(TransferError::SizeMismatch(crate::codec::SizeMismatch {
                expected: self.metadata.total_size,
                actual: self.bytes_sent,
            }));
        }
        self.phase = Phase::Complete;
        Ok(())
    }

    pub fn on_close(&mut self) -> Result<(), TransferError> {
        if self.phase == Phase::Complete {
            return Ok(());
        }
        Err(self.on_channel_error(ChannelError::Closed))
    }

    pub fn on_channel_error(&mut self, source: ChannelError) -> TransferError {
        self.fail();
        TransferError::Channel {
            peer: self.target.clone(),
            bytes_transferred: self.bytes_sent,
            source,
        }
    }

    pub fn on_handshake_timeout(&mut self, timeout: Duration) -> TransferError {
        self.fail();
        TransferError::HandshakeTimeout {
            peer: self.target.clone(),
            timeout,
        }
    }

    /// Reading the outgoing payload failed.
    pub fn on_source_error(&mut self, error: std::io::Error) -> TransferError {
        self.fail();
        TransferError::Source(error)
    }

    fn fail(&mut self) {
        if self.phase != Phase::Complete {
            self.phase = Phase::Failed;
        }
    }
}
