//! Beam transfer: chunked file transfer over a point-to-point channel.
//!
//! Provides:
//! - Chunk codec: lazy splitting into 64 KiB frames, size-checked reassembly
//! - Sender and receiver session state machines (ready / ready-ack
//!   handshake, metadata, chunk stream, completion)
//! - Async drivers that run sessions over any ordered, reliable channel
//! - Multi-recipient fan-out with independent sessions per target
//! - In-memory and TCP channel implementations

pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod memory;
pub mod observer;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod tcp;

// Re-export key types for convenience.
pub use channel::{ChannelEvent, Connector, PeerChannel};
pub use codec::{ChunkReader, Reassembler, SizeMismatch, reassemble, split};
pub use config::SessionConfig;
pub use error::{ChannelError, TransferError};
pub use memory::{MemoryChannel, MemoryConnector, MemoryListener, MemoryNetwork, memory_pair};
pub use observer::{NullObserver, TracingObserver, TransferObserver};
pub use protocol::{CHUNK_SIZE, ControlMessage, TransferMetadata, WireMessage, guess_mime_type};
pub use receiver::receive_over;
pub use sender::{OutgoingFile, Payload, SendReport, send_file, send_over, send_to_many};
pub use session::{
    CompletedTransfer, Phase, Progress, ReceiverSession, ReceiverStep, Role, SenderSession,
    SenderStep,
};
pub use tcp::{TcpAcceptor, TcpChannel, TcpConnector};
