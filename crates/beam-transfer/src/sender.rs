//! Send driver: runs a [`SenderSession`] over a channel.
//!
//! ```text
//! open channel -> wait for `ready` -> ready-ack -> metadata
//!              -> read chunk -> send -> read chunk -> send ... -> close
//! ```
//!
//! The next chunk is read only after the previous one was handed to the
//! channel, so one frame is in memory per session. Sends to several
//! recipients run as independent tasks, each with its own session and its
//! own read of the payload.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::join_all;
use tokio::io::AsyncRead;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::channel::{ChannelEvent, Connector, PeerChannel};
use crate::codec::ChunkReader;
use crate::config::SessionConfig;
use crate::error::{ChannelError, TransferError};
use crate::observer::TransferObserver;
use crate::protocol::{ControlMessage, TransferMetadata, WireMessage, guess_mime_type};
use crate::session::{SenderSession, SenderStep};

/// Where the outgoing bytes come from. Each session opens its own reader.
#[derive(Debug, Clone)]
pub enum Payload {
    Memory(Bytes),
    File(PathBuf),
}

impl Payload {
    async fn open(&self) -> io::Result<Box<dyn AsyncRead + Send + Unpin>> {
        match self {
            Self::Memory(data) => Ok(Box::new(io::Cursor::new(data.clone()))),
            Self::File(path) => Ok(Box::new(tokio::fs::File::open(path).await?)),
        }
    }
}

/// A file ready to be offered to one or more peers.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub metadata: TransferMetadata,
    pub payload: Payload,
}

impl OutgoingFile {
    pub fn from_bytes(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Bytes,
    ) -> Self {
        Self {
            metadata: TransferMetadata {
                file_name: file_name.into(),
                mime_type: mime_type.into(),
                total_size: data.len() as u64,
            },
            payload: Payload::Memory(data),
        }
    }

    /// Describe a file on disk. The MIME type is guessed from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let mime_type = guess_mime_type(&file_name).to_string();

        Ok(Self {
            metadata: TransferMetadata {
                file_name,
                mime_type,
                total_size: meta.len(),
            },
            payload: Payload::File(path.to_path_buf()),
        })
    }
}

/// Result of a successful send to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub target: String,
    pub bytes_sent: u64,
    pub chunks_sent: u64,
}

/// Open a channel to `target` and send `file` over it.
pub async fn send_file<K: Connector>(
    connector: &K,
    target: &str,
    file: &OutgoingFile,
    config: &SessionConfig,
    observer: &dyn TransferObserver,
) -> Result<SendReport, TransferError> {
    debug!("opening channel to {}", target);

    // One deadline covers both the open and the wait for `ready`.
    let deadline = handshake_deadline(config);
    let opened = match deadline {
        Some((at, timeout)) => match tokio::time::timeout_at(at, connector.open(target)).await {
            Ok(opened) => opened,
            Err(_) => {
                let err = TransferError::HandshakeTimeout {
                    peer: target.to_string(),
                    timeout,
                };
                observer.on_error(target, &err);
                return Err(err);
            }
        },
        None => connector.open(target).await,
    };

    let channel = match opened {
        Ok(channel) => channel,
        Err(source) => {
            let err = TransferError::Channel {
                peer: target.to_string(),
                bytes_transferred: 0,
                source,
            };
            observer.on_error(target, &err);
            return Err(err);
        }
    };

    run(channel, target, file, config, deadline, observer).await
}

/// Send `file` to every target at once. Each target gets its own channel
/// and session; one failing never cancels the others. Results come back in
/// `targets` order.
pub async fn send_to_many<K>(
    connector: Arc<K>,
    targets: &[String],
    file: OutgoingFile,
    config: SessionConfig,
    observer: Arc<dyn TransferObserver>,
) -> Vec<(String, Result<SendReport, TransferError>)>
where
    K: Connector + 'static,
{
    let tasks = targets.iter().map(|target| {
        let connector = connector.clone();
        let target = target.clone();
        let file = file.clone();
        let config = config.clone();
        let observer = observer.clone();
        tokio::spawn(async move {
            send_file(connector.as_ref(), &target, &file, &config, observer.as_ref()).await
        })
    });

    let results = join_all(tasks).await;

    targets
        .iter()
        .cloned()
        .zip(results)
        .map(|(target, joined)| {
            let result = joined.unwrap_or_else(|e| Err(TransferError::Aborted(e.to_string())));
            (target, result)
        })
        .collect()
}

/// Run the sending side over an already-open channel. The channel is closed
/// before returning, whatever the outcome.
pub async fn send_over<C: PeerChannel>(
    channel: C,
    target: &str,
    file: &OutgoingFile,
    config: &SessionConfig,
    observer: &dyn TransferObserver,
) -> Result<SendReport, TransferError> {
    run(channel, target, file, config, handshake_deadline(config), observer).await
}

fn handshake_deadline(config: &SessionConfig) -> Option<(Instant, Duration)> {
    config
        .handshake_timeout
        .map(|timeout| (Instant::now() + timeout, timeout))
}

async fn run<C: PeerChannel>(
    mut channel: C,
    target: &str,
    file: &OutgoingFile,
    config: &SessionConfig,
    deadline: Option<(Instant, Duration)>,
    observer: &dyn TransferObserver,
) -> Result<SendReport, TransferError> {
    let mut session = SenderSession::new(target, file.metadata.clone());

    let result = match wait_for_ready(&mut channel, &mut session, deadline).await {
        Ok(()) => stream(&mut channel, &mut session, file, config, observer).await,
        Err(e) => Err(e),
    };
    channel.close().await;

    match &result {
        Ok(report) => info!(
            "sent {} ({} bytes, {} chunks) to {}",
            file.metadata.file_name, report.bytes_sent, report.chunks_sent, target
        ),
        Err(e) => observer.on_error(target, e),
    }
    result
}

async fn wait_for_ready<C: PeerChannel>(
    channel: &mut C,
    session: &mut SenderSession,
    deadline: Option<(Instant, Duration)>,
) -> Result<(), TransferError> {
    loop {
        let event = match deadline {
            Some((at, timeout)) => match tokio::time::timeout_at(at, channel.recv()).await {
                Ok(event) => event,
                Err(_) => return Err(session.on_handshake_timeout(timeout)),
            },
            None => channel.recv().await,
        };

        match event {
            ChannelEvent::Open => {
                debug!("channel to {} open, waiting for ready", session.target());
                session.on_open();
            }
            ChannelEvent::Data(message) => {
                if session.on_message(message)? == SenderStep::BeginStream {
                    return Ok(());
                }
            }
            ChannelEvent::Closed => return Err(session.on_channel_error(ChannelError::Closed)),
            ChannelEvent::Error(e) => return Err(session.on_channel_error(e)),
        }
    }
}

async fn stream<C: PeerChannel>(
    channel: &mut C,
    session: &mut SenderSession,
    file: &OutgoingFile,
    config: &SessionConfig,
    observer: &dyn TransferObserver,
) -> Result<SendReport, TransferError> {
    let metadata = session.metadata().clone();
    send_message(channel, session, ControlMessage::ReadyAck.into()).await?;
    send_message(channel, session, ControlMessage::Metadata(metadata.clone()).into()).await?;
    session.metadata_sent();

    let source = match file.payload.open().await {
        Ok(source) => source,
        Err(e) => return Err(session.on_source_error(e)),
    };
    let mut reader = ChunkReader::new(source, config.chunk_size(), metadata.total_size);
    let mut chunks_sent = 0u64;

    loop {
        let chunk = match reader.next_chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => return Err(session.on_source_error(e)),
        };
        let len = chunk.len();
        send_message(channel, session, WireMessage::Chunk(chunk)).await?;
        chunks_sent += 1;

        let progress = session.chunk_sent(len);
        trace!("{} <- chunk #{} ({} bytes)", session.target(), chunks_sent, len);
        observer.on_progress(session.target(), progress);
    }

    session.finish()?;
    Ok(SendReport {
        target: session.target().to_string(),
        bytes_sent: session.bytes_sent(),
        chunks_sent,
    })
}

async fn send_message<C: PeerChannel>(
    channel: &mut C,
    session: &mut SenderSession,
    message: WireMessage,
) -> Result<(), TransferError> {
    match channel.send(message).await {
        Ok(()) => Ok(()),
        Err(e) => Err(session.on_channel_error(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn from_path_describes_file() {
        let dir = std::env::temp_dir().join(format!("beam_sender_test_{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("notes.txt");
        tokio::fs::write(&path, b"hello beam").await.unwrap();

        let file = OutgoingFile::from_path(&path).await.unwrap();
        assert_eq!(file.metadata.file_name, "notes.txt");
        assert_eq!(file.metadata.mime_type, "text/plain");
        assert_eq!(file.metadata.total_size, 10);

        assert!(OutgoingFile::from_path(&dir).await.is_err());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    struct SlowConnector {
        inner: crate::memory::MemoryConnector,
        delay: Duration,
    }

    impl Connector for SlowConnector {
        type Channel = crate::memory::MemoryChannel;

        async fn open(&self, target: &str) -> Result<Self::Channel, ChannelError> {
            tokio::time::sleep(self.delay).await;
            self.inner.open(target).await
        }
    }

    #[tokio::test]
    async fn slow_open_counts_against_handshake_timeout() {
        let network = crate::memory::MemoryNetwork::new();
        let mut bob = network.listen("bob");
        let holder = tokio::spawn(async move {
            // Accept but never send ready.
            let channel = bob.accept().await;
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(channel);
        });

        let connector = SlowConnector {
            inner: network.connector(),
            delay: Duration::from_millis(180),
        };
        let config = SessionConfig {
            chunk_size: 1024,
            handshake_timeout: Some(Duration::from_millis(200)),
        };
        let file = OutgoingFile::from_bytes("x.txt", "text/plain", Bytes::from_static(b"x"));

        let started = std::time::Instant::now();
        let err = send_file(&connector, "bob", &file, &config, &crate::observer::NullObserver)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, TransferError::HandshakeTimeout { .. }));
        assert!(
            elapsed < Duration::from_millis(320),
            "gave up after {:?} with a 200ms bound",
            elapsed
        );
        holder.abort();
    }

    #[test]
    fn from_bytes_sets_size() {
        let file = OutgoingFile::from_bytes("a.bin", "application/octet-stream", Bytes::from_static(b"abc"));
        assert_eq!(file.metadata.total_size, 3);
    }
}
