//! Direct TCP channel between two peers.
//!
//! TCP is ordered and reliable, which is all a session needs. Each message
//! is one frame (all integers big-endian):
//!
//! ```text
//! [kind(1)] [len(4)] [payload(len)]
//!
//!   0x01 Control  payload = JSON control message, len <= MAX_CONTROL_SIZE
//!   0x02 Chunk    payload = raw file bytes,      len <= CHUNK_SIZE
//! ```
//!
//! The kind byte is checked before anything is parsed: chunk payloads are
//! never run through the JSON decoder.
//!
//! Endpoint identifiers for this transport are socket addresses
//! (`host:port`), resolved on open.

use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info};

use crate::channel::{ChannelEvent, Connector, PeerChannel};
use crate::error::ChannelError;
use crate::protocol::{CHUNK_SIZE, ControlMessage, MAX_CONTROL_SIZE, WireMessage};

// Frame kinds
pub const FRAME_CONTROL: u8 = 0x01;
pub const FRAME_CHUNK: u8 = 0x02;

/// Frame header: kind + length.
pub const FRAME_HEADER: usize = 5;

/// 1 MB socket buffers.
const SOCKET_BUF_SIZE: usize = 1024 * 1024;

/// Split a message into frame kind and payload.
pub fn encode_frame(message: &WireMessage) -> Result<(u8, Bytes), ChannelError> {
    let (kind, payload) = match message {
        WireMessage::Chunk(data) => (FRAME_CHUNK, data.clone()),
        WireMessage::Control(control) => (FRAME_CONTROL, Bytes::from(control.encode()?)),
    };
    let max = max_payload(kind)?;
    if payload.len() > max {
        return Err(ChannelError::FrameTooLarge {
            len: payload.len(),
            max,
        });
    }
    Ok((kind, payload))
}

/// Rebuild a message from a frame kind and payload.
pub fn decode_frame(kind: u8, payload: Vec<u8>) -> Result<WireMessage, ChannelError> {
    match kind {
        FRAME_CHUNK => Ok(WireMessage::Chunk(Bytes::from(payload))),
        FRAME_CONTROL => Ok(WireMessage::Control(ControlMessage::decode(&payload)?)),
        other => Err(ChannelError::UnknownFrameKind(other)),
    }
}

fn max_payload(kind: u8) -> Result<usize, ChannelError> {
    match kind {
        FRAME_CHUNK => Ok(CHUNK_SIZE),
        FRAME_CONTROL => Ok(MAX_CONTROL_SIZE),
        other => Err(ChannelError::UnknownFrameKind(other)),
    }
}

/// One end of a TCP point-to-point channel.
pub struct TcpChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    peer_addr: SocketAddr,
    open_reported: bool,
    read_closed: bool,
    write_closed: bool,
}

impl TcpChannel {
    pub fn from_stream(stream: TcpStream) -> Result<Self, ChannelError> {
        let sock_ref = socket2::SockRef::from(&stream);
        sock_ref.set_nodelay(true)?;
        sock_ref.set_send_buffer_size(SOCKET_BUF_SIZE)?;
        sock_ref.set_recv_buffer_size(SOCKET_BUF_SIZE)?;

        let peer_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::with_capacity(FRAME_HEADER + CHUNK_SIZE, reader),
            writer: BufWriter::with_capacity(FRAME_HEADER + CHUNK_SIZE, writer),
            peer_addr,
            open_reported: false,
            read_closed: false,
            write_closed: false,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read one frame. `Ok(None)` is a clean close between frames.
    async fn read_frame(&mut self) -> Result<Option<WireMessage>, ChannelError> {
        let kind = match self.reader.read_u8().await {
            Ok(kind) => kind,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let max = max_payload(kind)?;
        let len = self.reader.read_u32().await? as usize;
        if len > max {
            return Err(ChannelError::FrameTooLarge { len, max });
        }

        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).await?;
        decode_frame(kind, payload).map(Some)
    }
}

impl PeerChannel for TcpChannel {
    async fn send(&mut self, message: WireMessage) -> Result<(), ChannelError> {
        if self.write_closed {
            return Err(ChannelError::Closed);
        }
        let (kind, payload) = encode_frame(&message)?;

        self.writer.write_u8(kind).await?;
        self.writer.write_u32(payload.len() as u32).await?;
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> ChannelEvent {
        if !self.open_reported {
            self.open_reported = true;
            return ChannelEvent::Open;
        }
        if self.read_closed {
            return ChannelEvent::Closed;
        }
        match self.read_frame().await {
            Ok(Some(message)) => ChannelEvent::Data(message),
            Ok(None) => {
                self.read_closed = true;
                ChannelEvent::Closed
            }
            Err(e) => {
                self.read_closed = true;
                ChannelEvent::Error(e)
            }
        }
    }

    fn is_open(&self) -> bool {
        !self.read_closed && !self.write_closed
    }

    async fn close(&mut self) {
        if self.write_closed {
            return;
        }
        self.write_closed = true;
        if let Err(e) = self.writer.shutdown().await {
            debug!("shutdown of channel to {} failed: {}", self.peer_addr, e);
        }
    }
}

/// Opens TCP channels. Targets are `host:port` strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Channel = TcpChannel;

    async fn open(&self, target: &str) -> Result<TcpChannel, ChannelError> {
        let stream = match TcpStream::connect(target).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!("connect to {} failed: {}", target, e);
                return Err(ChannelError::Unreachable(target.to_string()));
            }
        };
        TcpChannel::from_stream(stream)
    }
}

/// Accepts inbound TCP channels.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("accepting transfers on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn accept(&self) -> Result<TcpChannel, ChannelError> {
        let (stream, addr) = self.listener.accept().await?;
        debug!("inbound channel from {}", addr);
        TcpChannel::from_stream(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TransferMetadata;

    async fn connected() -> (TcpChannel, TcpChannel) {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
        let addr = acceptor.local_addr().unwrap().to_string();
        let (opened, accepted) = tokio::join!(TcpConnector.open(&addr), acceptor.accept());
        (opened.unwrap(), accepted.unwrap())
    }

    #[tokio::test]
    async fn control_and_chunk_frames_round_trip() {
        let (mut a, mut b) = connected().await;
        assert!(matches!(b.recv().await, ChannelEvent::Open));

        let metadata = ControlMessage::Metadata(TransferMetadata {
            file_name: "x.bin".into(),
            mime_type: "application/octet-stream".into(),
            total_size: 3,
        });
        a.send(metadata.clone().into()).await.unwrap();
        a.send(WireMessage::Chunk(Bytes::from_static(&[0x7b, 0x00, 0xff])))
            .await
            .unwrap();
        a.close().await;
        assert!(!a.is_open());

        match b.recv().await {
            ChannelEvent::Data(WireMessage::Control(got)) => assert_eq!(got, metadata),
            other => panic!("expected metadata, got {:?}", other),
        }
        // Starts with '{' but is still a raw chunk.
        match b.recv().await {
            ChannelEvent::Data(WireMessage::Chunk(got)) => {
                assert_eq!(got, Bytes::from_static(&[0x7b, 0x00, 0xff]))
            }
            other => panic!("expected chunk, got {:?}", other),
        }
        assert!(matches!(b.recv().await, ChannelEvent::Closed));
        assert!(!b.is_open());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
        let addr = acceptor.local_addr().unwrap();

        let mut raw = TcpStream::connect(addr).await.unwrap();
        let mut b = acceptor.accept().await.unwrap();
        raw.write_u8(FRAME_CHUNK).await.unwrap();
        raw.write_u32((CHUNK_SIZE + 1) as u32).await.unwrap();

        assert!(matches!(b.recv().await, ChannelEvent::Open));
        assert!(matches!(
            b.recv().await,
            ChannelEvent::Error(ChannelError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_frame_kind_is_rejected() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
        let addr = acceptor.local_addr().unwrap();

        let mut raw = TcpStream::connect(addr).await.unwrap();
        let mut b = acceptor.accept().await.unwrap();
        raw.write_all(&[0x09, 0, 0, 0, 0]).await.unwrap();

        b.recv().await;
        assert!(matches!(
            b.recv().await,
            ChannelEvent::Error(ChannelError::UnknownFrameKind(0x09))
        ));
    }

    #[test]
    fn encode_rejects_oversized_chunk() {
        let big = WireMessage::Chunk(Bytes::from(vec![0u8; CHUNK_SIZE + 1]));
        assert!(matches!(
            encode_frame(&big),
            Err(ChannelError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_target() {
        // Bind then drop to get a port nothing listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        assert!(matches!(
            TcpConnector.open(&addr).await,
            Err(ChannelError::Unreachable(_))
        ));
    }
}
