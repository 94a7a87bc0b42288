//! Point-to-point transfer messages.
//!
//! Two kinds of message share one channel:
//!
//! ```text
//! control   {"type": "ready"}
//!           {"type": "ready-ack"}
//!           {"type": "metadata", "fileName": .., "mimeType": .., "totalSize": ..}
//! chunk     raw bytes, at most CHUNK_SIZE, no wrapping
//! ```
//!
//! Chunks carry no sequence number. Their position is their arrival order,
//! which is only sound over an ordered, reliable channel.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Maximum payload bytes per chunk (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Upper bound for an encoded control message.
pub const MAX_CONTROL_SIZE: usize = 16 * 1024;

/// Describes the payload that follows. Sent once per transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetadata {
    pub file_name: String,
    pub mime_type: String,
    pub total_size: u64,
}

/// Structured, discriminator-tagged messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Receiver -> sender: chunk consumer is attached, go ahead.
    Ready,
    /// Sender -> receiver: ready seen, metadata follows.
    ReadyAck,
    /// Sender -> receiver.
    Metadata(TransferMetadata),
}

impl ControlMessage {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::ReadyAck => "ready-ack",
            Self::Metadata(_) => "metadata",
        }
    }
}

/// Anything that travels over a point-to-point channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Control(ControlMessage),
    /// A raw slice of the file payload.
    Chunk(Bytes),
}

impl WireMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Control(control) => control.name(),
            Self::Chunk(_) => "chunk",
        }
    }
}

impl From<ControlMessage> for WireMessage {
    fn from(control: ControlMessage) -> Self {
        Self::Control(control)
    }
}

/// Best-effort MIME type from a file name's extension.
pub fn guess_mime_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "log" | "md" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "text/javascript",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_messages_carry_type_discriminator() {
        assert_eq!(
            ControlMessage::Ready.encode().unwrap(),
            br#"{"type":"ready"}"#.to_vec()
        );
        assert_eq!(
            ControlMessage::ReadyAck.encode().unwrap(),
            br#"{"type":"ready-ack"}"#.to_vec()
        );
    }

    #[test]
    fn metadata_uses_camel_case_fields() {
        let msg = ControlMessage::Metadata(TransferMetadata {
            file_name: "x.txt".into(),
            mime_type: "text/plain".into(),
            total_size: 10,
        });
        let json: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "metadata");
        assert_eq!(json["fileName"], "x.txt");
        assert_eq!(json["mimeType"], "text/plain");
        assert_eq!(json["totalSize"], 10);

        let back = ControlMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn raw_bytes_do_not_decode_as_control() {
        assert!(ControlMessage::decode(&[0xff, 0x00, 0x13]).is_err());
        assert!(ControlMessage::decode(br#"{"fileName":"x"}"#).is_err());
    }

    #[test]
    fn mime_guess() {
        assert_eq!(guess_mime_type("notes.TXT"), "text/plain");
        assert_eq!(guess_mime_type("photo.jpeg"), "image/jpeg");
        assert_eq!(guess_mime_type("archive.tar.gz"), "application/gzip");
        assert_eq!(guess_mime_type("Makefile"), "application/octet-stream");
    }
}
