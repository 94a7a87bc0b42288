use std::time::Duration;

use crate::protocol::CHUNK_SIZE;

/// Default bound on waiting for the channel to open and the handshake to
/// finish.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-session tuning shared by the send and receive drivers.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Payload bytes per chunk. Clamped to `1..=CHUNK_SIZE`.
    pub chunk_size: usize,
    /// How long a session may sit before the handshake completes (sender:
    /// from starting to open the channel until `ready`; receiver: until
    /// metadata). `None` waits forever.
    pub handshake_timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, CHUNK_SIZE)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_is_clamped() {
        let mut config = SessionConfig::default();
        assert_eq!(config.chunk_size(), CHUNK_SIZE);
        config.chunk_size = 0;
        assert_eq!(config.chunk_size(), 1);
        config.chunk_size = CHUNK_SIZE * 4;
        assert_eq!(config.chunk_size(), CHUNK_SIZE);
    }
}
