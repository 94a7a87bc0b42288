use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 15;

/// Server settings, read from `BEAM_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub heartbeat: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Missing keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let host = lookup("BEAM_HOST").unwrap_or_else(|| DEFAULT_HOST.into());
        let port = match lookup("BEAM_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("BEAM_PORT must be a port number, got {:?}", raw))?,
            None => DEFAULT_PORT,
        };
        let heartbeat_secs: u64 = match lookup("BEAM_HEARTBEAT_SECS") {
            Some(raw) => raw.parse().with_context(|| {
                format!("BEAM_HEARTBEAT_SECS must be whole seconds, got {:?}", raw)
            })?,
            None => DEFAULT_HEARTBEAT_SECS,
        };
        if heartbeat_secs == 0 {
            anyhow::bail!("BEAM_HEARTBEAT_SECS must be at least 1");
        }

        Ok(Self {
            host,
            port,
            heartbeat: Duration::from_secs(heartbeat_secs),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
