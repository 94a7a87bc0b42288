//! In-process channels.
//!
//! Backed by bounded tokio mpsc queues, so they are ordered and reliable and
//! a slow reader applies backpressure to the writer. Used to run sessions
//! inside one process and in tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::channel::{ChannelEvent, Connector, PeerChannel};
use crate::error::ChannelError;
use crate::protocol::WireMessage;

/// Messages a memory channel buffers per direction.
pub const DEFAULT_CAPACITY: usize = 16;

/// One end of an in-memory channel.
#[derive(Debug)]
pub struct MemoryChannel {
    tx: Option<mpsc::Sender<WireMessage>>,
    rx: mpsc::Receiver<WireMessage>,
    open_reported: bool,
    closed: bool,
}

/// Two connected ends. Each reports `Open` first.
pub fn memory_pair(capacity: usize) -> (MemoryChannel, MemoryChannel) {
    let capacity = capacity.max(1);
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    (MemoryChannel::new(a_tx, b_rx), MemoryChannel::new(b_tx, a_rx))
}

impl MemoryChannel {
    fn new(tx: mpsc::Sender<WireMessage>, rx: mpsc::Receiver<WireMessage>) -> Self {
        Self {
            tx: Some(tx),
            rx,
            open_reported: false,
            closed: false,
        }
    }
}

impl PeerChannel for MemoryChannel {
    async fn send(&mut self, message: WireMessage) -> Result<(), ChannelError> {
        let Some(tx) = &self.tx else {
            return Err(ChannelError::Closed);
        };
        tx.send(message).await.map_err(|_| ChannelError::Closed)
    }

    async fn recv(&mut self) -> ChannelEvent {
        if !self.open_reported {
            self.open_reported = true;
            return ChannelEvent::Open;
        }
        if self.closed {
            return ChannelEvent::Closed;
        }
        match self.rx.recv().await {
            Some(message) => ChannelEvent::Data(message),
            None => {
                self.closed = true;
                ChannelEvent::Closed
            }
        }
    }

    fn is_open(&self) -> bool {
        !self.closed && self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

/// Name -> listener directory for in-memory channels.
#[derive(Clone)]
pub struct MemoryNetwork {
    listeners: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<MemoryChannel>>>>,
    capacity: usize,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Channels opened on this network buffer `capacity` messages per
    /// direction.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    /// Accept channels addressed to `identifier`. Replaces any earlier
    /// listener under the same name.
    pub fn listen(&self, identifier: impl Into<String>) -> MemoryListener {
        let identifier = identifier.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .expect("memory network lock poisoned")
            .insert(identifier.clone(), tx);
        MemoryListener { identifier, rx }
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            network: self.clone(),
        }
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives channels opened towards one identifier.
pub struct MemoryListener {
    identifier: String,
    rx: mpsc::UnboundedReceiver<MemoryChannel>,
}

impl MemoryListener {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Next inbound channel, or `None` once the network is dropped.
    pub async fn accept(&mut self) -> Option<MemoryChannel> {
        self.rx.recv().await
    }
}

/// [`Connector`] over a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryConnector {
    network: MemoryNetwork,
}

impl Connector for MemoryConnector {
    type Channel = MemoryChannel;

    async fn open(&self, target: &str) -> Result<MemoryChannel, ChannelError> {
        let listener = self
            .network
            .listeners
            .lock()
            .expect("memory network lock poisoned")
            .get(target)
            .cloned()
            .ok_or_else(|| ChannelError::Unreachable(target.to_string()))?;

        let (local, remote) = memory_pair(self.network.capacity);
        listener
            .send(remote)
            .map_err(|_| ChannelError::Unreachable(target.to_string()))?;
        Ok(local)
    }
}
