use std::collections::BTreeSet;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use beam_types::events::{RegistryCommand, RegistryEvent};

/// A WebSocket session with the registry server.
pub struct RegistryClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RegistryClient {
    /// `server` is the base URL; the `/registry` path is appended.
    pub async fn connect(server: &str) -> anyhow::Result<Self> {
        let url = format!("{}/registry", server.trim_end_matches('/'));
        let (ws, _) = connect_async(&url)
            .await
            .with_context(|| format!("failed to connect to registry at {}", url))?;
        debug!("connected to registry at {}", url);
        Ok(Self { ws })
    }

    pub async fn register(&mut self, identifier: &str) -> anyhow::Result<()> {
        self.send(RegistryCommand::Register {
            identifier: identifier.to_string(),
        })
        .await
    }

    pub async fn query(&mut self) -> anyhow::Result<()> {
        self.send(RegistryCommand::Query).await
    }

    /// Wait for the next presence update. `None` once the server hangs up.
    pub async fn next_update(&mut self) -> anyhow::Result<Option<Vec<String>>> {
        while let Some(msg) = self.ws.next().await {
            match msg.context("registry connection failed")? {
                Message::Text(text) => match serde_json::from_str::<RegistryEvent>(text.as_str()) {
                    Ok(event) => return Ok(Some(event.peers().to_vec())),
                    Err(e) => warn!("ignoring malformed registry event: {}", e),
                },
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    async fn send(&mut self, cmd: RegistryCommand) -> anyhow::Result<()> {
        let text = serde_json::to_string(&cmd)?;
        self.ws
            .send(Message::Text(text.into()))
            .await
            .context("failed to send to registry")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    Joined(String),
    Left(String),
}

/// Local view of who is online, kept in step with presence updates.
#[derive(Debug, Default)]
pub struct PresenceView {
    own: Option<String>,
    peers: BTreeSet<String>,
}

impl PresenceView {
    /// A view that never lists `own` as a peer.
    pub fn excluding(own: impl Into<String>) -> Self {
        Self {
            own: Some(own.into()),
            peers: BTreeSet::new(),
        }
    }

    pub fn peers(&self) -> impl Iterator<Item = &str> {
        self.peers.iter().map(String::as_str)
    }

    /// Replace the view with `update` and report what changed.
    pub fn apply(&mut self, update: Vec<String>) -> Vec<PresenceChange> {
        let next: BTreeSet<String> = update
            .into_iter()
            .filter(|peer| self.own.as_deref() != Some(peer.as_str()))
            .collect();

        let mut changes: Vec<PresenceChange> = next
            .difference(&self.peers)
            .cloned()
            .map(PresenceChange::Joined)
            .collect();
        changes.extend(
            self.peers
                .difference(&next)
                .cloned()
                .map(PresenceChange::Left),
        );

        self.peers = next;
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use beam_server::ServerState;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn view_reports_joins_and_leaves() {
        let mut view = PresenceView::excluding("me:1");

        let changes = view.apply(names(&["a:1", "me:1"]));
        assert_eq!(changes, vec![PresenceChange::Joined("a:1".into())]);

        let changes = view.apply(names(&["b:1", "me:1"]));
        assert_eq!(
            changes,
            vec![
                PresenceChange::Joined("b:1".into()),
                PresenceChange::Left("a:1".into()),
            ]
        );
        assert_eq!(view.peers().collect::<Vec<_>>(), vec!["b:1"]);

        // Same set again: nothing to report.
        assert!(view.apply(names(&["b:1", "me:1"])).is_empty());
    }

    #[tokio::test]
    async fn client_registers_and_queries() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(beam_server::serve(
            listener,
            ServerState::new(Duration::from_secs(30)),
        ));

        let server = format!("ws://{}/", addr);
        let mut alice = RegistryClient::connect(&server).await.unwrap();
        alice.register("127.0.0.1:7401").await.unwrap();
        assert_eq!(
            alice.next_update().await.unwrap(),
            Some(names(&["127.0.0.1:7401"]))
        );

        let mut watcher = RegistryClient::connect(&server).await.unwrap();
        watcher.query().await.unwrap();
        assert_eq!(
            watcher.next_update().await.unwrap(),
            Some(names(&["127.0.0.1:7401"]))
        );

        watcher.close().await;
        alice.close().await;
    }
}
