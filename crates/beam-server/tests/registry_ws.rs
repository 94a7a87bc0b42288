use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use beam_server::ServerState;
use beam_types::events::{RegistryCommand, RegistryEvent};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(beam_server::serve(
        listener,
        ServerState::new(Duration::from_secs(30)),
    ));
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/registry", addr)).await.unwrap();
    ws
}

async fn send(ws: &mut Client, cmd: RegistryCommand) {
    let text = serde_json::to_string(&cmd).unwrap();
    ws.send(Message::Text(text.into())).await.unwrap();
}

async fn register(ws: &mut Client, identifier: &str) {
    send(
        ws,
        RegistryCommand::Register {
            identifier: identifier.into(),
        },
    )
    .await;
}

async fn next_peers(ws: &mut Client) -> Vec<String> {
    let read = async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let event: RegistryEvent = serde_json::from_str(text.as_str()).unwrap();
                    return event.peers().to_vec();
                }
                Some(Ok(_)) => continue,
                other => panic!("registry socket ended: {:?}", other),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("no presence update within 5s")
}

fn peers(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[tokio::test]
async fn registrations_are_broadcast_to_everyone() {
    let addr = spawn_server().await;

    let mut alice = connect(addr).await;
    register(&mut alice, "alice").await;
    assert_eq!(next_peers(&mut alice).await, peers(&["alice"]));

    let mut bob = connect(addr).await;
    register(&mut bob, "bob").await;
    assert_eq!(next_peers(&mut alice).await, peers(&["alice", "bob"]));
    assert_eq!(next_peers(&mut bob).await, peers(&["alice", "bob"]));
}

#[tokio::test]
async fn disconnect_removes_peer() {
    let addr = spawn_server().await;

    let mut alice = connect(addr).await;
    register(&mut alice, "alice").await;
    next_peers(&mut alice).await;

    let mut bob = connect(addr).await;
    register(&mut bob, "bob").await;
    next_peers(&mut alice).await;
    next_peers(&mut bob).await;

    bob.close(None).await.unwrap();
    assert_eq!(next_peers(&mut alice).await, peers(&["alice"]));
}

#[tokio::test]
async fn unregistered_disconnect_still_broadcasts() {
    let addr = spawn_server().await;

    let mut alice = connect(addr).await;
    register(&mut alice, "alice").await;
    next_peers(&mut alice).await;

    let mut lurker = connect(addr).await;
    lurker.close(None).await.unwrap();
    assert_eq!(next_peers(&mut alice).await, peers(&["alice"]));
}

#[tokio::test]
async fn query_answers_only_the_caller() {
    let addr = spawn_server().await;

    let mut alice = connect(addr).await;
    register(&mut alice, "alice").await;
    next_peers(&mut alice).await;

    let mut watcher = connect(addr).await;
    send(&mut watcher, RegistryCommand::Query).await;
    assert_eq!(next_peers(&mut watcher).await, peers(&["alice"]));

    // Alice only sees the next real change, not the query reply.
    let mut bob = connect(addr).await;
    register(&mut bob, "bob").await;
    assert_eq!(next_peers(&mut alice).await, peers(&["alice", "bob"]));
}

#[tokio::test]
async fn invalid_identifier_is_ignored() {
    let addr = spawn_server().await;

    let mut client = connect(addr).await;
    register(&mut client, "").await;
    client
        .send(Message::Text("not json".into()))
        .await
        .unwrap();
    send(&mut client, RegistryCommand::Query).await;
    assert!(next_peers(&mut client).await.is_empty());
}

#[tokio::test]
async fn health_reports_peer_count() {
    let addr = spawn_server().await;

    let mut alice = connect(addr).await;
    register(&mut alice, "alice").await;
    next_peers(&mut alice).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["peers"], 1);
}
