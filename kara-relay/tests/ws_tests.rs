//! WebSocket control connection tests over a real socket

#![cfg(unix)]

mod helpers;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use helpers::*;
use kara_common::RelayEvent;
use kara_relay::api::serve_on;
use kara_relay::supervisor::SessionState;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(relay: &TestRelay) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = relay.router();
    tokio::spawn(serve_on(listener, router, std::future::pending()));
    format!("ws://{}/ws", addr)
}

async fn next_event(socket: &mut Socket) -> RelayEvent {
    loop {
        let frame = tokio::time::timeout(EVENT_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn expect_ws(socket: &mut Socket, kind: &str) -> RelayEvent {
    loop {
        let event = next_event(socket).await;
        if event.type_name() == kind {
            return event;
        }
    }
}

#[tokio::test]
async fn test_connect_receives_song_list() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let url = start_server(&relay).await;

    let (mut socket, _) = connect_async(url).await.unwrap();
    match next_event(&mut socket).await {
        RelayEvent::SongsList { songs } => {
            assert_eq!(songs.len(), 1);
            assert_eq!(songs[0].id, SONG_ID);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_frames_do_not_close_connection() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let url = start_server(&relay).await;

    let (mut socket, _) = connect_async(url).await.unwrap();
    expect_ws(&mut socket, "songs_list").await;

    socket.send(Message::Text("not json".to_string())).await.unwrap();
    socket.send(Message::Text("[1, 2, 3]".to_string())).await.unwrap();

    // Envelope double-encoded as a JSON string
    let inner = json!({"action": "load_song", "payload": {"songId": SONG_ID}}).to_string();
    let outer = serde_json::to_string(&inner).unwrap();
    socket.send(Message::Text(outer)).await.unwrap();

    match expect_ws(&mut socket, "song_loaded").await {
        RelayEvent::SongLoaded { song, .. } => assert_eq!(song.id, SONG_ID),
        other => panic!("unexpected event {:?}", other),
    }
    match expect_ws(&mut socket, "state").await {
        RelayEvent::State { playing, .. } => assert!(playing),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_disconnect_halts_engine() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let url = start_server(&relay).await;

    let (mut socket, _) = connect_async(url).await.unwrap();
    expect_ws(&mut socket, "songs_list").await;
    let load = json!({"action": "load_song", "payload": {"songId": SONG_ID}});
    socket.send(Message::Text(load.to_string())).await.unwrap();
    expect_ws(&mut socket, "state").await;
    assert_eq!(relay.snapshot().await.state, SessionState::Running);

    socket.close(None).await.unwrap();
    drop(socket);

    let snapshot = wait_for(&relay, |s| s.state == SessionState::Loaded).await;
    assert_eq!(snapshot.generation, None);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(relay.launched_pids().iter().all(|pid| !process_alive(*pid)));
}
