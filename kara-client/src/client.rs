//! Relay control connection
//!
//! A background driver task owns the WebSocket. It delivers every decoded
//! event to the registered listeners and reconnects with linear backoff when
//! the connection drops, giving up after the policy's attempt limit.
//! Outbound messages are never queued: `send` on a disconnected client
//! returns `false`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::{SinkExt, StreamExt};
use kara_common::protocol::Envelope;
use kara_common::RelayEvent;
use serde_json::{json, Map, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::reconnect::ReconnectPolicy;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Listener = Arc<dyn Fn(&RelayEvent) + Send + Sync>;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

/// Handle returned by [`RelayClient::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Shared {
    state: watch::Sender<ClientState>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_listener: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl Shared {
    fn set_state(&self, state: ClientState) {
        self.state.send_replace(state);
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<u64, Listener>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        self.outbound.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn deliver(&self, event: &RelayEvent) {
        // Called outside the lock so listeners may add or remove listeners
        let listeners: Vec<Listener> = self.listeners().values().cloned().collect();
        for listener in listeners {
            listener(event);
        }
    }
}

/// WebSocket client for the relay's control connection
pub struct RelayClient {
    url: String,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl RelayClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_policy(url, ReconnectPolicy::default())
    }

    pub fn with_policy(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ClientState::Disconnected);
        Self {
            url: url.into(),
            policy,
            shared: Arc::new(Shared {
                state,
                listeners: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(0),
                outbound: Mutex::new(None),
            }),
            driver: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ClientState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions
    pub fn state_changes(&self) -> watch::Receiver<ClientState> {
        self.shared.state.subscribe()
    }

    /// Start the connection driver if it is not already running
    pub fn connect(&self) {
        let mut driver = self.driver();
        if driver.as_ref().map_or(false, |handle| !handle.is_finished()) {
            return;
        }
        *driver = Some(tokio::spawn(drive(
            self.url.clone(),
            self.policy,
            Arc::clone(&self.shared),
        )));
    }

    /// Drop the connection and start over with a fresh attempt budget
    pub fn reconnect(&self) {
        self.close();
        self.connect();
    }

    /// Stop the driver without reconnecting
    pub fn close(&self) {
        if let Some(handle) = self.driver().take() {
            handle.abort();
        }
        *self.shared.outbound() = None;
        self.shared.set_state(ClientState::Disconnected);
    }

    /// Whether the driver is still connecting or connected
    pub fn is_running(&self) -> bool {
        self.driver()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&RelayEvent) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners().insert(id, Arc::new(listener));
        ListenerId(id)
    }

    /// Returns false if the listener was not registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners().remove(&id.0).is_some()
    }

    /// Send `{action, payload}`; false (and nothing sent) when not connected
    pub fn send(&self, action: &str, payload: Option<Value>) -> bool {
        let outbound = self.shared.outbound();
        let sender = match outbound.as_ref() {
            Some(sender) if self.state() == ClientState::Connected => sender,
            _ => {
                warn!("Not connected, cannot send {}", action);
                return false;
            }
        };

        let text = Envelope::new(action, payload).encode();
        if sender.send(text).is_err() {
            warn!("Connection closing, cannot send {}", action);
            return false;
        }
        true
    }

    pub fn load_song(
        &self,
        song_id: &str,
        input_device: Option<&str>,
        output_device: Option<&str>,
    ) -> bool {
        let mut payload = Map::new();
        payload.insert("songId".to_string(), json!(song_id));
        if let Some(device) = input_device {
            payload.insert("inputDevice".to_string(), json!(device));
        }
        if let Some(device) = output_device {
            payload.insert("outputDevice".to_string(), json!(device));
        }
        self.send("load_song", Some(Value::Object(payload)))
    }

    pub fn start_session(&self) -> bool {
        self.send("start_session", None)
    }

    pub fn stop_session(&self) -> bool {
        self.send("stop_session", None)
    }

    pub fn pause(&self) -> bool {
        self.send("pause", None)
    }

    pub fn resume(&self) -> bool {
        self.send("resume", None)
    }

    pub fn refresh_songs(&self) -> bool {
        self.send("refresh_songs", None)
    }

    pub fn set_voice_effect(&self, effect: &str, value: Value) -> bool {
        self.send(
            "set_voice_effect",
            Some(json!({ "effect": effect, "value": value })),
        )
    }

    pub fn set_voice_effects(&self, effects: Map<String, Value>) -> bool {
        self.send("set_voice_effects", Some(Value::Object(effects)))
    }

    pub fn set_voice_preset(&self, preset: &str) -> bool {
        self.send("set_voice_preset", Some(json!({ "preset": preset })))
    }

    fn driver(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.driver.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        if let Some(handle) = self.driver().take() {
            handle.abort();
        }
    }
}

async fn drive(url: String, policy: ReconnectPolicy, shared: Arc<Shared>) {
    let mut failures = 0u32;
    loop {
        shared.set_state(ClientState::Connecting);
        match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                info!("Connected to {}", url);
                failures = 0;
                run_socket(socket, &shared).await;
                info!("Disconnected from {}", url);
            }
            Err(e) => warn!("Failed to connect to {}: {}", url, e),
        }
        shared.set_state(ClientState::Disconnected);

        failures += 1;
        match policy.delay_for(failures) {
            Some(delay) => {
                info!(
                    "Reconnecting in {:?} (attempt {}/{})",
                    delay, failures, policy.max_attempts
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                warn!("Giving up on {} after {} attempts", url, policy.max_attempts);
                return;
            }
        }
    }
}

/// Pump one open socket until either side closes it
async fn run_socket(socket: Socket, shared: &Shared) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    *shared.outbound() = Some(tx);
    shared.set_state(ClientState::Connected);

    loop {
        tokio::select! {
            Some(text) = rx.recv() => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("Send failed: {}", e);
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<RelayEvent>(&text) {
                    Ok(event) => shared.deliver(&event),
                    Err(e) => warn!("Dropping malformed event: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Read failed: {}", e);
                    break;
                }
            },
        }
    }

    *shared.outbound() = None;
}
