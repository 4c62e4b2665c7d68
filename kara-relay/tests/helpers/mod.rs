//! Test helpers for kara-relay integration tests
//!
//! - `TestRelay`: a supervisor over a temporary catalog whose engine is a
//!   small `sh` script
//! - Event waiting helpers for connection receivers

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kara_common::protocol;
use kara_common::{EventBus, RelayEvent};
use kara_relay::api::{create_router, AppContext};
use kara_relay::config::Timing;
use kara_relay::supervisor::{ConnectionId, SessionSnapshot};
use kara_relay::{Catalog, Config, Supervisor, SupervisorHandle};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

/// Engine that announces itself and keeps running until signalled
pub const PLAYING_ENGINE: &str = r#"
echo $$ >> launches.log
echo "Starting karaoke for $1"
echo "C++ Karaoke with Recording started"
exec sleep 30
"#;

/// Engine whose first output line is not valid UTF-8
pub const RAW_BYTES_ENGINE: &str = r#"
echo $$ >> launches.log
printf 'progress \377\376 bar\n'
sleep 0.3
echo "Starting karaoke for $1"
exec sleep 30
"#;

/// Engine that ignores SIGTERM
pub const STUBBORN_ENGINE: &str = r#"
trap '' TERM
echo $$ > stubborn.pid
echo "Starting karaoke for $1"
while true; do sleep 0.05; done
"#;

/// Engine that plays briefly and exits on its own
pub const SHORT_ENGINE: &str = r#"
echo "Starting karaoke for $1"
sleep 0.2
"#;

/// Engine that fails to open its audio device
pub const FAILING_ENGINE: &str = r#"
echo "input device not found" >&2
exec sleep 30
"#;

pub const SONG_DIR: &str = "Queen - Bohemian Rhapsody_1a2b3c_20240101_120000";
pub const SONG_ID: &str = SONG_DIR;

/// Default wait for a single expected event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn fast_timing() -> Timing {
    Timing {
        grace_period: Duration::from_millis(400),
        restart_delay: Duration::from_millis(100),
        autostart_delay: Duration::from_millis(100),
        tick_interval: None,
    }
}

/// A supervisor wired to a temporary engine root
pub struct TestRelay {
    pub dir: TempDir,
    pub config: Config,
    pub catalog: Arc<Catalog>,
    pub bus: EventBus,
    pub supervisor: SupervisorHandle,
}

impl TestRelay {
    pub async fn start(engine_script: &str) -> Self {
        Self::start_with(engine_script, fast_timing()).await
    }

    pub async fn start_with(engine_script: &str, timing: Timing) -> Self {
        Self::start_configured(engine_script, |config| config.timing = timing).await
    }

    /// Start with defaults adjusted by `configure`
    pub async fn start_configured<F>(engine_script: &str, configure: F) -> Self
    where
        F: FnOnce(&mut Config),
    {
        let dir = TempDir::new().expect("temp dir");
        let root = dir.path().to_path_buf();

        let song = root.join("songs").join(SONG_DIR);
        std::fs::create_dir_all(&song).unwrap();
        std::fs::write(song.join("Queen - Bohemian Rhapsody_melody.txt"), b"").unwrap();
        std::fs::create_dir_all(song.join("separated")).unwrap();
        std::fs::write(song.join("video_karaoke.mp4"), b"").unwrap();
        std::fs::write(root.join("engine.sh"), engine_script).unwrap();

        let mut config = Config::with_engine_root(&root);
        config.engine.program = "sh".to_string();
        config.engine.args = vec!["engine.sh".to_string()];
        config.timing = fast_timing();
        configure(&mut config);

        let catalog = Arc::new(Catalog::load(config.songs_dir.clone()).await);
        let bus = EventBus::new(64);
        let supervisor = Supervisor::spawn(&config, Arc::clone(&catalog), bus.clone());

        Self {
            dir,
            config,
            catalog,
            bus,
            supervisor,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn param_file(&self) -> PathBuf {
        self.config.engine.param_file.clone()
    }

    pub fn router(&self) -> axum::Router {
        create_router(AppContext {
            supervisor: self.supervisor.clone(),
            catalog: Arc::clone(&self.catalog),
            bus: self.bus.clone(),
        })
    }

    /// Open a connection and consume the initial `songs_list`
    pub async fn connect(&self) -> TestConnection {
        let (id, mut events) = self.supervisor.open_connection().unwrap();
        let first = recv(&mut events).await;
        assert_eq!(first.type_name(), "songs_list");
        TestConnection {
            id,
            events,
            supervisor: self.supervisor.clone(),
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.supervisor.snapshot().await.unwrap()
    }

    /// Pids the playing engine wrote to `launches.log`
    pub fn launched_pids(&self) -> Vec<u32> {
        let log = self.dir.path().join("launches.log");
        std::fs::read_to_string(log)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect()
    }
}

/// One registered control connection
pub struct TestConnection {
    pub id: ConnectionId,
    pub events: UnboundedReceiver<RelayEvent>,
    supervisor: SupervisorHandle,
}

impl TestConnection {
    /// Submit a raw JSON message as a client would send it
    pub fn send(&self, raw: Value) {
        let envelope = protocol::decode(raw.to_string().as_bytes()).unwrap();
        self.supervisor.submit(self.id, envelope).unwrap();
    }

    pub fn action(&self, action: &str, payload: Value) {
        self.send(serde_json::json!({ "action": action, "payload": payload }));
    }

    pub fn load_song(&self, song_id: &str) {
        self.action("load_song", serde_json::json!({ "songId": song_id }));
    }

    /// Next event of type `kind`, skipping others
    pub async fn expect(&mut self, kind: &str) -> RelayEvent {
        expect_event(&mut self.events, kind).await
    }

    /// Wait for `state{playing:true}` from the engine
    pub async fn expect_playing(&mut self) {
        loop {
            if let RelayEvent::State { playing: true, song: Some(_), .. } =
                self.expect("state").await
            {
                return;
            }
        }
    }

    /// Every event that arrives within `window`
    pub async fn drain(&mut self, window: Duration) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.events.recv()).await {
            events.push(event);
        }
        events
    }

    pub fn close(self) {
        self.supervisor.close_connection(self.id);
    }
}

pub async fn recv(events: &mut UnboundedReceiver<RelayEvent>) -> RelayEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("connection closed")
}

pub async fn expect_event(events: &mut UnboundedReceiver<RelayEvent>, kind: &str) -> RelayEvent {
    loop {
        let event = recv(events).await;
        if event.type_name() == kind {
            return event;
        }
    }
}

/// Poll the supervisor until `check` holds
pub async fn wait_for<F>(relay: &TestRelay, mut check: F) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        let snapshot = relay.snapshot().await;
        if check(&snapshot) {
            return snapshot;
        }
        assert!(tokio::time::Instant::now() < deadline, "condition not reached: {:?}", snapshot);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Whether a process with `pid` still exists
pub fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
