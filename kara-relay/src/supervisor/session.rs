//! The single karaoke session
//!
//! A session is the selected song, the chosen devices, the voice effects and
//! at most one engine process. It lives inside the supervisor task and is
//! never shared.

use kara_common::song::SongRef;
use kara_common::{Song, VoiceEffectSet};
use serde::Serialize;
use std::time::Instant;
use uuid::Uuid;

use super::engine::EngineProcess;

/// Device id used when the client does not name one
pub const DEFAULT_DEVICE: &str = "default";

/// Identifies one control connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Supervisor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session
    Idle,
    /// Song selected, no engine running
    Loaded,
    /// Engine process present
    Running,
    /// Engine being halted; the song stays selected
    Stopping,
}

/// Pause/resume echo
///
/// The engine cannot pause. `pause` and `resume` only change what the relay
/// reports: while `EchoPaused`, `tick` events are suppressed and `state`
/// replies say `playing:false`. The engine keeps running either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Playing,
    EchoPaused,
}

#[derive(Debug)]
pub struct Session {
    pub song: Song,
    pub input_device: String,
    pub output_device: String,
    pub state: SessionState,
    /// Start of the current engine process (session creation until then)
    pub started_at: Instant,
    pub effects: VoiceEffectSet,
    pub process: Option<EngineProcess>,
    pub transport: Transport,
    /// Connection that receives session events; `None` after it closed
    pub owner: Option<ConnectionId>,
}

impl Session {
    pub fn new(
        song: Song,
        input_device: Option<String>,
        output_device: Option<String>,
        owner: ConnectionId,
    ) -> Self {
        Self {
            song,
            input_device: input_device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            output_device: output_device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            state: SessionState::Loaded,
            started_at: Instant::now(),
            effects: VoiceEffectSet::default(),
            process: None,
            transport: Transport::Playing,
            owner: Some(owner),
        }
    }

    /// Replace song and devices in place; effects are kept
    pub fn reload(
        &mut self,
        song: Song,
        input_device: Option<String>,
        output_device: Option<String>,
        owner: ConnectionId,
    ) {
        self.song = song;
        self.input_device = input_device.unwrap_or_else(|| DEFAULT_DEVICE.to_string());
        self.output_device = output_device.unwrap_or_else(|| DEFAULT_DEVICE.to_string());
        self.owner = Some(owner);
        if self.process.is_none() {
            self.state = SessionState::Loaded;
        }
    }

    pub fn song_ref(&self) -> SongRef {
        SongRef::from(&self.song)
    }

    /// Seconds since the current process started
    pub fn position_sec(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    /// Whether `conn` may control this session
    ///
    /// A session whose owner has disconnected can be taken over.
    pub fn may_control(&self, conn: ConnectionId) -> bool {
        self.owner.map_or(true, |owner| owner == conn)
    }
}

/// Point-in-time view of the supervisor, for `/health` and tests
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song: Option<SongRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effects: Option<VoiceEffectSet>,
    /// Generation of the running engine process
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Seconds the running process has been up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_sec: Option<f64>,
    /// Processes terminated but not yet exited
    pub retiring: usize,
    /// Total engine launches since the relay started
    pub launches: u64,
}

impl SessionSnapshot {
    pub fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            song: None,
            effects: None,
            generation: None,
            pid: None,
            uptime_sec: None,
            retiring: 0,
            launches: 0,
        }
    }
}
