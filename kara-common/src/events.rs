//! Event types for the relay event system
//!
//! Provides the outbound event definitions sent to control clients and the
//! `EventBus` used to fan events out to monitoring subscribers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::effects::{EffectPatch, VoiceEffectSet};
use crate::song::{Song, SongRef};

/// Client-bound events
///
/// Every event is a JSON object tagged with a `type` discriminant. Delivery
/// is fire-and-forget: there is no acknowledgement or sequencing layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    /// Full catalog, pushed on connect and after `refresh_songs`
    SongsList { songs: Vec<Song> },

    /// Song resolved and recorded in the session
    #[serde(rename_all = "camelCase")]
    SongLoaded {
        song: Song,
        input_device: String,
        output_device: String,
    },

    /// Playing/stopped state with the current position
    #[serde(rename_all = "camelCase")]
    State {
        playing: bool,
        position_sec: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        song: Option<SongRef>,
    },

    /// Periodic position update while the engine runs
    #[serde(rename_all = "camelCase")]
    Tick { position_sec: f64 },

    /// Metadata of the song the engine is playing
    Meta { song: Song },

    /// Engine readiness reported by its own output
    BackendStatus { status: String, message: String },

    /// Single effect changed
    VoiceEffectUpdated { effect: String, value: Value },

    /// Several effects changed; carries the complete merged set
    VoiceEffectsUpdated { effects: VoiceEffectSet },

    /// Preset merged into the session's effects
    VoicePresetApplied { preset: String, settings: EffectPatch },

    /// Human-readable, non-fatal error
    Error { message: String },
}

impl RelayEvent {
    pub fn error(message: impl Into<String>) -> Self {
        RelayEvent::Error {
            message: message.into(),
        }
    }

    /// `state{playing:false, positionSec:0}`
    pub fn stopped() -> Self {
        RelayEvent::State {
            playing: false,
            position_sec: 0.0,
            song: None,
        }
    }

    /// Wire value of the `type` tag
    pub fn type_name(&self) -> &'static str {
        match self {
            RelayEvent::SongsList { .. } => "songs_list",
            RelayEvent::SongLoaded { .. } => "song_loaded",
            RelayEvent::State { .. } => "state",
            RelayEvent::Tick { .. } => "tick",
            RelayEvent::Meta { .. } => "meta",
            RelayEvent::BackendStatus { .. } => "backend_status",
            RelayEvent::VoiceEffectUpdated { .. } => "voice_effect_updated",
            RelayEvent::VoiceEffectsUpdated { .. } => "voice_effects_updated",
            RelayEvent::VoicePresetApplied { .. } => "voice_preset_applied",
            RelayEvent::Error { .. } => "error",
        }
    }
}

/// Broadcast bus for relay events
///
/// Every event delivered to a control connection is also published here so
/// that monitoring endpoints can observe the session without owning it.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RelayEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: RelayEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
