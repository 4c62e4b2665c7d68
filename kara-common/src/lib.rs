//! # Karaoke Relay Common Library
//!
//! Shared code for the relay server and its client:
//! - Song catalog entries (`Song`)
//! - Voice effect parameters, hot/cold classification and presets
//! - Outbound event types (`RelayEvent`) and the in-process `EventBus`
//! - Inbound envelope decoding and command parsing
//! - Audio device list types
//! - Configuration file helpers

pub mod config;
pub mod devices;
pub mod effects;
pub mod error;
pub mod events;
pub mod protocol;
pub mod song;

pub use effects::{EffectClass, EffectKey, EffectPatch, VoiceEffectSet, VoicePreset};
pub use error::{Error, Result};
pub use events::{EventBus, RelayEvent};
pub use protocol::{Command, Envelope};
pub use song::Song;
