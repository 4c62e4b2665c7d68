//! # Karaoke Relay Client (kara-client)
//!
//! Client side of the relay control connection:
//! - `RelayClient`: WebSocket connection with bounded reconnect and a
//!   listener registry for inbound events
//! - `ReconnectPolicy`: linear backoff with an attempt limit
//! - `devices`: audio device discovery with a built-in fallback list

pub mod client;
pub mod devices;
pub mod error;
pub mod reconnect;

pub use client::{ClientState, ListenerId, RelayClient};
pub use error::{ClientError, Result};
pub use reconnect::ReconnectPolicy;
