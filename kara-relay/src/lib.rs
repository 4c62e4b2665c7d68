//! # Karaoke Relay Library (kara-relay)
//!
//! Control plane between karaoke front ends and an external audio engine.
//!
//! **Purpose:** Accept control commands over a WebSocket, own the lifecycle of
//! at most one engine process, relay voice effect changes to it (live through
//! the parameter file, or by relaunching), and report session state back.
//!
//! **Architecture:** a single supervisor task owns the session; connections,
//! engine output readers and timers only post messages to it.

pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod param_channel;
pub mod supervisor;

pub use catalog::Catalog;
pub use config::{Args, Config};
pub use error::{Error, Result, SessionError};
pub use supervisor::{Supervisor, SupervisorHandle};
