//! Realtime speech session client
//!
//! Streams microphone audio to a realtime speech model over a WebSocket,
//! plays back the spoken reply, keeps a running transcript and answers the
//! model's function calls with local tools.

pub mod audio;
pub mod chunker;
pub mod client;
pub mod config;
pub mod console;
pub mod error;
pub mod events;
pub mod helper;
pub mod outbox;
pub mod protocol;
pub mod runner;
pub mod session;
pub mod tools;
pub mod transcript;

pub use client::{Endpoint, Provider, RealtimeClient};
pub use error::{RealtimeError, Result};
pub use outbox::Outbox;
pub use protocol::{ClientMessage, ServerMessage, SessionConfig, SessionOptions};
pub use runner::{Command, SessionRunner, Settings};
pub use session::{Session, SessionState, UnknownToolPolicy};
pub use tools::ToolRegistry;
