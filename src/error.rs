//! Error type shared by the realtime client, the tool dispatcher and the audio
//! plumbing.

use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;
use tokio_tungstenite::tungstenite::Error as WsError;

/// Error type for realtime session operations
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Tool registry error: {0}")]
    ToolRegistry(String),

    #[error("Audio device error: {0}")]
    Audio(String),

    #[error("Channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
