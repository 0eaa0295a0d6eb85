use serde::ser::Serializer;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("transport unavailable: {0}")]
    Resource(String),
    #[error("stream client is shut down")]
    ClientClosed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("json error: {0}")]
    SimdJson(#[from] simd_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(value))
    }
}

impl serde::Serialize for StreamError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Failure of a best-effort audio side effect. Kept apart from [`StreamError`] so a
/// broken speaker can never surface as a streaming failure.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("audio output unavailable: {0}")]
    AudioUnavailable(String),
    #[error("speech synthesis failed: {0}")]
    Speech(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
