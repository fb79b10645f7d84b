use thiserror::Error;

use crate::model::EntityKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("session required: no session id given and none known")]
    SessionRequired,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("no acknowledgement for request {request_id}")]
    AckTimeout { request_id: String },
    #[error("connection closed while awaiting acknowledgement")]
    ConnectionClosed,
    #[error("delivery cancelled: client closed")]
    Cancelled,
    #[error("stale reference: {kind} {id} does not exist")]
    StaleReference { kind: EntityKind, id: String },
    #[error("not found: {kind} {id}")]
    NotFound { kind: EntityKind, id: String },
    #[error("layer {0} cannot be deleted")]
    ProtectedLayer(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl Error {
    /// Transport-level failures a caller may retry; everything else is a rejection.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed(_) | Error::AckTimeout { .. } | Error::ConnectionClosed
        )
    }

    pub(crate) fn stale(kind: EntityKind, id: &str) -> Self {
        Error::StaleReference { kind, id: id.to_string() }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
