use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::Error;

/// Everything a connection is keyed and established by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectTarget {
    pub session_id: String,
    pub client_id: String,
    pub credential: Option<String>,
}

impl ConnectTarget {
    /// Two targets share a connection iff session and credential match.
    pub fn same_key(&self, other: &ConnectTarget) -> bool {
        self.session_id == other.session_id && self.credential == other.credential
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("{0}")]
    Io(String),
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::ConnectionClosed => Error::ConnectionClosed,
            TransportError::Io(msg) => Error::ConnectionFailed(msg),
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn Connection>, TransportError>;
}

/// One established bidirectional text channel.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), TransportError>;
    /// Inbound frames. Handed out once; later calls get a closed receiver.
    fn recv(&self) -> mpsc::Receiver<String>;
    async fn close(&self);
}
