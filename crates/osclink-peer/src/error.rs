//! Peer error types

use osclink_router::RouterError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PeerError>;

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("invalid peer configuration: {0}")]
    Configuration(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("listener error: {0}")]
    Listener(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("router error: {0}")]
    Router(#[from] RouterError),
}

impl From<PeerError> for RouterError {
    fn from(e: PeerError) -> Self {
        match e {
            PeerError::Router(inner) => inner,
            other => RouterError::Send(other.to_string()),
        }
    }
}
