use thiserror::Error;

use crate::protocol::ResponseError;
use crate::transport::codec::CodecError;

/// Terminal failure of a request this side issued
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("remote returned an error: {0}")]
    Remote(ResponseError),

    #[error("request was cancelled")]
    Cancelled,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("response did not match the expected shape: {0}")]
    InvalidResponse(String),

    #[error("failed to serialize message: {0}")]
    Serialize(String),
}

/// Failure that ends the dispatch loop of a connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection is already running or closed")]
    AlreadyStarted,

    #[error(transparent)]
    Codec(#[from] CodecError),
}
