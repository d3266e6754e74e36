//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while decoding OSC/TUIO data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unexpected end of data")]
    UnexpectedEof,

    #[error("Unsupported OSC type tag: {0:?}")]
    UnsupportedTypeTag(char),

    #[error("Missing OSC type tag string")]
    MissingTypeTags,

    #[error("Not a TUIO address: {0:?}")]
    UnknownAddress(String),

    #[error("Unknown entity class tag: {0:?}")]
    UnknownClass(String),

    #[error("Truncated {0} message")]
    TruncatedMessage(&'static str),
}
