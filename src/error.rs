//! Error taxonomy for the client engine

use thiserror::Error;

use crate::protocol::status;

// Request errors print the raw code; use `protocol::status::describe` where
// a human-readable tag is wanted.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The peer is not speaking this protocol, or speaks a different release.
    /// Fatal; the connection is unusable and must not be retried.
    #[error("handshake failed: {0}")]
    Handshake(&'static str),

    /// The server rejected the init command (bad credentials, bad token,
    /// ...). Carries the raw init status code; fatal for this connection.
    #[error("init rejected with status {status}")]
    Init { status: u16 },

    /// The server failed one request. Carries the raw request status code;
    /// the session stays usable and the caller decides what to do.
    #[error("request failed with status {status}")]
    Request { status: u16 },

    /// The transport died or the listener terminated. Every blocked and
    /// future call on this session fails with this.
    #[error("connection lost")]
    ConnectionLost,

    /// A long transfer was cancelled at a chunk boundary.
    #[error("transfer cancelled")]
    Cancelled,

    /// A path string does not start with '~' or '#'.
    #[error("bad path syntax: {0}")]
    PathFormat(String),

    /// A path segment did not match any directory entry.
    #[error("no such entry: {0}")]
    PathNotFound(String),

    /// A name exceeds the wire's u8 length prefix, a reply body was
    /// malformed, or a similar local encoding failure.
    #[error("{0}")]
    Encoding(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Raw status carried by a Request error, if that is what this is.
    pub fn request_status(&self) -> Option<u16> {
        match self {
            Error::Request { status } => Some(*status),
            _ => None,
        }
    }

    pub fn is_end_of_file(&self) -> bool {
        self.request_status() == Some(status::END_OF_FILE)
    }
}
