//! Error types surfaced by the connection layer.
//!
//! Transport failures after a session is live are not represented here:
//! they end the reader or writer task and fire the closed signal instead.

use std::io;

/// Failure of the connect operation. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to connect to {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid nickname {0:?}")]
    InvalidNick(String),
    #[error("connection closed before registration completed")]
    ClosedBeforeWelcome,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("command {0} already has a consumer")]
    AlreadyRouted(String),
}

/// Failure to enqueue an outbound line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("connection is closed")]
    Closed,
    #[error("outbound line contains a line break")]
    InvalidLine,
}
