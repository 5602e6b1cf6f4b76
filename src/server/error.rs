//! Storage node errors.

use thiserror::Error;

use crate::net::messages::Status;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Net(#[from] crate::net::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("replica rejected forwarded put: {0}")]
    ForwardFailed(Status),

    #[error("catch-up push rejected: {0}")]
    PushRejected(Status),

    #[error("node is already running")]
    AlreadyRunning,
}
