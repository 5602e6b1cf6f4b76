//! Coordinator errors.

use thiserror::Error;

use crate::net::messages::CtrlCommand;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Net(#[from] crate::net::Error),

    #[error("{0}")]
    Config(#[from] crate::config::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("could not spawn node {0}: {1}")]
    Spawn(usize, #[source] std::io::Error),

    #[error("node {0} did not register within the window")]
    RegistrationTimeout(usize),

    #[error("no control channel to node {0}")]
    NoControlChannel(usize),

    #[error("node {0} rejected {1:?}")]
    CtrlRejected(usize, CtrlCommand),

    #[error("coordinator is already running")]
    AlreadyRunning,
}
