use std::net::SocketAddr;

use thiserror::Error;

use crate::lifecycle::TaskState;

#[derive(Error, Debug)]
pub enum EchoError {
    #[error("Invalid port '{0}': expected an integer between 1 and 65535")]
    InvalidPort(String),

    #[error("Task already started (state: {0})")]
    AlreadyStarted(TaskState),

    #[error("Failed to bind port {port}: {source}")]
    BindFailure {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection fault from {peer}: {source}")]
    ConnectionFault {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Socket closed without a stop request: {0}")]
    UnexpectedStop(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EchoError>;
