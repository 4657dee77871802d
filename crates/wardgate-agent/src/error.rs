//! Agent-side failure taxonomy

use thiserror::Error;
use wardgate_proto::{Code, RpcStatus};

/// Why a sync attempt against the control plane ended
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Control plane unreachable, or it refused the stream for now
    #[error("control plane unavailable: {0}")]
    Unavailable(String),

    /// Transport broke after the stream was established
    #[error("lost connection to control plane: {0}")]
    LostConnection(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The control plane no longer recognises our session
    #[error("session invalidated by control plane")]
    InvalidSession,

    #[error("canceled")]
    Canceled,

    #[error("session deadline exceeded")]
    DeadlineExceeded,

    #[error("{0}")]
    Unexpected(String),
}

impl From<RpcStatus> for SyncError {
    fn from(status: RpcStatus) -> Self {
        match status.code {
            Code::Unavailable => SyncError::Unavailable(status.message),
            Code::Unauthenticated => SyncError::Unauthenticated(status.message),
            Code::Canceled => SyncError::Canceled,
            Code::DeadlineExceeded => SyncError::DeadlineExceeded,
            code => SyncError::Unexpected(format!("{}: {}", code, status.message)),
        }
    }
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Command(String),
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("no identity token available; run `wardgate login --token <TOKEN>`")]
    Missing,

    #[error("read token: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while starting or running the agent process
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("load runtime state: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("local socket: {0}")]
    Socket(String),
}
