//! Control plane errors and their wire mapping

use thiserror::Error;
use wardgate_db::StoreError;
use wardgate_proto::{Code, RpcStatus};

/// Session lookup failures.
///
/// A missing session and an expired one are separate outcomes; store
/// failures are passed through untouched.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session")]
    NoSession,

    #[error("session expired")]
    Expired,

    #[error(transparent)]
    Store(StoreError),
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("trigger already exists for {0}")]
    AlreadyExists(String),
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("gateway {0} already connected")]
    AlreadyConnected(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("persist: {0}")]
    DataLoss(String),

    #[error("read back: {0}")]
    Aborted(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("stream closed by peer")]
    StreamClosed,

    #[error("{0}")]
    Internal(String),
}

impl From<ControlError> for RpcStatus {
    fn from(err: ControlError) -> Self {
        let code = match &err {
            ControlError::Unauthenticated(_) => Code::Unauthenticated,
            ControlError::Unavailable(_) => Code::Unavailable,
            ControlError::AlreadyConnected(_) => Code::Aborted,
            ControlError::InvalidArgument(_) => Code::InvalidArgument,
            ControlError::NotFound(_) => Code::NotFound,
            ControlError::DataLoss(_) => Code::DataLoss,
            ControlError::Aborted(_) => Code::Aborted,
            ControlError::Session(SessionError::NoSession | SessionError::Expired) => {
                Code::Unauthenticated
            }
            ControlError::Session(SessionError::Store(_)) => Code::Internal,
            ControlError::Store(StoreError::NotFound(_)) => Code::NotFound,
            ControlError::Store(_) => Code::Internal,
            ControlError::StreamClosed => Code::Canceled,
            ControlError::Internal(_) => Code::Internal,
        };
        RpcStatus::new(code, err.to_string())
    }
}
