// ABOUTME: NSQ client error types, covering transport, protocol and broker-reported failures
// ABOUTME: Broker error codes carry their own fatal/non-fatal classification per the NSQ wire protocol

use std::io;
use thiserror::Error;

use crate::frame::CodecError;

/// Errors arising from the transport/lifecycle of a single connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("connection closed")]
    Closed,

    #[error("operation timed out")]
    Timeout,
}

impl From<CodecError> for ConnectionError {
    fn from(err: CodecError) -> Self {
        ConnectionError::Protocol(err.to_string())
    }
}

/// One variant per broker error code nsqd can send in an `Error` frame.
/// `is_fatal()` reports whether the NSQ protocol treats the code as
/// connection ending; `E_FIN_FAILED`/`E_FINISH_FAILED`,
/// `E_REQ_FAILED`/`E_REQUEUE_FAILED` and `E_TOUCH_FAILED` are the non-fatal
/// set (`original_source/ansq/tcp/exceptions.py`'s `NSQErrorCode.fatal`
/// flags agree with this split).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerErrorCode {
    #[error("E_INVALID: {0}")]
    Invalid(String),
    #[error("E_BAD_BODY: {0}")]
    BadBody(String),
    #[error("E_BAD_TOPIC: {0}")]
    BadTopic(String),
    #[error("E_BAD_CHANNEL: {0}")]
    BadChannel(String),
    #[error("E_BAD_MESSAGE: {0}")]
    BadMessage(String),
    #[error("E_PUT_FAILED: {0}")]
    PutFailed(String),
    #[error("E_PUB_FAILED: {0}")]
    PubFailed(String),
    #[error("E_MPUB_FAILED: {0}")]
    MPubFailed(String),
    #[error("E_DPUB_FAILED: {0}")]
    DPubFailed(String),
    #[error("E_FIN_FAILED: {0}")]
    FinFailed(String),
    #[error("E_REQUEUE_FAILED: {0}")]
    RequeueFailed(String),
    #[error("E_TOUCH_FAILED: {0}")]
    TouchFailed(String),
    #[error("E_AUTH_DISABLED: {0}")]
    AuthDisabled(String),
    #[error("E_AUTH_FAILED: {0}")]
    AuthFailed(String),
    #[error("E_UNAUTHORIZED: {0}")]
    Unauthorized(String),
    #[error("{0}: {1}")]
    Other(String, String),
}

impl BrokerErrorCode {
    pub fn parse(code: &[u8], message: &[u8]) -> Self {
        let message = String::from_utf8_lossy(message).into_owned();
        match code {
            b"E_INVALID" => BrokerErrorCode::Invalid(message),
            b"E_BAD_BODY" => BrokerErrorCode::BadBody(message),
            b"E_BAD_TOPIC" => BrokerErrorCode::BadTopic(message),
            b"E_BAD_CHANNEL" => BrokerErrorCode::BadChannel(message),
            b"E_BAD_MESSAGE" => BrokerErrorCode::BadMessage(message),
            b"E_PUT_FAILED" => BrokerErrorCode::PutFailed(message),
            b"E_PUB_FAILED" => BrokerErrorCode::PubFailed(message),
            b"E_MPUB_FAILED" => BrokerErrorCode::MPubFailed(message),
            b"E_DPUB_FAILED" => BrokerErrorCode::DPubFailed(message),
            b"E_FIN_FAILED" | b"E_FINISH_FAILED" => BrokerErrorCode::FinFailed(message),
            b"E_REQ_FAILED" | b"E_REQUEUE_FAILED" => BrokerErrorCode::RequeueFailed(message),
            b"E_TOUCH_FAILED" => BrokerErrorCode::TouchFailed(message),
            b"E_AUTH_DISABLED" => BrokerErrorCode::AuthDisabled(message),
            b"E_AUTH_FAILED" => BrokerErrorCode::AuthFailed(message),
            b"E_UNAUTHORIZED" => BrokerErrorCode::Unauthorized(message),
            other => BrokerErrorCode::Other(String::from_utf8_lossy(other).into_owned(), message),
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BrokerErrorCode::FinFailed(_)
                | BrokerErrorCode::RequeueFailed(_)
                | BrokerErrorCode::TouchFailed(_)
        )
    }
}

/// The crate-wide error type returned by `Connection`, `Producer` and
/// `Consumer` operations.
#[derive(Debug, Error)]
pub enum NsqError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("no connected brokers available")]
    NoConnections,

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("invalid topic or channel name: {0}")]
    InvalidTopicOrChannel(String),

    #[error("broker error: {0}")]
    Broker(BrokerErrorCode),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("message expired before it could be finished, requeued or touched")]
    MessageExpired,
}

pub type NsqResult<T> = std::result::Result<T, NsqError>;
