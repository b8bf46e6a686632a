use thiserror::Error;

use crate::{codes::ApiCode, payload::PayloadError};

/// Errors a caller can observe when a submitted command settles.
///
/// Transport failures and transient codes never show up here: the channel
/// absorbs them by retrying. A rejection therefore always means a terminal
/// server answer, a rollback to resubmit, or a local cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The server answered with a non-retryable error code
    #[error("Server rejected the command: {code}")]
    Application { code: ApiCode },

    /// The server rolled back a batch starting at `index`; resubmit a trimmed batch
    #[error("Batch rolled back at index {index}. Resubmit the commands from that index on")]
    RolledBack { index: usize },

    /// The channel was cancelled or reinitialized before a server answer was received
    #[error("Command cancelled before the server answered. The operation may or may not have been applied")]
    Cancelled,

    /// The response body could not be parsed; local state is no longer trustworthy
    #[error("Malformed response ({reason}). The client must reload")]
    Malformed { reason: String },

    /// The submitted value cannot be sent as a command
    #[error("Invalid payload: {reason}")]
    InvalidPayload { reason: String },

    /// The requested channel slot does not exist or was removed
    #[error("Channel {index} is not registered")]
    UnknownChannel { index: usize },

    /// An internal bookkeeping rule was violated
    #[error("Internal invariant violated: {reason}")]
    Invariant { reason: String },
}

impl ApiError {
    pub fn application(code: i64) -> Self {
        match ApiCode::try_from_i64(code) {
            Ok(code) => ApiError::Application { code },
            Err(_) => ApiError::Invariant {
                reason: format!("non-negative value {} treated as error code", code),
            },
        }
    }

    /// True when the server never produced an answer for the command.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    pub fn code(&self) -> Option<ApiCode> {
        match self {
            ApiError::Application { code } => Some(*code),
            _ => None,
        }
    }
}

/// Failures of a single HTTP exchange. Converted into retries by the channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection could not be established or broke mid-body
    #[error("Network failure: {reason}")]
    Network { reason: String },

    /// Server answered with a non-200 HTTP status
    #[error("Unexpected HTTP status {status}")]
    Status { status: u16 },

    /// The exchange was aborted locally
    #[error("Exchange aborted")]
    Aborted,

    /// The request could not be built (bad endpoint or query)
    #[error("Invalid request target '{target}'")]
    InvalidTarget { target: String },
}

impl From<PayloadError> for ApiError {
    fn from(err: PayloadError) -> Self {
        ApiError::InvalidPayload {
            reason: err.to_string(),
        }
    }
}
