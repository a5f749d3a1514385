//! Error taxonomy. Every handler converts a `RelayError` into either a
//! GraphQL field error (the inbound event's ack) or a unicast `error` server
//! event -- it never escapes to the connection layer as a panic, and never
//! unwinds across a room's dispatch boundary (see `dispatcher`).

use async_graphql::{ErrorExtensions, FieldError};
use thiserror::Error;

use crate::ids::{MessageId, ParticipantId, QueueItemId, RoomCode};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("room {0} not found")]
    RoomNotFound(RoomCode),

    #[error("participant {0} not found")]
    ParticipantNotFound(ParticipantId),

    #[error("queue item {0} not found")]
    QueueItemNotFound(QueueItemId),

    #[error("chat message {0} not found")]
    MessageNotFound(MessageId),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflicting state: {0}")]
    Conflict(String),

    #[error("upstream unavailable: {0}")]
    TransientExternal(String),
}

impl RelayError {
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::RoomNotFound(_)
            | RelayError::ParticipantNotFound(_)
            | RelayError::QueueItemNotFound(_)
            | RelayError::MessageNotFound(_) => "NOT_FOUND",
            RelayError::InvalidInput(_) => "INVALID_INPUT",
            RelayError::Conflict(_) => "CONFLICT",
            RelayError::TransientExternal(_) => "TRANSIENT_EXTERNAL",
        }
    }
}

impl ErrorExtensions for RelayError {
    fn extend(&self) -> FieldError {
        self.extend_with(|err, e| e.set("code", err.code()))
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
