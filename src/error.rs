//! Error taxonomy for event dispatch and broadcast delivery.
//!
//! Storage and transport failures keep their own error types; this module
//! classifies them into the handful of outcomes the bot reacts to.

use crate::storage::StorageError;
use crate::transport::TransportError;
use thiserror::Error;

/// Errors raised while handling an inbound event or delivering a broadcast.
#[derive(Error, Debug)]
pub enum BotError {
    /// The acting identity is banned.
    #[error("access denied")]
    AccessDenied,
    /// Conversation state is stale, unexpected, or bound to another identity.
    #[error("invalid conversation state: {0}")]
    InvalidConversationState(String),
    /// The transport rejected a send.
    #[error("delivery failed: {0}")]
    DeliveryFailure(#[source] TransportError),
    /// Input violates a transport limit or a format rule; nothing was sent.
    #[error("validation failed: {0}")]
    ValidationFailure(String),
    /// Storage or transport is unreachable.
    #[error("temporarily unavailable: {0}")]
    TransientInfra(String),
}

/// Field-less discriminant of [`BotError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`BotError::AccessDenied`].
    AccessDenied,
    /// See [`BotError::InvalidConversationState`].
    InvalidConversationState,
    /// See [`BotError::DeliveryFailure`].
    DeliveryFailure,
    /// See [`BotError::ValidationFailure`].
    ValidationFailure,
    /// See [`BotError::TransientInfra`].
    TransientInfra,
}

impl BotError {
    /// Discriminant for matching and logging.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AccessDenied => ErrorKind::AccessDenied,
            Self::InvalidConversationState(_) => ErrorKind::InvalidConversationState,
            Self::DeliveryFailure(_) => ErrorKind::DeliveryFailure,
            Self::ValidationFailure(_) => ErrorKind::ValidationFailure,
            Self::TransientInfra(_) => ErrorKind::TransientInfra,
        }
    }
}

impl From<StorageError> for BotError {
    fn from(err: StorageError) -> Self {
        Self::TransientInfra(err.to_string())
    }
}

impl From<TransportError> for BotError {
    fn from(err: TransportError) -> Self {
        if err.kind().is_retryable() {
            Self::TransientInfra(err.to_string())
        } else {
            Self::DeliveryFailure(err)
        }
    }
}
