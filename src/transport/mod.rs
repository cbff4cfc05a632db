//! Chat platform transport
//!
//! Everything the bot and the scheduler send goes through [`Transport`], so
//! the dispatch logic never touches the Telegram client directly.

mod telegram;

pub use telegram::TelegramTransport;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Maximum length of a text message, in characters
pub const TEXT_LIMIT: usize = crate::config::TELEGRAM_TEXT_LIMIT;
/// Maximum length of a media caption, in characters
pub const CAPTION_LIMIT: usize = crate::config::TELEGRAM_CAPTION_LIMIT;

/// Classified transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Target chat does not exist or is not visible to the bot
    ChatNotFound,
    /// The bot was blocked, kicked, or lacks rights
    Forbidden,
    /// Edit with identical content
    MessageNotModified,
    /// Message to edit or delete is gone
    MessageNotFound,
    /// Request rejected as malformed (bad file id, bad markup, ...)
    BadRequest,
    /// Connection-level failure
    Network,
    /// Flood control
    RateLimited,
    /// Anything else
    Other,
}

impl TransportErrorKind {
    /// Whether retrying the same request may succeed
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimited)
    }
}

/// Error returned by [`Transport`] operations
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    /// Create an error of the given kind
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classification of the failure
    #[must_use]
    pub const fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Raw platform message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Destination of a send: a numeric chat id or a public `@handle`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChatTarget {
    /// Numeric chat id (private chats and `-100...` channels)
    Id(i64),
    /// Public handle including the leading `@`
    Handle(String),
}

impl ChatTarget {
    /// Normalizes a configured or typed channel identifier.
    ///
    /// `@name` is kept, `-100123` becomes a numeric id, and a bare `name`
    /// gets an `@` prefix. Returns `None` for empty or malformed input.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some(handle) = raw.strip_prefix('@') {
            return valid_handle(handle).then(|| Self::Handle(raw.to_string()));
        }
        if raw.starts_with('-') || raw.chars().all(|c| c.is_ascii_digit()) {
            return raw.parse::<i64>().ok().map(Self::Id);
        }
        valid_handle(raw).then(|| Self::Handle(format!("@{raw}")))
    }
}

fn valid_handle(handle: &str) -> bool {
    !handle.is_empty() && handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl fmt::Display for ChatTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Handle(handle) => f.write_str(handle),
        }
    }
}

impl From<i64> for ChatTarget {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

/// What an inline button does when pressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    /// Callback data delivered back to the bot
    Callback(String),
    /// External link
    Url(String),
}

/// An inline button
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    /// Visible label
    pub label: String,
    /// Press behaviour
    pub action: ButtonAction,
}

impl Button {
    /// Button that sends callback data
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Callback(data.into()),
        }
    }

    /// Button that opens a link
    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Url(url.into()),
        }
    }
}

/// Inline keyboard: rows of buttons
pub type Keyboard = Vec<Vec<Button>>;

/// A text message to send or to edit into place
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Body
    pub text: String,
    /// Whether `text` is HTML markup
    pub html: bool,
    /// Optional inline keyboard
    pub keyboard: Option<Keyboard>,
}

impl OutgoingMessage {
    /// Plain text message
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            html: false,
            keyboard: None,
        }
    }

    /// HTML message; callers escape any user-provided parts
    pub fn html(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            html: true,
            keyboard: None,
        }
    }

    /// Attach a keyboard
    #[must_use]
    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// Media type of an outgoing or inbound attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Video file
    Video,
    /// Photo
    Photo,
}

/// A media message referring to an already uploaded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMedia {
    /// Media type
    pub kind: MediaKind,
    /// Platform file reference
    pub file_ref: String,
    /// Caption, sent as HTML
    pub caption: Option<String>,
    /// Optional inline keyboard
    pub keyboard: Option<Keyboard>,
}

/// Identifies a message accepted by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    /// Chat the message landed in
    pub chat_id: i64,
    /// Message id within that chat
    pub message_id: i32,
}

/// Membership of a user in a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipStatus {
    /// Chat creator
    Owner,
    /// Chat administrator
    Administrator,
    /// Regular member
    Member,
    /// Member with restrictions
    Restricted,
    /// Not in the chat
    Left,
    /// Kicked from the chat
    Banned,
}

impl MembershipStatus {
    /// Member, administrator or creator
    #[must_use]
    pub const fn is_joined(self) -> bool {
        matches!(self, Self::Owner | Self::Administrator | Self::Member)
    }
}

/// Outbound side of the chat platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a text message
    async fn send_text(
        &self,
        chat: &ChatTarget,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, TransportError>;

    /// Send a media message by file reference
    async fn send_media(
        &self,
        chat: &ChatTarget,
        media: &OutgoingMedia,
    ) -> Result<SentMessage, TransportError>;

    /// Replace the text and keyboard of an earlier message
    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError>;

    /// Show a typing indicator in a private chat; fails if the user blocked the bot
    async fn send_typing(&self, chat_id: i64) -> Result<(), TransportError>;

    /// Delete a message
    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError>;

    /// Membership of `user_id` in `chat`
    async fn chat_membership(
        &self,
        chat: &ChatTarget,
        user_id: i64,
    ) -> Result<MembershipStatus, TransportError>;

    /// Public username of the bot, without `@`
    async fn bot_username(&self) -> Result<String, TransportError>;
}
