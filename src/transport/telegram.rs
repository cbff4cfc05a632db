//! Telegram implementation of [`Transport`].
//!
//! Every send goes through [`retry_telegram_operation`], so transient network
//! failures and flood limits are retried with backoff before surfacing.

use super::{
    ButtonAction, ChatTarget, Keyboard, MediaKind, MembershipStatus, OutgoingMedia,
    OutgoingMessage, SentMessage, Transport, TransportError, TransportErrorKind,
};
use crate::utils::retry_telegram_operation;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction, ChatId, FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId,
    ParseMode, Recipient, UserId,
};
use teloxide::{ApiError, RequestError};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// [`Transport`] backed by a teloxide [`Bot`]
pub struct TelegramTransport {
    bot: Bot,
    username: RwLock<Option<String>>,
}

impl TelegramTransport {
    /// Wrap a bot client
    #[must_use]
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            username: RwLock::new(None),
        }
    }

    /// Underlying client, for the dispatcher
    #[must_use]
    pub const fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Fetches the bot identity and caches its username.
    ///
    /// # Errors
    ///
    /// Returns the classified `getMe` failure.
    pub async fn refresh_identity(&self) -> Result<String, TransportError> {
        let me = retry_telegram_operation(|| async {
            self.bot.get_me().await.map_err(classify)
        })
        .await?;
        let username = me.user.username.clone().ok_or_else(|| {
            TransportError::new(TransportErrorKind::Other, "bot account has no username")
        })?;
        *self.username.write().await = Some(username.clone());
        debug!(username = %username, "Bot identity refreshed");
        Ok(username)
    }
}

/// Maps a teloxide error onto the transport taxonomy
pub(crate) fn classify(err: RequestError) -> TransportError {
    let kind = match &err {
        RequestError::Api(api) => match api {
            ApiError::BotBlocked
            | ApiError::BotKicked
            | ApiError::BotKickedFromSupergroup
            | ApiError::UserDeactivated
            | ApiError::CantInitiateConversation
            | ApiError::CantTalkWithBots
            | ApiError::NotEnoughRightsToPostMessages => TransportErrorKind::Forbidden,
            ApiError::ChatNotFound | ApiError::UserNotFound => TransportErrorKind::ChatNotFound,
            ApiError::MessageNotModified => TransportErrorKind::MessageNotModified,
            ApiError::MessageToEditNotFound
            | ApiError::MessageToDeleteNotFound
            | ApiError::MessageIdInvalid => TransportErrorKind::MessageNotFound,
            ApiError::WrongFileId
            | ApiError::WrongFileIdOrUrl
            | ApiError::MessageTextIsEmpty
            | ApiError::MessageIsTooLong => TransportErrorKind::BadRequest,
            _ => TransportErrorKind::Other,
        },
        RequestError::RetryAfter(_) => TransportErrorKind::RateLimited,
        RequestError::Network(_) | RequestError::Io(_) => TransportErrorKind::Network,
        _ => TransportErrorKind::Other,
    };
    TransportError::new(kind, err.to_string())
}

fn recipient(chat: &ChatTarget) -> Recipient {
    match chat {
        ChatTarget::Id(id) => Recipient::Id(ChatId(*id)),
        ChatTarget::Handle(handle) => Recipient::ChannelUsername(handle.clone()),
    }
}

fn markup(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
        .iter()
        .map(|row| {
            row.iter()
                .filter_map(|button| match &button.action {
                    ButtonAction::Callback(data) => Some(InlineKeyboardButton::callback(
                        button.label.clone(),
                        data.clone(),
                    )),
                    ButtonAction::Url(url) => match reqwest::Url::parse(url) {
                        Ok(url) => Some(InlineKeyboardButton::url(button.label.clone(), url)),
                        Err(e) => {
                            warn!(url = %url, error = %e, "Dropping button with invalid URL");
                            None
                        }
                    },
                })
                .collect()
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}

fn sent(msg: &Message) -> SentMessage {
    SentMessage {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(
        &self,
        chat: &ChatTarget,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, TransportError> {
        let msg = retry_telegram_operation(|| async {
            let mut req = self.bot.send_message(recipient(chat), message.text.clone());
            if message.html {
                req = req.parse_mode(ParseMode::Html);
            }
            if let Some(keyboard) = &message.keyboard {
                req = req.reply_markup(markup(keyboard));
            }
            req.await.map_err(classify)
        })
        .await?;
        Ok(sent(&msg))
    }

    async fn send_media(
        &self,
        chat: &ChatTarget,
        media: &OutgoingMedia,
    ) -> Result<SentMessage, TransportError> {
        let msg = retry_telegram_operation(|| async {
            let file = InputFile::file_id(FileId(media.file_ref.clone()));
            match media.kind {
                MediaKind::Video => {
                    let mut req = self.bot.send_video(recipient(chat), file);
                    if let Some(caption) = &media.caption {
                        req = req.caption(caption.clone()).parse_mode(ParseMode::Html);
                    }
                    if let Some(keyboard) = &media.keyboard {
                        req = req.reply_markup(markup(keyboard));
                    }
                    req.await.map_err(classify)
                }
                MediaKind::Photo => {
                    let mut req = self.bot.send_photo(recipient(chat), file);
                    if let Some(caption) = &media.caption {
                        req = req.caption(caption.clone()).parse_mode(ParseMode::Html);
                    }
                    if let Some(keyboard) = &media.keyboard {
                        req = req.reply_markup(markup(keyboard));
                    }
                    req.await.map_err(classify)
                }
            }
        })
        .await?;
        Ok(sent(&msg))
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError> {
        retry_telegram_operation(|| async {
            let mut req = self.bot.edit_message_text(
                ChatId(chat_id),
                MessageId(message_id),
                message.text.clone(),
            );
            if message.html {
                req = req.parse_mode(ParseMode::Html);
            }
            if let Some(keyboard) = &message.keyboard {
                req = req.reply_markup(markup(keyboard));
            }
            req.await.map(|_| ()).map_err(classify)
        })
        .await
    }

    async fn send_typing(&self, chat_id: i64) -> Result<(), TransportError> {
        retry_telegram_operation(|| async {
            self.bot
                .send_chat_action(ChatId(chat_id), ChatAction::Typing)
                .await
                .map(|_| ())
                .map_err(classify)
        })
        .await
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError> {
        retry_telegram_operation(|| async {
            self.bot
                .delete_message(ChatId(chat_id), MessageId(message_id))
                .await
                .map(|_| ())
                .map_err(classify)
        })
        .await
    }

    async fn chat_membership(
        &self,
        chat: &ChatTarget,
        user_id: i64,
    ) -> Result<MembershipStatus, TransportError> {
        let user = u64::try_from(user_id).map_err(|_| {
            TransportError::new(TransportErrorKind::BadRequest, "user id must be positive")
        })?;
        let member = retry_telegram_operation(|| async {
            self.bot
                .get_chat_member(recipient(chat), UserId(user))
                .await
                .map_err(classify)
        })
        .await?;
        let kind = &member.kind;
        let status = if kind.is_owner() {
            MembershipStatus::Owner
        } else if kind.is_administrator() {
            MembershipStatus::Administrator
        } else if kind.is_restricted() {
            MembershipStatus::Restricted
        } else if kind.is_left() {
            MembershipStatus::Left
        } else if kind.is_banned() {
            MembershipStatus::Banned
        } else {
            MembershipStatus::Member
        };
        Ok(status)
    }

    async fn bot_username(&self) -> Result<String, TransportError> {
        if let Some(username) = self.username.read().await.clone() {
            return Ok(username);
        }
        self.refresh_identity().await
    }
}
