//! Transport-independent event dispatch.
//!
//! [`DispatchRouter::dispatch`] is the single entry point for inbound
//! events. It runs the access gate, routes the event by type and current
//! conversation state, and turns every error into a user notice. Nothing
//! escapes it but an [`Outcome`].

use super::access::{Access, AccessGate};
use super::cleanup::MessageCleanup;
use super::commands::Command;
use super::notice_cache::DeniedNoticeCache;
use super::state::{ConversationState, ConversationStore};
use super::views::{CallbackAction, RetryTarget};
use crate::config::{Role, Settings, DENIED_NOTICE_COOLDOWN_SECS};
use crate::error::{BotError, ErrorKind};
use crate::models::UserIdentity;
use crate::storage::Storage;
use crate::transport::{
    ChatTarget, MediaKind, OutgoingMessage, SentMessage, Transport, TEXT_LIMIT,
};
use crate::utils::{escape_html, split_long_message, truncate_str};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The user behind an event and the chat it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    /// Acting identity
    pub identity: UserIdentity,
    /// Chat to answer in
    pub chat_id: i64,
}

impl Actor {
    /// Actor in a private chat with the bot
    #[must_use]
    pub fn private(identity: UserIdentity) -> Self {
        let chat_id = identity.id;
        Self { identity, chat_id }
    }

    /// Numeric user id
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.identity.id
    }

    pub(super) fn chat(&self) -> ChatTarget {
        ChatTarget::Id(self.chat_id)
    }
}

/// Inbound event, already stripped of platform types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Recognized command
    Command(Command),
    /// Free text
    Text(String),
    /// Photo or video
    Media {
        /// Media type
        kind: MediaKind,
        /// Platform file reference
        file_ref: String,
        /// Caption, if any
        caption: Option<String>,
    },
    /// Inline button press
    Button {
        /// Callback data
        data: String,
        /// Message carrying the button
        message_id: i32,
    },
}

impl InboundEvent {
    /// Action label and details for the activity trail
    fn audit(&self) -> (String, String) {
        const DETAIL_CHARS: usize = 100;
        match self {
            Self::Command(cmd) => (
                cmd.action_label().to_string(),
                truncate_str(cmd.args(), DETAIL_CHARS),
            ),
            Self::Text(_) => ("text".to_string(), String::new()),
            Self::Media { kind, .. } => (
                match kind {
                    MediaKind::Video => "video",
                    MediaKind::Photo => "photo",
                }
                .to_string(),
                String::new(),
            ),
            Self::Button { data, .. } => ("button".to_string(), truncate_str(data, DETAIL_CHARS)),
        }
    }
}

/// How an event was disposed of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Processed
    Handled,
    /// No transition applies; nothing changed
    Ignored,
    /// Banned identity
    Denied,
    /// Role too low for the command
    Forbidden,
    /// Handling failed; the user was notified
    Rejected(ErrorKind),
}

/// Routes events to handlers, owning all per-process bot state
pub struct DispatchRouter {
    pub(super) settings: Arc<Settings>,
    pub(super) storage: Arc<dyn Storage>,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) conversations: ConversationStore,
    pub(super) cleanup: MessageCleanup,
    pub(super) join_access: AtomicBool,
    gate: AccessGate,
    denied_notices: DeniedNoticeCache,
}

impl DispatchRouter {
    /// Create a router; the join-access gate starts disabled
    #[must_use]
    pub fn new(
        settings: Arc<Settings>,
        storage: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
        cleanup: MessageCleanup,
    ) -> Self {
        let conversations = ConversationStore::new(settings.conversation_ttl());
        Self {
            gate: AccessGate::new(Arc::clone(&storage)),
            denied_notices: DeniedNoticeCache::new(
                Duration::from_secs(DENIED_NOTICE_COOLDOWN_SECS),
                10_000,
            ),
            settings,
            storage,
            transport,
            conversations,
            cleanup,
            join_access: AtomicBool::new(false),
        }
    }

    /// Conversation states, keyed by user id
    #[must_use]
    pub const fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Pending message deletions
    #[must_use]
    pub const fn cleanup(&self) -> &MessageCleanup {
        &self.cleanup
    }

    /// Whether non-admins must be members of the configured channels
    #[must_use]
    pub fn join_access_enabled(&self) -> bool {
        self.join_access.load(Ordering::Relaxed)
    }

    /// Handle one inbound event
    pub async fn dispatch(&self, actor: &Actor, event: InboundEvent) -> Outcome {
        let (action, details) = event.audit();
        match self.gate.admit(&actor.identity, &action, &details).await {
            Access::Granted => {}
            Access::Banned => {
                info!(user_id = actor.id(), action = %action, "Denied banned user");
                self.notify_denied(actor).await;
                return Outcome::Denied;
            }
            Access::Unavailable => {
                let err = BotError::TransientInfra("ban list unavailable".to_string());
                self.report(actor, &err).await;
                return Outcome::Rejected(err.kind());
            }
        }

        let result = match event {
            InboundEvent::Command(cmd) => self.handle_command(actor, cmd).await,
            InboundEvent::Text(text) => self.handle_text(actor, &text).await,
            InboundEvent::Media {
                kind,
                file_ref,
                caption,
            } => {
                self.handle_media(actor, kind, file_ref, caption.as_deref())
                    .await
            }
            InboundEvent::Button { data, message_id } => {
                self.handle_button(actor, &data, message_id).await
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                self.report(actor, &err).await;
                Outcome::Rejected(err.kind())
            }
        }
    }

    async fn handle_command(&self, actor: &Actor, cmd: Command) -> Result<Outcome, BotError> {
        let required = cmd.required_role();
        if self.role(actor) < required {
            let text = if required == Role::Owner {
                "⛔️ This command is for the owner only."
            } else {
                "⛔️ This command is for administrators only."
            };
            self.reply(actor, OutgoingMessage::plain(text)).await?;
            return Ok(Outcome::Forbidden);
        }

        match cmd {
            Command::Start(payload) => self.start(actor, payload.trim()).await,
            Command::Ping => {
                self.reply(actor, OutgoingMessage::plain("🏓 Pong!")).await?;
                Ok(Outcome::Handled)
            }
            Command::Help => self.help(actor).await,
            Command::Browse => self.browse(actor).await,
            Command::Random => self.random(actor).await,
            Command::Find(query) => self.find(actor, query.trim()).await,
            Command::Delete(id) => self.delete_video(actor, id.trim()).await,
            Command::Database => self.database(actor).await,
            Command::Admin => self.admins(actor).await,
            Command::Stats => self.stats(actor).await,
            Command::Analytics => self.analytics(actor).await,
            Command::BanUser(args) => self.ban_user(actor, &args).await,
            Command::UnbanUser(args) => self.unban_user(actor, &args).await,
            Command::BannedUsers => self.banned_users(actor).await,
            Command::BulkBan(args) => self.bulk_ban(actor, &args).await,
            Command::UserInfo(args) => self.user_info(actor, &args).await,
            Command::SearchUsers(query) => self.search_users(actor, query.trim()).await,
            Command::RecentActivity => self.recent_activity(actor).await,
            Command::Broadcast(text) => self.broadcast_all(actor, text.trim()).await,
            Command::CleanupUsers => self.cleanup_users(actor).await,
            Command::ChannelBroadcast => self.begin_channel_broadcast(actor).await,
            Command::Schedule(args) => self.schedule(actor, args.trim(), None).await,
            Command::Cancel => self.cancel(actor).await,
            Command::JoinAccess => self.toggle_join_access(actor).await,
        }
    }

    async fn handle_text(&self, actor: &Actor, text: &str) -> Result<Outcome, BotError> {
        match self.conversations.get(actor.id()).await {
            ConversationState::AwaitingVideoName { file_ref } => {
                self.upload_name(actor, file_ref, text).await
            }
            ConversationState::AwaitingVideoDescription { file_ref, name } => {
                self.upload_description(actor, file_ref, name, text).await
            }
            state @ ConversationState::AwaitingBroadcastContent { .. } => {
                self.broadcast_content(actor, state, BroadcastPayload::Text(text))
                    .await
            }
            ConversationState::AwaitingBroadcastChannel | ConversationState::Idle => {
                Ok(Outcome::Ignored)
            }
        }
    }

    async fn handle_media(
        &self,
        actor: &Actor,
        kind: MediaKind,
        file_ref: String,
        caption: Option<&str>,
    ) -> Result<Outcome, BotError> {
        let state = self.conversations.get(actor.id()).await;

        if let ConversationState::AwaitingBroadcastContent { .. } = state {
            let payload = match kind {
                MediaKind::Photo => BroadcastPayload::Photo {
                    file_ref: &file_ref,
                    caption: caption.unwrap_or_default(),
                },
                MediaKind::Video => BroadcastPayload::Video,
            };
            return self.broadcast_content(actor, state, payload).await;
        }

        match kind {
            // A new video restarts an unfinished upload; the old name is dropped.
            MediaKind::Video => {
                if !self.settings.is_admin(actor.id())
                    || state == ConversationState::AwaitingBroadcastChannel
                {
                    return Ok(Outcome::Ignored);
                }
                self.start_upload(actor, file_ref).await
            }
            MediaKind::Photo => match caption.and_then(schedule_caption_args) {
                Some(args) if self.settings.is_admin(actor.id()) => {
                    self.schedule(actor, args, Some(file_ref)).await
                }
                _ => Ok(Outcome::Ignored),
            },
        }
    }

    async fn handle_button(
        &self,
        actor: &Actor,
        data: &str,
        message_id: i32,
    ) -> Result<Outcome, BotError> {
        let Some(action) = CallbackAction::parse(data) else {
            debug!(data, "Unknown callback data");
            return Ok(Outcome::Ignored);
        };

        match action {
            CallbackAction::Video(id) => {
                self.open_video(actor, &id, RetryTarget::Video(id.clone()))
                    .await
            }
            CallbackAction::Retry(target) => self.retry(actor, target).await,
            CallbackAction::BroadcastChannel(slot) => {
                if !self.settings.is_admin(actor.id()) {
                    return Ok(Outcome::Forbidden);
                }
                self.choose_channel(actor, slot, message_id).await
            }
            CallbackAction::BroadcastCancel => self.cancel_broadcast(actor, Some(message_id)).await,
        }
    }

    pub(super) fn role(&self, actor: &Actor) -> Role {
        self.settings.role_of(actor.id())
    }

    pub(super) async fn reply(
        &self,
        actor: &Actor,
        message: OutgoingMessage,
    ) -> Result<SentMessage, BotError> {
        Ok(self.transport.send_text(&actor.chat(), &message).await?)
    }

    /// Sends HTML that may exceed the text limit, split on line boundaries
    pub(super) async fn reply_long(&self, actor: &Actor, text: &str) -> Result<(), BotError> {
        for part in split_long_message(text, TEXT_LIMIT) {
            self.reply(actor, OutgoingMessage::html(part)).await?;
        }
        Ok(())
    }

    /// Best-effort activity entry for an action with a result
    pub(super) async fn audit(&self, user_id: i64, action: &str, details: &str) {
        if let Err(e) = self.storage.log_activity(user_id, action, details).await {
            warn!(user_id, action, error = %e, "Failed to log activity");
        }
    }

    async fn notify_denied(&self, actor: &Actor) {
        if !self.denied_notices.should_send(actor.id()).await {
            return;
        }
        let notice = OutgoingMessage::plain("🚫 You are banned from using this bot.");
        match self.transport.send_text(&actor.chat(), &notice).await {
            Ok(_) => self.denied_notices.mark_sent(actor.id()).await,
            Err(e) => warn!(user_id = actor.id(), error = %e, "Failed to send denied notice"),
        }
    }

    async fn report(&self, actor: &Actor, err: &BotError) {
        match err.kind() {
            ErrorKind::ValidationFailure | ErrorKind::AccessDenied => {
                debug!(user_id = actor.id(), error = %err, "Request rejected");
            }
            _ => warn!(user_id = actor.id(), error = %err, "Request failed"),
        }
        let notice = notice_for(err, self.settings.is_admin(actor.id()));
        if let Err(e) = self
            .transport
            .send_text(&actor.chat(), &OutgoingMessage::html(notice))
            .await
        {
            warn!(user_id = actor.id(), error = %e, "Failed to send error notice");
        }
    }
}

/// Content offered while a channel post is pending
pub(super) enum BroadcastPayload<'a> {
    Text(&'a str),
    Photo { file_ref: &'a str, caption: &'a str },
    Video,
}

/// Arguments of a `/schedule` command carried in a photo caption
fn schedule_caption_args(caption: &str) -> Option<&str> {
    let caption = caption.trim_start();
    let (head, rest) = caption
        .split_once(char::is_whitespace)
        .unwrap_or((caption, ""));
    let name = head.split('@').next()?;
    (name == "/schedule").then(|| rest.trim())
}

/// User-facing notice for an error. Internal detail is shown to admins only.
pub(crate) fn notice_for(err: &BotError, detailed: bool) -> String {
    let base = match err {
        BotError::AccessDenied => return "🚫 You are banned from using this bot.".to_string(),
        BotError::ValidationFailure(msg) => return format!("⚠️ {}", escape_html(msg)),
        BotError::InvalidConversationState(_) => {
            "⚠️ This operation is no longer valid. Please start over."
        }
        BotError::DeliveryFailure(_) => "❌ Delivery failed.",
        BotError::TransientInfra(_) => "⏳ Service temporarily unavailable. Please try again later.",
    };
    if detailed {
        format!("{base}\n<code>{}</code>", escape_html(&err.to_string()))
    } else {
        base.to_string()
    }
}
