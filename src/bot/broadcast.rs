//! Channel broadcast dialogue, owner broadcasts and scheduled posts.

use super::router::{Actor, BroadcastPayload, DispatchRouter, Outcome};
use super::state::ConversationState;
use super::views::{cancel_keyboard, channel_picker_keyboard};
use crate::config::{ConfiguredChannel, Role, SCHEDULE_LIST_LIMIT};
use crate::error::BotError;
use crate::models::{ContentType, NewScheduledBroadcast, ScheduledBroadcast};
use crate::transport::{
    ChatTarget, MediaKind, OutgoingMedia, OutgoingMessage, TransportErrorKind, CAPTION_LIMIT,
    TEXT_LIMIT,
};
use crate::utils::{escape_html, parse_schedule_time, truncate_str};
use chrono::{DateTime, Utc};
use std::sync::atomic::Ordering;
use tracing::{info, warn};

const SCHEDULE_USAGE: &str =
    "Usage: /schedule <channel> <YYYY-MM-DD HH:MM | +30m | +2h | +1d> <text>";

/// Validated content of a channel post
enum ChannelPost {
    Text(OutgoingMessage),
    Photo(OutgoingMedia),
}

/// Parsed `/schedule` arguments
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduleRequest {
    channel: ConfiguredChannel,
    time: DateTime<Utc>,
    text: String,
}

/// Resolves a slot number or a configured identifier to its channel
fn resolve_channel(channels: &[ConfiguredChannel], raw: &str) -> Option<ConfiguredChannel> {
    if let Ok(slot) = raw.parse::<u8>() {
        if let Some(channel) = channels.iter().find(|c| c.slot == slot) {
            return Some(channel.clone());
        }
    }
    let wanted = ChatTarget::parse(raw)?;
    channels
        .iter()
        .find(|c| ChatTarget::parse(&c.target).as_ref() == Some(&wanted))
        .cloned()
}

/// Splits off the first whitespace-separated token
fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    s.split_once(char::is_whitespace)
        .map_or((s, ""), |(head, tail)| (head, tail.trim_start()))
}

/// Parses `<channel> <time> <text>`; an absolute time takes two tokens
fn parse_schedule_args(
    channels: &[ConfiguredChannel],
    args: &str,
    now: DateTime<Utc>,
) -> Result<ScheduleRequest, BotError> {
    let usage = || BotError::ValidationFailure(SCHEDULE_USAGE.to_string());

    let (raw_channel, rest) = split_token(args);
    if raw_channel.is_empty() {
        return Err(usage());
    }
    let channel = resolve_channel(channels, raw_channel).ok_or_else(|| {
        BotError::ValidationFailure(format!("Unknown channel: {raw_channel}"))
    })?;

    let (first, rest) = split_token(rest);
    let (time_text, text) = if first.starts_with('+') {
        (first.to_string(), rest)
    } else {
        let (second, rest) = split_token(rest);
        if second.is_empty() {
            return Err(usage());
        }
        (format!("{first} {second}"), rest)
    };

    let time = parse_schedule_time(&time_text, now).ok_or_else(usage)?;
    if time <= now {
        return Err(BotError::ValidationFailure(
            "The scheduled time must be in the future.".to_string(),
        ));
    }
    Ok(ScheduleRequest {
        channel,
        time,
        text: text.trim().to_string(),
    })
}

fn check_text_length(text: &str, limit: usize, what: &str) -> Result<(), BotError> {
    let len = text.chars().count();
    if len > limit {
        return Err(BotError::ValidationFailure(format!(
            "The {what} is too long ({len} characters, max {limit})."
        )));
    }
    Ok(())
}

/// The user blocked the bot or no longer exists
const fn is_unreachable(kind: TransportErrorKind) -> bool {
    matches!(
        kind,
        TransportErrorKind::Forbidden | TransportErrorKind::ChatNotFound
    )
}

fn schedule_line(broadcast: &ScheduledBroadcast) -> String {
    format!(
        "\n• #{} {} → {} [{}] {}",
        broadcast.id,
        broadcast.scheduled_time.format("%Y-%m-%d %H:%M"),
        escape_html(&broadcast.target_channel),
        broadcast.status,
        escape_html(&truncate_str(&broadcast.content, 40))
    )
}

impl DispatchRouter {
    pub(super) async fn begin_channel_broadcast(&self, actor: &Actor) -> Result<Outcome, BotError> {
        let channels = self.settings.channels();
        if channels.is_empty() {
            return Err(BotError::ValidationFailure(
                "No broadcast channels are configured.".to_string(),
            ));
        }
        self.conversations
            .set(actor.id(), ConversationState::AwaitingBroadcastChannel)
            .await;
        self.reply(
            actor,
            OutgoingMessage::plain("📢 Choose a channel:")
                .with_keyboard(channel_picker_keyboard(&channels)),
        )
        .await?;
        Ok(Outcome::Handled)
    }

    pub(super) async fn choose_channel(
        &self,
        actor: &Actor,
        slot: u8,
        message_id: i32,
    ) -> Result<Outcome, BotError> {
        if self.conversations.get(actor.id()).await != ConversationState::AwaitingBroadcastChannel {
            return Ok(Outcome::Ignored);
        }
        let Some(channel) = self.settings.channel_by_slot(slot) else {
            self.conversations
                .set(actor.id(), ConversationState::Idle)
                .await;
            return Err(BotError::ValidationFailure(
                "That channel is no longer configured.".to_string(),
            ));
        };

        let label = channel.label();
        self.conversations
            .set(
                actor.id(),
                ConversationState::AwaitingBroadcastContent {
                    channel: channel.target.clone(),
                    channel_label: label.clone(),
                    initiator_id: actor.id(),
                },
            )
            .await;

        let prompt = OutgoingMessage::html(format!(
            "📢 <b>{}</b> ({}) selected.\nSend the text or photo to post.",
            escape_html(&label),
            escape_html(&channel.target)
        ))
        .with_keyboard(cancel_keyboard());
        if let Err(e) = self
            .transport
            .edit_message(actor.chat_id, message_id, &prompt)
            .await
        {
            if e.kind() != TransportErrorKind::MessageNotModified {
                warn!(error = %e, "Failed to update channel picker, sending a new prompt");
                self.reply(actor, prompt).await?;
            }
        }
        Ok(Outcome::Handled)
    }

    /// Delivers the post of a channel broadcast dialogue. The state is
    /// single-use: it is cleared before delivery whatever the result.
    pub(super) async fn broadcast_content(
        &self,
        actor: &Actor,
        state: ConversationState,
        payload: BroadcastPayload<'_>,
    ) -> Result<Outcome, BotError> {
        let ConversationState::AwaitingBroadcastContent {
            channel,
            channel_label,
            initiator_id,
        } = state
        else {
            return Err(BotError::InvalidConversationState(
                "no broadcast in progress".to_string(),
            ));
        };

        if initiator_id != actor.id() || !self.settings.is_admin(actor.id()) {
            self.conversations
                .set(actor.id(), ConversationState::Idle)
                .await;
            warn!(
                user_id = actor.id(),
                initiator_id, "Broadcast content from a different identity discarded"
            );
            return Err(BotError::InvalidConversationState(format!(
                "broadcast started by {initiator_id}"
            )));
        }

        // Oversized content leaves the dialogue where it is.
        let post = match payload {
            BroadcastPayload::Video => {
                return Err(BotError::ValidationFailure(
                    "Only text or a photo can be posted. Send one, or /cancel.".to_string(),
                ))
            }
            BroadcastPayload::Text(text) => {
                if text.trim().is_empty() {
                    return Err(BotError::ValidationFailure(
                        "The post cannot be empty.".to_string(),
                    ));
                }
                check_text_length(text, TEXT_LIMIT, "text")?;
                ChannelPost::Text(OutgoingMessage::plain(text))
            }
            BroadcastPayload::Photo { file_ref, caption } => {
                // Telegram counts the caption after entity parsing.
                check_text_length(caption, CAPTION_LIMIT, "caption")?;
                let caption = escape_html(caption);
                ChannelPost::Photo(OutgoingMedia {
                    kind: MediaKind::Photo,
                    file_ref: file_ref.to_string(),
                    caption: (!caption.is_empty()).then_some(caption),
                    keyboard: None,
                })
            }
        };

        self.conversations
            .set(actor.id(), ConversationState::Idle)
            .await;
        let Some(target) = ChatTarget::parse(&channel) else {
            return Err(BotError::ValidationFailure(format!(
                "{channel_label} is not a valid chat identifier."
            )));
        };

        let sent = match &post {
            ChannelPost::Text(message) => self.transport.send_text(&target, message).await,
            ChannelPost::Photo(media) => self.transport.send_media(&target, media).await,
        };

        match sent {
            Ok(_) => {
                info!(admin_id = actor.id(), channel = %target, "Channel broadcast sent");
                self.audit(actor.id(), "channel_broadcast_sent", &channel).await;
                self.reply(
                    actor,
                    OutgoingMessage::html(format!(
                        "✅ Posted to <b>{}</b>.",
                        escape_html(&channel_label)
                    )),
                )
                .await?;
                Ok(Outcome::Handled)
            }
            Err(e) => {
                warn!(admin_id = actor.id(), channel = %target, error = %e, "Channel broadcast failed");
                self.audit(
                    actor.id(),
                    "channel_broadcast_failed",
                    &format!("{channel}: {}", e.message()),
                )
                .await;
                Err(e.into())
            }
        }
    }

    pub(super) async fn cancel(&self, actor: &Actor) -> Result<Outcome, BotError> {
        let state = self.conversations.take(actor.id()).await;
        let text = match state {
            ConversationState::Idle => "Nothing to cancel.",
            ref s if s.is_broadcast() => {
                self.audit(actor.id(), "broadcast_cancelled", "").await;
                "❌ Broadcast cancelled."
            }
            _ => "❌ Cancelled.",
        };
        self.reply(actor, OutgoingMessage::plain(text)).await?;
        Ok(Outcome::Handled)
    }

    /// Cancel button of the broadcast dialogue
    pub(super) async fn cancel_broadcast(
        &self,
        actor: &Actor,
        message_id: Option<i32>,
    ) -> Result<Outcome, BotError> {
        if !self.conversations.get(actor.id()).await.is_broadcast() {
            return Ok(Outcome::Ignored);
        }
        self.conversations
            .set(actor.id(), ConversationState::Idle)
            .await;
        self.audit(actor.id(), "broadcast_cancelled", "").await;

        let notice = OutgoingMessage::plain("❌ Broadcast cancelled.");
        let edited = match message_id {
            Some(id) => self
                .transport
                .edit_message(actor.chat_id, id, &notice)
                .await
                .is_ok(),
            None => false,
        };
        if !edited {
            self.reply(actor, notice).await?;
        }
        Ok(Outcome::Handled)
    }

    /// Owner broadcast to every non-banned user
    pub(super) async fn broadcast_all(&self, actor: &Actor, text: &str) -> Result<Outcome, BotError> {
        if text.is_empty() {
            return Err(BotError::ValidationFailure(
                "Usage: /broadcast <text>".to_string(),
            ));
        }
        check_text_length(text, TEXT_LIMIT, "text")?;

        let users = self.storage.list_active_users().await?;
        info!(admin_id = actor.id(), recipients = users.len(), "Broadcast started");
        self.reply(
            actor,
            OutgoingMessage::plain(format!("📣 Broadcasting to {} users...", users.len())),
        )
        .await?;

        let message = OutgoingMessage::plain(text);
        let delay = self.settings.broadcast_delay();
        let (mut sent, mut removed, mut failed) = (0usize, 0usize, 0usize);
        for user_id in users {
            match self
                .transport
                .send_text(&ChatTarget::Id(user_id), &message)
                .await
            {
                Ok(_) => sent += 1,
                Err(e) if is_unreachable(e.kind()) => {
                    self.forget_user(user_id).await;
                    removed += 1;
                }
                Err(e) => {
                    warn!(user_id, error = %e, "Broadcast delivery failed");
                    failed += 1;
                }
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        info!(sent, removed, failed, "Broadcast finished");
        self.audit(
            actor.id(),
            "broadcast",
            &format!("sent={sent} removed={removed} failed={failed}"),
        )
        .await;
        self.reply(
            actor,
            OutgoingMessage::plain(format!(
                "✅ Broadcast finished.\nSent: {sent}\nRemoved (blocked): {removed}\nFailed: {failed}"
            )),
        )
        .await?;
        Ok(Outcome::Handled)
    }

    /// Pings every known user and forgets the ones who blocked the bot
    pub(super) async fn cleanup_users(&self, actor: &Actor) -> Result<Outcome, BotError> {
        let users = self.storage.list_active_users().await?;
        self.reply(
            actor,
            OutgoingMessage::plain(format!("🧹 Starting cleanup of {} users...", users.len())),
        )
        .await?;

        let delay = self.settings.broadcast_delay();
        let (mut removed, mut failed) = (0usize, 0usize);
        for user_id in users {
            match self.transport.send_typing(user_id).await {
                Ok(()) => {}
                Err(e) if is_unreachable(e.kind()) => {
                    self.forget_user(user_id).await;
                    removed += 1;
                }
                Err(e) => {
                    warn!(user_id, error = %e, "User reachability check failed");
                    failed += 1;
                }
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        info!(removed, failed, "User cleanup finished");
        self.audit(
            actor.id(),
            "cleanup_users",
            &format!("removed={removed} failed={failed}"),
        )
        .await;
        self.reply(
            actor,
            OutgoingMessage::plain(format!(
                "✅ Cleanup complete.\nRemoved (blocked): {removed}\nUnreachable for other reasons: {failed}"
            )),
        )
        .await?;
        Ok(Outcome::Handled)
    }

    async fn forget_user(&self, user_id: i64) {
        if let Err(e) = self.storage.remove_user(user_id).await {
            warn!(user_id, error = %e, "Failed to remove unreachable user");
        }
    }

    /// Lists scheduled posts, or schedules one. `photo` is set when the
    /// command came as a photo caption.
    pub(super) async fn schedule(
        &self,
        actor: &Actor,
        args: &str,
        photo: Option<String>,
    ) -> Result<Outcome, BotError> {
        if args.is_empty() && photo.is_none() {
            return self.list_schedule(actor).await;
        }

        let request = parse_schedule_args(&self.settings.channels(), args, Utc::now())?;
        let content_type = match photo {
            Some(_) => {
                check_text_length(&request.text, CAPTION_LIMIT, "caption")?;
                ContentType::Photo
            }
            None => {
                if request.text.is_empty() {
                    return Err(BotError::ValidationFailure(SCHEDULE_USAGE.to_string()));
                }
                check_text_length(&request.text, TEXT_LIMIT, "text")?;
                ContentType::Text
            }
        };

        let broadcast = self
            .storage
            .create_scheduled_broadcast(NewScheduledBroadcast {
                admin_id: actor.id(),
                target_channel: request.channel.target.clone(),
                content_type,
                content: request.text,
                media_ref: photo,
                scheduled_time: request.time,
            })
            .await?;
        info!(
            broadcast_id = broadcast.id,
            admin_id = actor.id(),
            channel = %broadcast.target_channel,
            at = %broadcast.scheduled_time,
            "Broadcast scheduled"
        );
        self.audit(
            actor.id(),
            "broadcast_scheduled",
            &format!("#{} {}", broadcast.id, broadcast.target_channel),
        )
        .await;

        self.reply(
            actor,
            OutgoingMessage::html(format!(
                "🗓 Scheduled #{} to <b>{}</b> at {} UTC.",
                broadcast.id,
                escape_html(&request.channel.label()),
                broadcast.scheduled_time.format("%Y-%m-%d %H:%M")
            )),
        )
        .await?;
        Ok(Outcome::Handled)
    }

    async fn list_schedule(&self, actor: &Actor) -> Result<Outcome, BotError> {
        let owner_filter = (self.role(actor) != Role::Owner).then(|| actor.id());
        let broadcasts = self
            .storage
            .list_scheduled_broadcasts(owner_filter, SCHEDULE_LIST_LIMIT)
            .await?;
        if broadcasts.is_empty() {
            self.reply(
                actor,
                OutgoingMessage::html(format!(
                    "🗓 No scheduled posts.\n{}",
                    escape_html(SCHEDULE_USAGE)
                )),
            )
            .await?;
            return Ok(Outcome::Handled);
        }
        let mut text = format!("🗓 <b>Scheduled posts</b> ({})", broadcasts.len());
        for broadcast in &broadcasts {
            text.push_str(&schedule_line(broadcast));
        }
        text.push_str("\n\nTimes are UTC.");
        self.reply_long(actor, &text).await?;
        Ok(Outcome::Handled)
    }

    pub(super) async fn toggle_join_access(&self, actor: &Actor) -> Result<Outcome, BotError> {
        let enabled = !self.join_access.fetch_xor(true, Ordering::Relaxed);
        info!(admin_id = actor.id(), enabled, "Join access toggled");
        self.audit(
            actor.id(),
            "join_access",
            if enabled { "on" } else { "off" },
        )
        .await;
        let text = if enabled {
            "🔒 Join access enabled: users must join the configured channels."
        } else {
            "🔓 Join access disabled."
        };
        self.reply(actor, OutgoingMessage::plain(text)).await?;
        Ok(Outcome::Handled)
    }
}
