//! Video library: deep links, browsing, search, delivery and the upload
//! dialogue.

use super::router::{Actor, DispatchRouter, Outcome};
use super::state::ConversationState;
use super::views::{join_keyboard, video_caption, video_list_keyboard, welcome_text, RetryTarget};
use crate::config::{MAX_VIDEO_NAME_CHARS, VIDEO_LIST_LIMIT};
use crate::error::BotError;
use crate::models::{NewVideo, Video};
use crate::transport::{
    ChatTarget, MediaKind, OutgoingMedia, OutgoingMessage, CAPTION_LIMIT,
};
use crate::utils::{deep_link, escape_html, visible_len};
use chrono::Utc;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

/// Sentinel accepted instead of a description
const SKIP_DESCRIPTION: &str = "skip";

impl DispatchRouter {
    pub(super) async fn start(&self, actor: &Actor, payload: &str) -> Result<Outcome, BotError> {
        if payload.is_empty() {
            self.reply(actor, OutgoingMessage::html(welcome_text(self.role(actor))))
                .await?;
            return Ok(Outcome::Handled);
        }
        self.open_video(actor, payload, RetryTarget::Start(payload.to_string()))
            .await
    }

    pub(super) async fn help(&self, actor: &Actor) -> Result<Outcome, BotError> {
        self.reply(
            actor,
            OutgoingMessage::html(super::views::help_text(self.role(actor))),
        )
        .await?;
        Ok(Outcome::Handled)
    }

    pub(super) async fn retry(
        &self,
        actor: &Actor,
        target: RetryTarget,
    ) -> Result<Outcome, BotError> {
        match target {
            RetryTarget::Start(id) => self.start(actor, &id).await,
            RetryTarget::Video(id) => {
                self.open_video(actor, &id, RetryTarget::Video(id.clone()))
                    .await
            }
            RetryTarget::Browse => self.browse(actor).await,
            RetryTarget::Random => self.random(actor).await,
            RetryTarget::Find(query) => self.find(actor, &query).await,
        }
    }

    /// Sends a video by id, behind the join-access gate
    pub(super) async fn open_video(
        &self,
        actor: &Actor,
        id: &str,
        retry: RetryTarget,
    ) -> Result<Outcome, BotError> {
        if !self.ensure_joined(actor, retry).await? {
            return Ok(Outcome::Handled);
        }
        match self.storage.get_video_by_id(id).await? {
            Some(video) => self.deliver_video(actor, &video).await?,
            None => {
                self.reply(
                    actor,
                    OutgoingMessage::plain("❌ Video not found. It may have been removed."),
                )
                .await?;
            }
        }
        Ok(Outcome::Handled)
    }

    pub(super) async fn browse(&self, actor: &Actor) -> Result<Outcome, BotError> {
        if !self.ensure_joined(actor, RetryTarget::Browse).await? {
            return Ok(Outcome::Handled);
        }
        let videos = self.storage.list_videos().await?;
        if videos.is_empty() {
            self.reply(actor, OutgoingMessage::plain("📭 No videos yet."))
                .await?;
            return Ok(Outcome::Handled);
        }
        let shown = &videos[..videos.len().min(VIDEO_LIST_LIMIT)];
        let text = format!(
            "📚 <b>Videos</b> ({} of {})\nPick one:",
            shown.len(),
            videos.len()
        );
        self.reply(
            actor,
            OutgoingMessage::html(text).with_keyboard(video_list_keyboard(shown)),
        )
        .await?;
        Ok(Outcome::Handled)
    }

    pub(super) async fn random(&self, actor: &Actor) -> Result<Outcome, BotError> {
        if !self.ensure_joined(actor, RetryTarget::Random).await? {
            return Ok(Outcome::Handled);
        }
        match self.storage.random_video().await? {
            Some(video) => self.deliver_video(actor, &video).await?,
            None => {
                self.reply(actor, OutgoingMessage::plain("📭 No videos yet."))
                    .await?;
            }
        }
        Ok(Outcome::Handled)
    }

    pub(super) async fn find(&self, actor: &Actor, query: &str) -> Result<Outcome, BotError> {
        if query.is_empty() {
            return Err(BotError::ValidationFailure(
                "Usage: /find <query>".to_string(),
            ));
        }
        if !self
            .ensure_joined(actor, RetryTarget::Find(query.to_string()))
            .await?
        {
            return Ok(Outcome::Handled);
        }
        let videos = self.storage.search_videos(query).await?;
        if videos.is_empty() {
            self.reply(
                actor,
                OutgoingMessage::html(format!(
                    "🔍 Nothing matches <i>{}</i>.",
                    escape_html(query)
                )),
            )
            .await?;
            return Ok(Outcome::Handled);
        }
        let shown = &videos[..videos.len().min(VIDEO_LIST_LIMIT)];
        self.reply(
            actor,
            OutgoingMessage::html(format!(
                "🔍 {} result(s) for <i>{}</i>:",
                videos.len(),
                escape_html(query)
            ))
            .with_keyboard(video_list_keyboard(shown)),
        )
        .await?;
        Ok(Outcome::Handled)
    }

    /// Sends the video, logs the view and schedules its deletion
    async fn deliver_video(&self, actor: &Actor, video: &Video) -> Result<(), BotError> {
        let media = OutgoingMedia {
            kind: MediaKind::Video,
            file_ref: video.media_ref.clone(),
            caption: Some(video_caption(video, self.cleanup.ttl())),
            keyboard: None,
        };
        let sent = self.transport.send_media(&actor.chat(), &media).await?;
        if let Err(e) = self.storage.log_video_view(&video.id, actor.id()).await {
            warn!(video_id = %video.id, error = %e, "Failed to log video view");
        }
        self.cleanup.schedule(sent.chat_id, sent.message_id);
        Ok(())
    }

    /// Checks channel membership when the join-access gate is on.
    ///
    /// Returns `false` after telling the user which channels to join.
    async fn ensure_joined(&self, actor: &Actor, retry: RetryTarget) -> Result<bool, BotError> {
        if !self.join_access.load(Ordering::Relaxed) || self.settings.is_admin(actor.id()) {
            return Ok(true);
        }

        let mut missing = Vec::new();
        for channel in self.settings.channels() {
            let Some(target) = ChatTarget::parse(&channel.target) else {
                warn!(channel = %channel.target, "Skipping malformed channel in join check");
                continue;
            };
            match self.transport.chat_membership(&target, actor.id()).await {
                Ok(status) if status.is_joined() => {}
                Ok(_) => missing.push(channel),
                Err(e) if e.kind().is_retryable() => return Err(e.into()),
                Err(e) => {
                    warn!(channel = %target, user_id = actor.id(), error = %e, "Membership lookup failed");
                    missing.push(channel);
                }
            }
        }

        if missing.is_empty() {
            return Ok(true);
        }
        self.reply(
            actor,
            OutgoingMessage::html(
                "🔒 <b>Join our channels to continue.</b>\nThen press the button below.",
            )
            .with_keyboard(join_keyboard(&missing, retry)),
        )
        .await?;
        Ok(false)
    }

    pub(super) async fn start_upload(
        &self,
        actor: &Actor,
        file_ref: String,
    ) -> Result<Outcome, BotError> {
        self.conversations
            .set(actor.id(), ConversationState::AwaitingVideoName { file_ref })
            .await;
        self.reply(
            actor,
            OutgoingMessage::plain("📥 Video received! Send a name for it, or /cancel."),
        )
        .await?;
        Ok(Outcome::Handled)
    }

    pub(super) async fn upload_name(
        &self,
        actor: &Actor,
        file_ref: String,
        text: &str,
    ) -> Result<Outcome, BotError> {
        let name = text.trim();
        if name.is_empty() {
            return Err(BotError::ValidationFailure(
                "The name cannot be empty.".to_string(),
            ));
        }
        if name.chars().count() > MAX_VIDEO_NAME_CHARS {
            return Err(BotError::ValidationFailure(format!(
                "The name is too long (max {MAX_VIDEO_NAME_CHARS} characters)."
            )));
        }

        self.conversations
            .set(
                actor.id(),
                ConversationState::AwaitingVideoDescription {
                    file_ref,
                    name: name.to_string(),
                },
            )
            .await;
        self.reply(
            actor,
            OutgoingMessage::html(format!(
                "✏️ Now send a description, or <code>{SKIP_DESCRIPTION}</code>."
            )),
        )
        .await?;
        Ok(Outcome::Handled)
    }

    /// Final upload step; the only place a video is created
    pub(super) async fn upload_description(
        &self,
        actor: &Actor,
        file_ref: String,
        name: String,
        text: &str,
    ) -> Result<Outcome, BotError> {
        let text = text.trim();
        let description = if text.eq_ignore_ascii_case(SKIP_DESCRIPTION) {
            String::new()
        } else {
            text.to_string()
        };

        let preview = Video {
            id: String::new(),
            media_ref: file_ref.clone(),
            name: name.clone(),
            description: description.clone(),
            created_at: Utc::now(),
        };
        if visible_len(&video_caption(&preview, self.cleanup.ttl())) > CAPTION_LIMIT {
            return Err(BotError::ValidationFailure(
                "The description is too long for a video caption.".to_string(),
            ));
        }

        // On failure the dialogue stays where it is so the user can resend.
        let video = self
            .storage
            .create_video(NewVideo {
                media_ref: file_ref,
                name,
                description,
            })
            .await?;
        self.conversations
            .set(actor.id(), ConversationState::Idle)
            .await;
        info!(video_id = %video.id, admin_id = actor.id(), "Video stored");
        self.audit(actor.id(), "video_uploaded", &video.id).await;

        let link = match self.transport.bot_username().await {
            Ok(username) => deep_link(&username, &video.id),
            Err(e) => {
                warn!(error = %e, "Bot username unavailable, sending id only");
                None
            }
        };
        let mut text = format!(
            "✅ <b>Video saved!</b>\nName: {}\nID: <code>{}</code>",
            escape_html(&video.name),
            video.id
        );
        if let Some(link) = link {
            text.push_str(&format!("\nLink: {link}"));
        }
        self.reply(actor, OutgoingMessage::html(text)).await?;
        Ok(Outcome::Handled)
    }
}
