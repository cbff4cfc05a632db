//! Admin reports and moderation commands.

use super::router::{Actor, DispatchRouter, Outcome};
use super::state::ConversationState;
use crate::config::{RECENT_ACTIVITY_LIMIT, REPORT_LIST_LIMIT};
use crate::error::BotError;
use crate::models::{ActivityEntry, UserIdentity};
use crate::transport::OutgoingMessage;
use crate::utils::{escape_html, truncate_str};
use std::fmt::Write as _;
use std::sync::atomic::Ordering;
use tracing::info;

const DEFAULT_BAN_REASON: &str = "No reason given";
const USER_INFO_ACTIVITY: i64 = 5;

/// Result of banning one id in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
enum BanOutcome {
    Banned(i64),
    Immune(i64),
    Invalid(String),
    Failed(i64),
}

fn parse_user_id(raw: &str, usage: &str) -> Result<i64, BotError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| BotError::ValidationFailure(format!("Usage: {usage}")))
}

/// Splits `<id> <id> ... [| reason]`
fn parse_bulk_args(args: &str) -> (Vec<&str>, &str) {
    let (ids, reason) = args.split_once('|').unwrap_or((args, ""));
    let ids = ids
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .collect();
    (ids, reason.trim())
}

fn format_activity(entries: &[ActivityEntry]) -> String {
    let mut text = String::new();
    for entry in entries {
        let _ = write!(
            text,
            "\n• {} {} <b>{}</b>",
            entry.timestamp.format("%m-%d %H:%M"),
            escape_html(&entry.user.label()),
            escape_html(&entry.action)
        );
        if !entry.details.is_empty() {
            let _ = write!(text, ": {}", escape_html(&truncate_str(&entry.details, 60)));
        }
    }
    text
}

fn identity_line(identity: &UserIdentity) -> String {
    format!(
        "<code>{}</code> {}",
        identity.id,
        escape_html(&identity.label())
    )
}

impl DispatchRouter {
    pub(super) async fn stats(&self, actor: &Actor) -> Result<Outcome, BotError> {
        let stats = self.storage.stats().await?;
        let text = format!(
            "📊 <b>Statistics</b>\n\
             Users: {}\n\
             Banned: {}\n\
             Videos: {} ({} with description)\n\
             Pending scheduled posts: {}\n\
             Active dialogues: {}\n\
             Pending deletions: {}\n\
             Join access: {}",
            stats.users,
            stats.banned,
            stats.videos,
            stats.videos_with_description,
            stats.pending_broadcasts,
            self.conversations.active_count(),
            self.cleanup.pending(),
            if self.join_access.load(Ordering::Relaxed) {
                "on"
            } else {
                "off"
            }
        );
        self.reply(actor, OutgoingMessage::html(text)).await?;
        Ok(Outcome::Handled)
    }

    pub(super) async fn analytics(&self, actor: &Actor) -> Result<Outcome, BotError> {
        let summary = self.storage.analytics_summary().await?;
        let popular = self.storage.popular_videos(REPORT_LIST_LIMIT as i64).await?;

        let mut text = format!(
            "📈 <b>Analytics</b>\nTotal views: {}\nViews today: {}",
            summary.total_views, summary.views_today
        );
        if let Some(top) = &summary.top_video {
            let _ = write!(
                text,
                "\nTop video: {} ({} views)",
                escape_html(&top.name),
                top.views
            );
        }
        if !popular.is_empty() {
            text.push_str("\n\n<b>Most viewed</b>");
            for (rank, video) in popular.iter().enumerate() {
                let _ = write!(
                    text,
                    "\n{}. {} ({})",
                    rank + 1,
                    escape_html(&video.name),
                    video.views
                );
            }
        }
        self.reply(actor, OutgoingMessage::html(text)).await?;
        Ok(Outcome::Handled)
    }

    pub(super) async fn database(&self, actor: &Actor) -> Result<Outcome, BotError> {
        let videos = self.storage.list_videos().await?;
        if videos.is_empty() {
            self.reply(actor, OutgoingMessage::plain("📭 No videos stored."))
                .await?;
            return Ok(Outcome::Handled);
        }
        let mut text = format!("🗄 <b>Videos</b> ({})", videos.len());
        for video in &videos {
            let _ = write!(
                text,
                "\n<code>{}</code> {}",
                video.id,
                escape_html(&truncate_str(&video.name, 60))
            );
        }
        self.reply_long(actor, &text).await?;
        Ok(Outcome::Handled)
    }

    pub(super) async fn delete_video(&self, actor: &Actor, id: &str) -> Result<Outcome, BotError> {
        if id.is_empty() {
            return Err(BotError::ValidationFailure(
                "Usage: /delete <video_id>".to_string(),
            ));
        }
        let text = if self.storage.delete_video(id).await? {
            info!(video_id = id, admin_id = actor.id(), "Video deleted");
            self.audit(actor.id(), "video_deleted", id).await;
            format!("🗑 Video <code>{}</code> deleted.", escape_html(id))
        } else {
            format!("❌ No video with id <code>{}</code>.", escape_html(id))
        };
        self.reply(actor, OutgoingMessage::html(text)).await?;
        Ok(Outcome::Handled)
    }

    pub(super) async fn admins(&self, actor: &Actor) -> Result<Outcome, BotError> {
        let mut text = String::from("👮 <b>Administrators</b>");
        if self.settings.owner != 0 {
            let owner = self.known_identity(self.settings.owner).await;
            let _ = write!(text, "\n👑 {}", identity_line(&owner));
        }
        let mut admins: Vec<i64> = self
            .settings
            .admins()
            .into_iter()
            .filter(|id| *id != self.settings.owner)
            .collect();
        admins.sort_unstable();
        for id in admins {
            let admin = self.known_identity(id).await;
            let _ = write!(text, "\n• {}", identity_line(&admin));
        }
        self.reply(actor, OutgoingMessage::html(text)).await?;
        Ok(Outcome::Handled)
    }

    /// Stored identity for display, or a bare one
    async fn known_identity(&self, user_id: i64) -> UserIdentity {
        match self.storage.find_user(user_id).await {
            Ok(Some(record)) => record.identity,
            _ => UserIdentity::bare(user_id),
        }
    }

    pub(super) async fn ban_user(&self, actor: &Actor, args: &str) -> Result<Outcome, BotError> {
        let args = args.trim();
        let (raw_id, reason) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
        let target = parse_user_id(raw_id, "/ban_user <user_id> [reason]")?;
        let reason = if reason.trim().is_empty() {
            DEFAULT_BAN_REASON
        } else {
            reason.trim()
        };

        let text = match self.ban_one(actor, target, reason).await {
            BanOutcome::Banned(id) => format!(
                "🚫 User <code>{id}</code> banned.\nReason: {}",
                escape_html(reason)
            ),
            BanOutcome::Immune(_) => {
                return Err(BotError::ValidationFailure(
                    "Administrators and the owner cannot be banned.".to_string(),
                ))
            }
            BanOutcome::Invalid(_) | BanOutcome::Failed(_) => {
                return Err(BotError::TransientInfra("ban could not be stored".to_string()))
            }
        };
        self.reply(actor, OutgoingMessage::html(text)).await?;
        Ok(Outcome::Handled)
    }

    /// Bans one id; batch callers collect the outcomes independently
    async fn ban_one(&self, actor: &Actor, target: i64, reason: &str) -> BanOutcome {
        if self.settings.is_admin(target) {
            return BanOutcome::Immune(target);
        }
        match self.storage.ban_user(target, actor.id(), reason).await {
            Ok(()) => {
                // A banned user's dialogue must not be resumable after an unban.
                self.conversations
                    .set(target, ConversationState::Idle)
                    .await;
                info!(user_id = target, admin_id = actor.id(), reason, "User banned");
                self.audit(actor.id(), "ban_user", &format!("{target}: {reason}"))
                    .await;
                BanOutcome::Banned(target)
            }
            Err(e) => {
                tracing::warn!(user_id = target, error = %e, "Failed to ban user");
                BanOutcome::Failed(target)
            }
        }
    }

    pub(super) async fn unban_user(&self, actor: &Actor, args: &str) -> Result<Outcome, BotError> {
        let target = parse_user_id(args, "/unban_user <user_id>")?;
        let text = if self.storage.unban_user(target).await? {
            info!(user_id = target, admin_id = actor.id(), "User unbanned");
            self.audit(actor.id(), "unban_user", &target.to_string())
                .await;
            format!("✅ User <code>{target}</code> unbanned.")
        } else {
            format!("ℹ️ User <code>{target}</code> was not banned.")
        };
        self.reply(actor, OutgoingMessage::html(text)).await?;
        Ok(Outcome::Handled)
    }

    pub(super) async fn bulk_ban(&self, actor: &Actor, args: &str) -> Result<Outcome, BotError> {
        let (ids, reason) = parse_bulk_args(args);
        if ids.is_empty() {
            return Err(BotError::ValidationFailure(
                "Usage: /bulk_ban <id> <id> ... [| reason]".to_string(),
            ));
        }
        let reason = if reason.is_empty() {
            DEFAULT_BAN_REASON
        } else {
            reason
        };

        let mut outcomes = Vec::with_capacity(ids.len());
        for raw in ids {
            let outcome = match raw.parse::<i64>() {
                Ok(id) => self.ban_one(actor, id, reason).await,
                Err(_) => BanOutcome::Invalid(raw.to_string()),
            };
            outcomes.push(outcome);
        }

        let count = |pred: fn(&BanOutcome) -> bool| outcomes.iter().filter(|o| pred(o)).count();
        let mut text = format!(
            "🚫 <b>Bulk ban</b>\nBanned: {}\nSkipped (admins): {}\nInvalid ids: {}\nFailed: {}",
            count(|o| matches!(o, BanOutcome::Banned(_))),
            count(|o| matches!(o, BanOutcome::Immune(_))),
            count(|o| matches!(o, BanOutcome::Invalid(_))),
            count(|o| matches!(o, BanOutcome::Failed(_))),
        );
        for outcome in &outcomes {
            match outcome {
                BanOutcome::Invalid(raw) => {
                    let _ = write!(text, "\n• invalid: {}", escape_html(raw));
                }
                BanOutcome::Failed(id) => {
                    let _ = write!(text, "\n• failed: <code>{id}</code>");
                }
                BanOutcome::Banned(_) | BanOutcome::Immune(_) => {}
            }
        }
        self.reply_long(actor, &text).await?;
        Ok(Outcome::Handled)
    }

    pub(super) async fn banned_users(&self, actor: &Actor) -> Result<Outcome, BotError> {
        let bans = self.storage.list_banned().await?;
        if bans.is_empty() {
            self.reply(actor, OutgoingMessage::plain("✅ No banned users."))
                .await?;
            return Ok(Outcome::Handled);
        }
        let mut text = format!("🚫 <b>Banned users</b> ({})", bans.len());
        for ban in &bans {
            let _ = write!(
                text,
                "\n• {} by <code>{}</code> on {}: {}",
                identity_line(&ban.user),
                ban.banned_by,
                ban.banned_at.format("%Y-%m-%d"),
                escape_html(&truncate_str(&ban.reason, 80))
            );
        }
        self.reply_long(actor, &text).await?;
        Ok(Outcome::Handled)
    }

    pub(super) async fn user_info(&self, actor: &Actor, args: &str) -> Result<Outcome, BotError> {
        let target = parse_user_id(args, "/user_info <user_id>")?;
        let Some(record) = self.storage.find_user(target).await? else {
            self.reply(
                actor,
                OutgoingMessage::html(format!("❓ User <code>{target}</code> is unknown.")),
            )
            .await?;
            return Ok(Outcome::Handled);
        };
        let banned = self.storage.is_banned(target).await?;
        let activity = self
            .storage
            .user_activity(target, USER_INFO_ACTIVITY)
            .await?;

        let mut text = format!(
            "👤 <b>User</b> {}\nRole: {:?}\nJoined: {}\nLast active: {}\nBanned: {}",
            identity_line(&record.identity),
            self.settings.role_of(target),
            record.joined_at.format("%Y-%m-%d %H:%M"),
            record.last_activity.format("%Y-%m-%d %H:%M"),
            if banned { "yes" } else { "no" }
        );
        if !activity.is_empty() {
            text.push_str("\n\n<b>Recent activity</b>");
            text.push_str(&format_activity(&activity));
        }
        self.reply_long(actor, &text).await?;
        Ok(Outcome::Handled)
    }

    pub(super) async fn search_users(
        &self,
        actor: &Actor,
        query: &str,
    ) -> Result<Outcome, BotError> {
        if query.is_empty() {
            return Err(BotError::ValidationFailure(
                "Usage: /search_users <query>".to_string(),
            ));
        }
        let users = self
            .storage
            .search_users(query, REPORT_LIST_LIMIT as i64)
            .await?;
        if users.is_empty() {
            self.reply(actor, OutgoingMessage::plain("🔍 No users found."))
                .await?;
            return Ok(Outcome::Handled);
        }
        let mut text = format!("🔍 <b>Users</b> ({})", users.len());
        for user in &users {
            let _ = write!(
                text,
                "\n• {} (last seen {})",
                identity_line(&user.identity),
                user.last_activity.format("%Y-%m-%d")
            );
        }
        self.reply_long(actor, &text).await?;
        Ok(Outcome::Handled)
    }

    pub(super) async fn recent_activity(&self, actor: &Actor) -> Result<Outcome, BotError> {
        let entries = self.storage.recent_activity(RECENT_ACTIVITY_LIMIT).await?;
        if entries.is_empty() {
            self.reply(actor, OutgoingMessage::plain("📭 No activity yet."))
                .await?;
            return Ok(Outcome::Handled);
        }
        let text = format!("🕑 <b>Recent activity</b>{}", format_activity(&entries));
        self.reply_long(actor, &text).await?;
        Ok(Outcome::Handled)
    }
}
