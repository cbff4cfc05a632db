//! View layer for bot UI components
//!
//! Contains callback data encoding, keyboards, captions and help texts.

use crate::config::{ConfiguredChannel, Role, TELEGRAM_CALLBACK_DATA_LIMIT};
use crate::models::Video;
use crate::transport::{Button, ChatTarget, Keyboard};
use crate::utils::{escape_html, truncate_bytes, truncate_str};
use std::time::Duration;

/// Callback data prefix for video buttons
pub const VIDEO_PREFIX: &str = "video:";
/// Callback data prefix for channel picker buttons
pub const CHANNEL_PREFIX: &str = "bc:ch:";
/// Callback data of the broadcast cancel button
pub const BROADCAST_CANCEL: &str = "bc:cancel";
/// Callback data prefix for join-gate retry buttons
pub const RETRY_PREFIX: &str = "retry:";

const BUTTON_LABEL_CHARS: usize = 40;

/// Request to repeat after the user joined the required channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryTarget {
    /// Open a deep-linked video
    Start(String),
    /// `/browse`
    Browse,
    /// `/random`
    Random,
    /// `/find <query>`
    Find(String),
    /// A video button
    Video(String),
}

/// Decoded inline button press
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// Send the video with this id
    Video(String),
    /// Channel picked in the broadcast dialogue
    BroadcastChannel(u8),
    /// Abort the broadcast dialogue
    BroadcastCancel,
    /// Repeat a request gated on channel membership
    Retry(RetryTarget),
}

impl CallbackAction {
    /// Encodes the action, fitting Telegram's 64-byte callback data limit
    #[must_use]
    pub fn encode(&self) -> String {
        let data = match self {
            Self::Video(id) => format!("{VIDEO_PREFIX}{id}"),
            Self::BroadcastChannel(slot) => format!("{CHANNEL_PREFIX}{slot}"),
            Self::BroadcastCancel => BROADCAST_CANCEL.to_string(),
            Self::Retry(target) => match target {
                RetryTarget::Start(id) => format!("{RETRY_PREFIX}start:{id}"),
                RetryTarget::Browse => format!("{RETRY_PREFIX}browse"),
                RetryTarget::Random => format!("{RETRY_PREFIX}random"),
                RetryTarget::Find(query) => format!("{RETRY_PREFIX}find:{query}"),
                RetryTarget::Video(id) => format!("{RETRY_PREFIX}video:{id}"),
            },
        };
        truncate_bytes(&data, TELEGRAM_CALLBACK_DATA_LIMIT).to_string()
    }

    /// Decodes callback data; unknown data yields `None`
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        if data == BROADCAST_CANCEL {
            return Some(Self::BroadcastCancel);
        }
        if let Some(slot) = data.strip_prefix(CHANNEL_PREFIX) {
            return slot.parse().ok().map(Self::BroadcastChannel);
        }
        if let Some(id) = data.strip_prefix(VIDEO_PREFIX) {
            return (!id.is_empty()).then(|| Self::Video(id.to_string()));
        }
        let rest = data.strip_prefix(RETRY_PREFIX)?;
        let target = match rest {
            "browse" => RetryTarget::Browse,
            "random" => RetryTarget::Random,
            _ => {
                if let Some(id) = rest.strip_prefix("start:") {
                    RetryTarget::Start(id.to_string())
                } else if let Some(query) = rest.strip_prefix("find:") {
                    RetryTarget::Find(query.to_string())
                } else if let Some(id) = rest.strip_prefix("video:") {
                    RetryTarget::Video(id.to_string())
                } else {
                    return None;
                }
            }
        };
        Some(Self::Retry(target))
    }
}

/// One button per video
#[must_use]
pub fn video_list_keyboard(videos: &[Video]) -> Keyboard {
    videos
        .iter()
        .map(|video| {
            vec![Button::callback(
                format!("🎬 {}", truncate_str(&video.name, BUTTON_LABEL_CHARS)),
                CallbackAction::Video(video.id.clone()).encode(),
            )]
        })
        .collect()
}

/// Channel picker for the broadcast dialogue
#[must_use]
pub fn channel_picker_keyboard(channels: &[ConfiguredChannel]) -> Keyboard {
    let mut rows: Keyboard = channels
        .iter()
        .map(|channel| {
            vec![Button::callback(
                format!("📢 {} ({})", channel.label(), channel.target),
                CallbackAction::BroadcastChannel(channel.slot).encode(),
            )]
        })
        .collect();
    rows.push(cancel_row());
    rows
}

/// Single cancel button for the broadcast dialogue
#[must_use]
pub fn cancel_keyboard() -> Keyboard {
    vec![cancel_row()]
}

fn cancel_row() -> Vec<Button> {
    vec![Button::callback(
        "❌ Cancel",
        CallbackAction::BroadcastCancel.encode(),
    )]
}

/// Join links for public channels plus a retry button
#[must_use]
pub fn join_keyboard(channels: &[ConfiguredChannel], retry: RetryTarget) -> Keyboard {
    let mut rows: Keyboard = channels
        .iter()
        .filter_map(|channel| match ChatTarget::parse(&channel.target)? {
            ChatTarget::Handle(handle) => Some(vec![Button::url(
                format!("➕ Join {}", channel.label()),
                format!("https://t.me/{}", handle.trim_start_matches('@')),
            )]),
            ChatTarget::Id(_) => None,
        })
        .collect();
    rows.push(vec![Button::callback(
        "✅ I've joined",
        CallbackAction::Retry(retry).encode(),
    )]);
    rows
}

/// HTML caption of a delivered video
#[must_use]
pub fn video_caption(video: &Video, ttl: Duration) -> String {
    let mut caption = format!("🎬 <b>{}</b>", escape_html(&video.name));
    if !video.description.is_empty() {
        caption.push_str("\n\n");
        caption.push_str(&escape_html(&video.description));
    }
    caption.push_str(&format!(
        "\n\n⏳ This video will be deleted in {} minutes.",
        ttl.as_secs().div_ceil(60)
    ));
    caption
}

/// Greeting for `/start` without a payload
#[must_use]
pub fn welcome_text(role: Role) -> String {
    let mut text = String::from(
        "👋 <b>Welcome!</b>\n\nOpen a shared video link, or use /browse, /random and /find to explore the library.",
    );
    if role >= Role::Admin {
        text.push_str("\n\nSend me a video to add it to the library. /help lists admin commands.");
    }
    text
}

/// Command list for the given role
#[must_use]
pub fn help_text(role: Role) -> String {
    let mut text = String::from(
        "<b>Commands</b>\n\
         /browse - browse videos\n\
         /random - random video\n\
         /find (or /search) &lt;query&gt; - search videos\n\
         /cancel - cancel the current operation\n\
         /ping - check the bot",
    );
    if role >= Role::Admin {
        text.push_str(
            "\n\n<b>Admin</b>\n\
             Send a video - add it to the library\n\
             /delete &lt;id&gt; - delete a video\n\
             /database - list videos\n\
             /stats - statistics\n\
             /analytics - view analytics\n\
             /admin - administrators\n\
             /channel_broadcast - post to a channel\n\
             /schedule - list scheduled posts\n\
             /schedule &lt;channel&gt; &lt;YYYY-MM-DD HH:MM | +30m | +2h | +1d&gt; &lt;text&gt; - schedule a post (UTC)\n\
             /ban_user &lt;id&gt; [reason]\n\
             /unban_user &lt;id&gt;\n\
             /bulk_ban &lt;id&gt; &lt;id&gt; ... [| reason]\n\
             /banned_users\n\
             /user_info &lt;id&gt;\n\
             /search_users &lt;query&gt;\n\
             /recent_activity",
        );
    }
    if role == Role::Owner {
        text.push_str(
            "\n\n<b>Owner</b>\n\
             /broadcast &lt;text&gt; - message all users\n\
             /cleanup_users - remove users who blocked the bot\n\
             /join_access - toggle required channel membership",
        );
    }
    text
}
