//! Domain types owned by the persistence layer.
//!
//! Everything here is plain data; behaviour lives in the storage, bot and
//! scheduler modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A chat-platform end user as seen by the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Stable numeric id assigned by the platform.
    pub id: i64,
    /// Public handle without the leading `@`.
    pub username: Option<String>,
    /// Display name.
    pub first_name: Option<String>,
}

impl UserIdentity {
    /// Identity with no display information.
    #[must_use]
    pub const fn bare(id: i64) -> Self {
        Self {
            id,
            username: None,
            first_name: None,
        }
    }

    /// Best human-readable label: `@handle`, then first name, then the id.
    #[must_use]
    pub fn label(&self) -> String {
        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            return format!("@{username}");
        }
        if let Some(name) = self.first_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        self.id.to_string()
    }
}

/// A user row with bookkeeping timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Identity and display info.
    pub identity: UserIdentity,
    /// First time the user was seen.
    pub joined_at: DateTime<Utc>,
    /// Last time any event from the user passed the access gate.
    pub last_activity: DateTime<Utc>,
}

/// Existence of a ban record for an id is the sole ban predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRecord {
    /// Banned user.
    pub user: UserIdentity,
    /// Admin who issued the ban.
    pub banned_by: i64,
    /// Free-form reason.
    pub reason: String,
    /// When the ban was (last) issued.
    pub banned_at: DateTime<Utc>,
}

/// One entry of the activity audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Acting user.
    pub user: UserIdentity,
    /// Short action label, e.g. `start` or `scheduled_broadcast_sent`.
    pub action: String,
    /// Additional details.
    pub details: String,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

/// A stored video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    /// Globally unique opaque token, safe to embed in deep links.
    pub id: String,
    /// Platform file reference used to re-send the media.
    pub media_ref: String,
    /// Display name.
    pub name: String,
    /// Description, empty when skipped.
    pub description: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a [`Video`]; the id is minted by storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVideo {
    /// Platform file reference.
    pub media_ref: String,
    /// Display name.
    pub name: String,
    /// Description, possibly empty.
    pub description: String,
}

/// A video together with its view count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoPopularity {
    /// Video id.
    pub id: String,
    /// Video name.
    pub name: String,
    /// Number of logged views.
    pub views: i64,
}

/// Aggregated view analytics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    /// All views ever logged.
    pub total_views: i64,
    /// Views logged since UTC midnight.
    pub views_today: i64,
    /// Most viewed video, if any video exists.
    pub top_video: Option<VideoPopularity>,
}

/// Headline counters for the `/stats` report.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BotStats {
    /// Known users.
    pub users: i64,
    /// Banned users.
    pub banned: i64,
    /// Stored videos.
    pub videos: i64,
    /// Videos with a non-empty description.
    pub videos_with_description: i64,
    /// Scheduled broadcasts still pending.
    pub pending_broadcasts: i64,
}

/// Payload kind of a scheduled broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Plain text message.
    Text,
    /// Photo with optional caption.
    Photo,
}

/// Lifecycle of a scheduled broadcast. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastStatus {
    /// Waiting for its scheduled time.
    Pending,
    /// Delivered.
    Completed,
    /// Delivery was attempted and rejected.
    Failed,
}

impl BroadcastStatus {
    /// Whether no further transition is allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A persisted instruction to deliver content to a channel at or after a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledBroadcast {
    /// Storage id.
    pub id: i64,
    /// Admin who scheduled it.
    pub admin_id: i64,
    /// Raw target channel identifier as entered or configured.
    pub target_channel: String,
    /// Payload kind.
    pub content_type: ContentType,
    /// Text, or the photo caption.
    pub content: String,
    /// Photo file reference for [`ContentType::Photo`].
    pub media_ref: Option<String>,
    /// Earliest delivery time.
    pub scheduled_time: DateTime<Utc>,
    /// Current status.
    pub status: BroadcastStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a [`ScheduledBroadcast`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScheduledBroadcast {
    /// Admin who scheduled it.
    pub admin_id: i64,
    /// Raw target channel identifier.
    pub target_channel: String,
    /// Payload kind.
    pub content_type: ContentType,
    /// Text or caption.
    pub content: String,
    /// Photo file reference.
    pub media_ref: Option<String>,
    /// Earliest delivery time.
    pub scheduled_time: DateTime<Utc>,
}

macro_rules! string_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Canonical lowercase representation used in storage.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} value: {other}", stringify!($ty))),
                }
            }
        }
    };
}

string_enum!(ContentType { Text => "text", Photo => "photo" });
string_enum!(BroadcastStatus {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
});
