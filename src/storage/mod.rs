//! Storage layer for users, bans, videos, analytics and scheduled broadcasts
//!
//! [`Storage`] is the seam the bot and the scheduler depend on;
//! [`SqliteStorage`] is the production implementation.

mod sqlite;

pub use sqlite::SqliteStorage;

use crate::models::{
    ActivityEntry, AnalyticsSummary, BanRecord, BotStats, BroadcastStatus, NewScheduledBroadcast,
    NewVideo, ScheduledBroadcast, UserIdentity, UserRecord, Video, VideoPopularity,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database could not be reached or the pool is exhausted
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    /// Query failed
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),
    /// A stored value could not be decoded into a domain type
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable(err.to_string())
            }
            other => Self::Database(other),
        }
    }
}

/// Interface for storage providers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert the user or refresh its display info and last activity
    async fn upsert_user(&self, user: &UserIdentity) -> Result<(), StorageError>;
    /// Forget a user (used when a user has blocked the bot)
    async fn remove_user(&self, user_id: i64) -> Result<(), StorageError>;
    /// Ids of all known users that are not banned
    async fn list_active_users(&self) -> Result<Vec<i64>, StorageError>;
    /// Look up a single user
    async fn find_user(&self, user_id: i64) -> Result<Option<UserRecord>, StorageError>;
    /// Case-insensitive search on username and first name
    async fn search_users(&self, query: &str, limit: i64)
        -> Result<Vec<UserRecord>, StorageError>;
    /// Headline counters
    async fn stats(&self) -> Result<BotStats, StorageError>;

    /// Whether a ban record exists for the user
    async fn is_banned(&self, user_id: i64) -> Result<bool, StorageError>;
    /// Create or replace the ban record of a user
    async fn ban_user(
        &self,
        user_id: i64,
        banned_by: i64,
        reason: &str,
    ) -> Result<(), StorageError>;
    /// Remove a ban; returns whether one existed
    async fn unban_user(&self, user_id: i64) -> Result<bool, StorageError>;
    /// All ban records, newest first
    async fn list_banned(&self) -> Result<Vec<BanRecord>, StorageError>;

    /// Append an entry to the activity trail
    async fn log_activity(
        &self,
        user_id: i64,
        action: &str,
        details: &str,
    ) -> Result<(), StorageError>;
    /// Latest activity across all users
    async fn recent_activity(&self, limit: i64) -> Result<Vec<ActivityEntry>, StorageError>;
    /// Latest activity of one user
    async fn user_activity(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ActivityEntry>, StorageError>;

    /// Persist a video and mint its id
    async fn create_video(&self, video: NewVideo) -> Result<Video, StorageError>;
    /// Look up a video by id
    async fn get_video_by_id(&self, id: &str) -> Result<Option<Video>, StorageError>;
    /// All videos, newest first
    async fn list_videos(&self) -> Result<Vec<Video>, StorageError>;
    /// A uniformly random video
    async fn random_video(&self) -> Result<Option<Video>, StorageError>;
    /// Case-insensitive search on name and description
    async fn search_videos(&self, query: &str) -> Result<Vec<Video>, StorageError>;
    /// Delete a video; returns whether it existed
    async fn delete_video(&self, id: &str) -> Result<bool, StorageError>;

    /// Record that a user was sent a video
    async fn log_video_view(&self, video_id: &str, user_id: i64) -> Result<(), StorageError>;
    /// Most viewed videos
    async fn popular_videos(&self, limit: i64) -> Result<Vec<VideoPopularity>, StorageError>;
    /// Aggregate view counters
    async fn analytics_summary(&self) -> Result<AnalyticsSummary, StorageError>;

    /// Persist a broadcast in `pending` status
    async fn create_scheduled_broadcast(
        &self,
        broadcast: NewScheduledBroadcast,
    ) -> Result<ScheduledBroadcast, StorageError>;
    /// Pending broadcasts whose time is at or before `now`, oldest first
    async fn list_pending_due_broadcasts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledBroadcast>, StorageError>;
    /// Move a pending broadcast to `status`; returns whether a row changed.
    /// Terminal rows are never touched.
    async fn update_broadcast_status(
        &self,
        id: i64,
        status: BroadcastStatus,
    ) -> Result<bool, StorageError>;
    /// Broadcasts for the `/schedule` listing, newest first
    async fn list_scheduled_broadcasts(
        &self,
        admin_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<ScheduledBroadcast>, StorageError>;
}
