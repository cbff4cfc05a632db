//! SQLite implementation of [`Storage`] on top of `sqlx`.
//!
//! Timestamps are stored as UTC epoch milliseconds so range filters and
//! ordering happen in SQL.

use super::{Storage, StorageError};
use crate::models::{
    ActivityEntry, AnalyticsSummary, BanRecord, BotStats, BroadcastStatus, ContentType,
    NewScheduledBroadcast, NewVideo, ScheduledBroadcast, UserIdentity, UserRecord, Video,
    VideoPopularity,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use tracing::info;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        user_id INTEGER PRIMARY KEY,
        username TEXT,
        first_name TEXT,
        username_folded TEXT NOT NULL DEFAULT '',
        first_name_folded TEXT NOT NULL DEFAULT '',
        joined_at INTEGER NOT NULL,
        last_activity INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS banned_users (
        user_id INTEGER PRIMARY KEY,
        banned_by INTEGER NOT NULL,
        reason TEXT NOT NULL DEFAULT '',
        banned_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS user_activity (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        action TEXT NOT NULL,
        details TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS videos (
        id TEXT PRIMARY KEY,
        media_ref TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        name_folded TEXT NOT NULL DEFAULT '',
        description_folded TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS video_views (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        video_id TEXT NOT NULL,
        user_id INTEGER NOT NULL,
        viewed_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS scheduled_broadcasts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        admin_id INTEGER NOT NULL,
        target_channel TEXT NOT NULL,
        content_type TEXT NOT NULL,
        content TEXT NOT NULL DEFAULT '',
        media_ref TEXT,
        scheduled_at INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_activity_created ON user_activity(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_views_video ON video_views(video_id)",
    "CREATE INDEX IF NOT EXISTS idx_broadcasts_due ON scheduled_broadcasts(status, scheduled_at)",
];

/// Lowercased search columns, added to databases created before they existed
const FOLDED_COLUMNS: &[(&str, &str)] = &[
    ("users", "username_folded"),
    ("users", "first_name_folded"),
    ("videos", "name_folded"),
    ("videos", "description_folded"),
];

const BROADCAST_COLUMNS: &str = "id, admin_id, target_channel, content_type, content, media_ref, \
                                 scheduled_at, status, created_at";

const VIDEO_COLUMNS: &str = "id, media_ref, name, description, created_at";

/// `sqlx` SQLite storage
#[derive(Clone)]
pub struct SqliteStorage {
    pool: Pool<Sqlite>,
}

impl SqliteStorage {
    /// Connects to `database_url` and creates missing tables.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the database cannot be opened or the schema
    /// cannot be created.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let storage = Self { pool };
        storage.initialize_schema().await?;
        info!("Storage initialized");
        Ok(storage)
    }

    /// Private in-memory database. A single connection that never expires
    /// keeps the data alive for the lifetime of the pool.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the schema cannot be created.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let storage = Self { pool };
        storage.initialize_schema().await?;
        Ok(storage)
    }

    async fn initialize_schema(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        self.add_folded_columns().await
    }

    /// SQLite `LOWER()` only folds ASCII, so search columns are lowercased
    /// in Rust on write and compared against a query folded the same way.
    async fn add_folded_columns(&self) -> Result<(), StorageError> {
        let mut added = false;
        for (table, column) in FOLDED_COLUMNS {
            let present: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?",
            )
            .bind(table)
            .bind(column)
            .fetch_one(&self.pool)
            .await?;
            if present == 0 {
                sqlx::query(&format!(
                    "ALTER TABLE {table} ADD COLUMN {column} TEXT NOT NULL DEFAULT ''"
                ))
                .execute(&self.pool)
                .await?;
                added = true;
            }
        }
        if added {
            self.backfill_folded_columns().await?;
        }
        Ok(())
    }

    async fn backfill_folded_columns(&self) -> Result<(), StorageError> {
        let users = sqlx::query("SELECT user_id, username, first_name FROM users")
            .fetch_all(&self.pool)
            .await?;
        for row in &users {
            let user = identity_from_row(row)?;
            sqlx::query(
                "UPDATE users SET username_folded = ?, first_name_folded = ? WHERE user_id = ?",
            )
            .bind(fold(user.username.as_deref().unwrap_or_default()))
            .bind(fold(user.first_name.as_deref().unwrap_or_default()))
            .bind(user.id)
            .execute(&self.pool)
            .await?;
        }
        let videos = sqlx::query("SELECT id, name, description FROM videos")
            .fetch_all(&self.pool)
            .await?;
        for row in &videos {
            let id: String = row.try_get("id")?;
            let name: String = row.try_get("name")?;
            let description: String = row.try_get("description")?;
            sqlx::query("UPDATE videos SET name_folded = ?, description_folded = ? WHERE id = ?")
                .bind(fold(&name))
                .bind(fold(&description))
                .bind(&id)
                .execute(&self.pool)
                .await?;
        }
        info!(
            users = users.len(),
            videos = videos.len(),
            "Search columns backfilled"
        );
        Ok(())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::Corrupt(format!("timestamp out of range: {ms}")))
}

fn fold(text: &str) -> String {
    text.to_lowercase()
}

/// `%query%` over folded text, with LIKE wildcards in the query escaped by `\`.
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in fold(query.trim()).chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn identity_from_row(row: &SqliteRow) -> Result<UserIdentity, StorageError> {
    Ok(UserIdentity {
        id: row.try_get("user_id")?,
        username: row.try_get("username")?,
        first_name: row.try_get("first_name")?,
    })
}

fn user_from_row(row: &SqliteRow) -> Result<UserRecord, StorageError> {
    Ok(UserRecord {
        identity: identity_from_row(row)?,
        joined_at: from_millis(row.try_get("joined_at")?)?,
        last_activity: from_millis(row.try_get("last_activity")?)?,
    })
}

fn ban_from_row(row: &SqliteRow) -> Result<BanRecord, StorageError> {
    Ok(BanRecord {
        user: identity_from_row(row)?,
        banned_by: row.try_get("banned_by")?,
        reason: row.try_get("reason")?,
        banned_at: from_millis(row.try_get("banned_at")?)?,
    })
}

fn activity_from_row(row: &SqliteRow) -> Result<ActivityEntry, StorageError> {
    Ok(ActivityEntry {
        user: identity_from_row(row)?,
        action: row.try_get("action")?,
        details: row.try_get("details")?,
        timestamp: from_millis(row.try_get("created_at")?)?,
    })
}

fn video_from_row(row: &SqliteRow) -> Result<Video, StorageError> {
    Ok(Video {
        id: row.try_get("id")?,
        media_ref: row.try_get("media_ref")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn broadcast_from_row(row: &SqliteRow) -> Result<ScheduledBroadcast, StorageError> {
    let content_type: String = row.try_get("content_type")?;
    let status: String = row.try_get("status")?;
    Ok(ScheduledBroadcast {
        id: row.try_get("id")?,
        admin_id: row.try_get("admin_id")?,
        target_channel: row.try_get("target_channel")?,
        content_type: content_type
            .parse::<ContentType>()
            .map_err(StorageError::Corrupt)?,
        content: row.try_get("content")?,
        media_ref: row.try_get("media_ref")?,
        scheduled_time: from_millis(row.try_get("scheduled_at")?)?,
        status: status
            .parse::<BroadcastStatus>()
            .map_err(StorageError::Corrupt)?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn collect<T>(
    rows: &[SqliteRow],
    map: impl Fn(&SqliteRow) -> Result<T, StorageError>,
) -> Result<Vec<T>, StorageError> {
    rows.iter().map(map).collect()
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn upsert_user(&self, user: &UserIdentity) -> Result<(), StorageError> {
        let now = now_millis();
        sqlx::query(
            "INSERT INTO users (user_id, username, first_name, username_folded,
                                first_name_folded, joined_at, last_activity)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                username = excluded.username,
                first_name = excluded.first_name,
                username_folded = excluded.username_folded,
                first_name_folded = excluded.first_name_folded,
                last_activity = excluded.last_activity",
        )
        .bind(user.id)
        .bind(user.username.as_deref())
        .bind(user.first_name.as_deref())
        .bind(fold(user.username.as_deref().unwrap_or_default()))
        .bind(fold(user.first_name.as_deref().unwrap_or_default()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_user(&self, user_id: i64) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM users WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_active_users(&self) -> Result<Vec<i64>, StorageError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM users
             WHERE user_id NOT IN (SELECT user_id FROM banned_users)
             ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<UserRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT user_id, username, first_name, joined_at, last_activity
             FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn search_users(
        &self,
        query: &str,
        limit: i64,
    ) -> Result<Vec<UserRecord>, StorageError> {
        let pattern = like_pattern(query);
        let rows = sqlx::query(
            "SELECT user_id, username, first_name, joined_at, last_activity
             FROM users
             WHERE username_folded LIKE ? ESCAPE '\\'
                OR first_name_folded LIKE ? ESCAPE '\\'
                OR CAST(user_id AS TEXT) LIKE ? ESCAPE '\\'
             ORDER BY last_activity DESC
             LIMIT ?",
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, user_from_row)
    }

    async fn stats(&self) -> Result<BotStats, StorageError> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM users) AS users,
                (SELECT COUNT(*) FROM banned_users) AS banned,
                (SELECT COUNT(*) FROM videos) AS videos,
                (SELECT COUNT(*) FROM videos WHERE description <> '') AS described,
                (SELECT COUNT(*) FROM scheduled_broadcasts WHERE status = 'pending') AS pending",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(BotStats {
            users: row.try_get("users")?,
            banned: row.try_get("banned")?,
            videos: row.try_get("videos")?,
            videos_with_description: row.try_get("described")?,
            pending_broadcasts: row.try_get("pending")?,
        })
    }

    async fn is_banned(&self, user_id: i64) -> Result<bool, StorageError> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM banned_users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn ban_user(
        &self,
        user_id: i64,
        banned_by: i64,
        reason: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO banned_users (user_id, banned_by, reason, banned_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                banned_by = excluded.banned_by,
                reason = excluded.reason,
                banned_at = excluded.banned_at",
        )
        .bind(user_id)
        .bind(banned_by)
        .bind(reason)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unban_user(&self, user_id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM banned_users WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_banned(&self) -> Result<Vec<BanRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT b.user_id, u.username, u.first_name, b.banned_by, b.reason, b.banned_at
             FROM banned_users b
             LEFT JOIN users u ON u.user_id = b.user_id
             ORDER BY b.banned_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, ban_from_row)
    }

    async fn log_activity(
        &self,
        user_id: i64,
        action: &str,
        details: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO user_activity (user_id, action, details, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(action)
        .bind(details)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_activity(&self, limit: i64) -> Result<Vec<ActivityEntry>, StorageError> {
        let rows = sqlx::query(
            "SELECT a.user_id, u.username, u.first_name, a.action, a.details, a.created_at
             FROM user_activity a
             LEFT JOIN users u ON u.user_id = a.user_id
             ORDER BY a.created_at DESC, a.id DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, activity_from_row)
    }

    async fn user_activity(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ActivityEntry>, StorageError> {
        let rows = sqlx::query(
            "SELECT a.user_id, u.username, u.first_name, a.action, a.details, a.created_at
             FROM user_activity a
             LEFT JOIN users u ON u.user_id = a.user_id
             WHERE a.user_id = ?
             ORDER BY a.created_at DESC, a.id DESC
             LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, activity_from_row)
    }

    async fn create_video(&self, video: NewVideo) -> Result<Video, StorageError> {
        let id = Uuid::new_v4().to_string();
        let created_at = now_millis();
        sqlx::query(
            "INSERT INTO videos (id, media_ref, name, description, name_folded,
                                 description_folded, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&video.media_ref)
        .bind(&video.name)
        .bind(&video.description)
        .bind(fold(&video.name))
        .bind(fold(&video.description))
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(Video {
            id,
            media_ref: video.media_ref,
            name: video.name,
            description: video.description,
            created_at: from_millis(created_at)?,
        })
    }

    async fn get_video_by_id(&self, id: &str) -> Result<Option<Video>, StorageError> {
        let row = sqlx::query(&format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(video_from_row).transpose()
    }

    async fn list_videos(&self) -> Result<Vec<Video>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, video_from_row)
    }

    async fn random_video(&self) -> Result<Option<Video>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos ORDER BY RANDOM() LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(video_from_row).transpose()
    }

    async fn search_videos(&self, query: &str) -> Result<Vec<Video>, StorageError> {
        let pattern = like_pattern(query);
        let rows = sqlx::query(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos
             WHERE name_folded LIKE ? ESCAPE '\\' OR description_folded LIKE ? ESCAPE '\\'
             ORDER BY created_at DESC"
        ))
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, video_from_row)
    }

    async fn delete_video(&self, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM videos WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            sqlx::query("DELETE FROM video_views WHERE video_id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(result.rows_affected() > 0)
    }

    async fn log_video_view(&self, video_id: &str, user_id: i64) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO video_views (video_id, user_id, viewed_at) VALUES (?, ?, ?)")
            .bind(video_id)
            .bind(user_id)
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn popular_videos(&self, limit: i64) -> Result<Vec<VideoPopularity>, StorageError> {
        let rows = sqlx::query(
            "SELECT v.id, v.name, COUNT(w.id) AS views
             FROM videos v
             LEFT JOIN video_views w ON w.video_id = v.id
             GROUP BY v.id, v.name
             ORDER BY views DESC, v.created_at DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(VideoPopularity {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    views: row.try_get("views")?,
                })
            })
            .collect()
    }

    async fn analytics_summary(&self) -> Result<AnalyticsSummary, StorageError> {
        let midnight = Utc::now()
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp_millis();
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM video_views) AS total,
                (SELECT COUNT(*) FROM video_views WHERE viewed_at >= ?) AS today",
        )
        .bind(midnight)
        .fetch_one(&self.pool)
        .await?;
        let top_video = self
            .popular_videos(1)
            .await?
            .into_iter()
            .find(|v| v.views > 0);
        Ok(AnalyticsSummary {
            total_views: row.try_get("total")?,
            views_today: row.try_get("today")?,
            top_video,
        })
    }

    async fn create_scheduled_broadcast(
        &self,
        broadcast: NewScheduledBroadcast,
    ) -> Result<ScheduledBroadcast, StorageError> {
        let created_at = now_millis();
        let result = sqlx::query(
            "INSERT INTO scheduled_broadcasts
                (admin_id, target_channel, content_type, content, media_ref,
                 scheduled_at, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)",
        )
        .bind(broadcast.admin_id)
        .bind(&broadcast.target_channel)
        .bind(broadcast.content_type.as_str())
        .bind(&broadcast.content)
        .bind(broadcast.media_ref.as_deref())
        .bind(broadcast.scheduled_time.timestamp_millis())
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(ScheduledBroadcast {
            id: result.last_insert_rowid(),
            admin_id: broadcast.admin_id,
            target_channel: broadcast.target_channel,
            content_type: broadcast.content_type,
            content: broadcast.content,
            media_ref: broadcast.media_ref,
            scheduled_time: broadcast.scheduled_time,
            status: BroadcastStatus::Pending,
            created_at: from_millis(created_at)?,
        })
    }

    async fn list_pending_due_broadcasts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledBroadcast>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {BROADCAST_COLUMNS} FROM scheduled_broadcasts
             WHERE status = 'pending' AND scheduled_at <= ?
             ORDER BY scheduled_at ASC, id ASC"
        ))
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, broadcast_from_row)
    }

    async fn update_broadcast_status(
        &self,
        id: i64,
        status: BroadcastStatus,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE scheduled_broadcasts SET status = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_scheduled_broadcasts(
        &self,
        admin_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<ScheduledBroadcast>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {BROADCAST_COLUMNS} FROM scheduled_broadcasts
             WHERE ? IS NULL OR admin_id = ?
             ORDER BY scheduled_at DESC, id DESC
             LIMIT ?"
        ))
        .bind(admin_id)
        .bind(admin_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, broadcast_from_row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn storage() -> SqliteStorage {
        match SqliteStorage::in_memory().await {
            Ok(storage) => storage,
            Err(e) => panic!("in-memory storage: {e}"),
        }
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" Cat "), "%cat%");
        assert_eq!(like_pattern("Мир"), "%мир%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[tokio::test]
    async fn test_older_database_gains_search_columns() -> anyhow::Result<()> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        sqlx::query(
            "CREATE TABLE videos (
                id TEXT PRIMARY KEY,
                media_ref TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "INSERT INTO videos (id, media_ref, name, description, created_at)
             VALUES ('v1', 'file-1', 'Ночной Город', '', 0)",
        )
        .execute(&pool)
        .await?;

        let storage = SqliteStorage { pool };
        storage.initialize_schema().await?;
        let hits = storage.search_videos("ночной").await?;
        assert_eq!(hits.iter().map(|v| v.id.as_str()).collect::<Vec<_>>(), vec!["v1"]);

        // A second start finds the columns in place.
        storage.initialize_schema().await?;
        assert_eq!(storage.search_videos("ГОРОД").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_user_keeps_join_time() -> anyhow::Result<()> {
        let storage = storage().await;
        let mut user = UserIdentity::bare(5);
        storage.upsert_user(&user).await?;
        let first = storage.find_user(5).await?.map(|u| u.joined_at);

        user.username = Some("renamed".into());
        storage.upsert_user(&user).await?;
        let record = storage.find_user(5).await?;

        assert_eq!(record.as_ref().map(|u| u.joined_at), first);
        assert_eq!(
            record.and_then(|u| u.identity.username).as_deref(),
            Some("renamed")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_active_users_exclude_banned() -> anyhow::Result<()> {
        let storage = storage().await;
        for id in [1, 2, 3] {
            storage.upsert_user(&UserIdentity::bare(id)).await?;
        }
        storage.ban_user(2, 1, "spam").await?;
        assert_eq!(storage.list_active_users().await?, vec![1, 3]);
        Ok(())
    }

    #[tokio::test]
    async fn test_video_lifecycle_and_views() -> anyhow::Result<()> {
        let storage = storage().await;
        let video = storage
            .create_video(NewVideo {
                media_ref: "file-1".into(),
                name: "Sunset".into(),
                description: String::new(),
            })
            .await?;
        assert!(Uuid::parse_str(&video.id).is_ok());

        storage.log_video_view(&video.id, 9).await?;
        storage.log_video_view(&video.id, 10).await?;
        let summary = storage.analytics_summary().await?;
        assert_eq!(summary.total_views, 2);
        assert_eq!(summary.views_today, 2);
        assert_eq!(summary.top_video.map(|v| v.views), Some(2));

        assert!(storage.delete_video(&video.id).await?);
        assert!(!storage.delete_video(&video.id).await?);
        assert!(storage.get_video_by_id(&video.id).await?.is_none());
        assert_eq!(storage.analytics_summary().await?.total_views, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_status_update_skips_terminal_rows() -> anyhow::Result<()> {
        let storage = storage().await;
        let created = storage
            .create_scheduled_broadcast(NewScheduledBroadcast {
                admin_id: 1,
                target_channel: "@news".into(),
                content_type: ContentType::Text,
                content: "hello".into(),
                media_ref: None,
                scheduled_time: Utc::now() - Duration::minutes(1),
            })
            .await?;

        assert!(
            storage
                .update_broadcast_status(created.id, BroadcastStatus::Failed)
                .await?
        );
        assert!(
            !storage
                .update_broadcast_status(created.id, BroadcastStatus::Completed)
                .await?
        );
        let listed = storage.list_scheduled_broadcasts(Some(1), 10).await?;
        assert_eq!(listed[0].status, BroadcastStatus::Failed);
        assert!(storage.list_scheduled_broadcasts(Some(2), 10).await?.is_empty());
        Ok(())
    }
}
