//! Flood protection for the "banned" notice
//!
//! Banned users get the notice at most once per cooldown, so a user
//! hammering the bot cannot make it hit Telegram rate limits.

use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Tracks when a denied notice was last sent to each user
#[derive(Clone)]
pub struct DeniedNoticeCache {
    /// user_id -> () with TTL equal to the cooldown
    cache: Cache<i64, ()>,
    /// Counter for silenced attempts (for logging throttling)
    silenced_count: Arc<AtomicU64>,
}

impl DeniedNoticeCache {
    /// Creates a cache that silences repeat notices for `cooldown`
    #[must_use]
    pub fn new(cooldown: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(cooldown)
            .build();

        Self {
            cache,
            silenced_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns `true` if the user has not been notified within the cooldown
    pub async fn should_send(&self, user_id: i64) -> bool {
        if self.cache.get(&user_id).await.is_none() {
            return true;
        }

        let count = self.silenced_count.fetch_add(1, Ordering::Relaxed) + 1;
        // Log only every 100th silenced attempt to prevent log flooding
        if count.is_multiple_of(100) {
            debug!(count, user_id, "Silenced denied notices");
        }

        false
    }

    /// Starts the cooldown for the user
    pub async fn mark_sent(&self, user_id: i64) {
        self.cache.insert(user_id, ()).await;
    }

    /// Total number of silenced notices
    #[must_use]
    pub fn silenced_count(&self) -> u64 {
        self.silenced_count.load(Ordering::Relaxed)
    }
}
