//! Configuration and settings management
//!
//! Loads settings from configuration files and environment variables and
//! defines transport and scheduling constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Comma-separated list of admin user IDs
    #[serde(rename = "admins")]
    pub admins_str: Option<String>,

    /// Owner user ID; the owner is an admin with extra powers
    #[serde(default)]
    pub owner: i64,

    /// First broadcast/join channel
    pub channel_1: Option<String>,
    /// Second broadcast/join channel
    pub channel_2: Option<String>,

    /// `sqlx` connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Poll interval of the broadcast scheduler
    #[serde(default = "default_scheduler_interval_secs")]
    pub scheduler_interval_secs: u64,
    /// How long a delivered video stays in the chat
    #[serde(default = "default_video_ttl_secs")]
    pub video_ttl_secs: u64,
    /// Idle time after which an abandoned dialogue is forgotten
    #[serde(default = "default_conversation_ttl_secs")]
    pub conversation_ttl_secs: u64,
    /// Pause between messages of an owner broadcast
    #[serde(default = "default_broadcast_delay_ms")]
    pub broadcast_delay_ms: u64,

    /// Port of the health endpoint
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL pinged to keep the host awake
    pub render_external_url: Option<String>,
    /// Interval of the keep-alive ping
    #[serde(default = "default_keep_alive_interval_secs")]
    pub keep_alive_interval_secs: u64,

    /// Retries of the polling loop before a cooldown
    #[serde(default = "default_poll_max_retries")]
    pub poll_max_retries: u32,
    /// First backoff of the polling loop
    #[serde(default = "default_poll_initial_backoff_secs")]
    pub poll_initial_backoff_secs: u64,
    /// Backoff ceiling of the polling loop
    #[serde(default = "default_poll_max_backoff_secs")]
    pub poll_max_backoff_secs: u64,
}

fn default_database_url() -> String {
    "sqlite:videos.db?mode=rwc".to_string()
}

const fn default_scheduler_interval_secs() -> u64 {
    60
}

const fn default_video_ttl_secs() -> u64 {
    1200
}

const fn default_conversation_ttl_secs() -> u64 {
    3600
}

const fn default_broadcast_delay_ms() -> u64 {
    100
}

const fn default_port() -> u16 {
    5000
}

const fn default_keep_alive_interval_secs() -> u64 {
    840
}

const fn default_poll_max_retries() -> u32 {
    5
}

const fn default_poll_initial_backoff_secs() -> u64 {
    30
}

const fn default_poll_max_backoff_secs() -> u64 {
    300
}

/// Role of an identity, derived from settings. Ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    /// Anyone who is not an admin.
    User,
    /// Listed in `ADMINS`.
    Admin,
    /// The `OWNER`.
    Owner,
}

/// A broadcast target configured through `CHANNEL_1` / `CHANNEL_2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredChannel {
    /// 1-based slot number.
    pub slot: u8,
    /// Raw identifier as configured.
    pub target: String,
}

impl ConfiguredChannel {
    /// Human label used in buttons and notices.
    #[must_use]
    pub fn label(&self) -> String {
        format!("Channel {}", self.slot)
    }
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use video_vault::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides, not checked into git
            .add_source(File::with_name("config/local").required(false))
            // `APP_DATABASE_URL=... ./target/app` sets `database_url`
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Plain variables (`TELEGRAM_TOKEN`, `ADMINS`, ...); empty ones count as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        s.try_deserialize()
    }

    /// Returns the set of admin IDs (the owner not included)
    #[must_use]
    pub fn admins(&self) -> HashSet<i64> {
        parse_id_list(self.admins_str.as_deref())
    }

    /// Role of the given user
    #[must_use]
    pub fn role_of(&self, user_id: i64) -> Role {
        if self.owner != 0 && user_id == self.owner {
            Role::Owner
        } else if self.admins().contains(&user_id) {
            Role::Admin
        } else {
            Role::User
        }
    }

    /// Whether the user is an admin or the owner
    #[must_use]
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.role_of(user_id) >= Role::Admin
    }

    /// Configured broadcast channels, in slot order
    #[must_use]
    pub fn channels(&self) -> Vec<ConfiguredChannel> {
        [(1, &self.channel_1), (2, &self.channel_2)]
            .into_iter()
            .filter_map(|(slot, value)| {
                value
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|target| ConfiguredChannel {
                        slot,
                        target: target.to_string(),
                    })
            })
            .collect()
    }

    /// Looks up a configured channel by slot number
    #[must_use]
    pub fn channel_by_slot(&self, slot: u8) -> Option<ConfiguredChannel> {
        self.channels().into_iter().find(|c| c.slot == slot)
    }

    /// Scheduler poll interval
    #[must_use]
    pub const fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }

    /// Lifetime of a delivered video message
    #[must_use]
    pub const fn video_ttl(&self) -> Duration {
        Duration::from_secs(self.video_ttl_secs)
    }

    /// Idle expiry of conversation states
    #[must_use]
    pub const fn conversation_ttl(&self) -> Duration {
        Duration::from_secs(self.conversation_ttl_secs)
    }

    /// Pause between owner broadcast sends
    #[must_use]
    pub const fn broadcast_delay(&self) -> Duration {
        Duration::from_millis(self.broadcast_delay_ms)
    }
}

fn parse_id_list(raw: Option<&str>) -> HashSet<i64> {
    raw.map(|s| {
        s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .filter_map(|id| id.parse::<i64>().ok())
            .collect()
    })
    .unwrap_or_default()
}

// Telegram API limits
/// Maximum length of a text message
pub const TELEGRAM_TEXT_LIMIT: usize = 4096;
/// Maximum length of a media caption
pub const TELEGRAM_CAPTION_LIMIT: usize = 1024;
/// Maximum size of inline button callback data, in bytes
pub const TELEGRAM_CALLBACK_DATA_LIMIT: usize = 64;

// Retry configuration for individual Telegram API calls
/// Maximum retry attempts for a single API call
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Initial backoff for API call retries
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Backoff ceiling for API call retries
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;

/// Cooldown between "banned" notices to the same user
pub const DENIED_NOTICE_COOLDOWN_SECS: u64 = 1200;
/// Longest accepted video name, in characters
pub const MAX_VIDEO_NAME_CHARS: usize = 200;

/// Number of buttons shown by `/browse` and `/find`
pub const VIDEO_LIST_LIMIT: usize = 20;
/// Rows shown by list-style admin reports
pub const REPORT_LIST_LIMIT: usize = 10;
/// Rows shown by `/recent_activity`
pub const RECENT_ACTIVITY_LIMIT: i64 = 15;
/// Scheduled broadcasts listed by `/schedule`
pub const SCHEDULE_LIST_LIMIT: i64 = 50;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::settings_fixture;

    #[test]
    fn test_list_parsing() {
        let mut settings = settings_fixture();

        // Test comma
        settings.admins_str = Some("123,456".to_string());
        let admins = settings.admins();
        assert!(admins.contains(&123));
        assert!(admins.contains(&456));
        assert_eq!(admins.len(), 2);

        // Test semicolon and mixed
        settings.admins_str = Some("333; 444, 555".to_string());
        assert_eq!(settings.admins().len(), 3);

        // Test empty/bad parsing
        settings.admins_str = Some("abc, 777".to_string());
        let admins = settings.admins();
        assert!(admins.contains(&777));
        assert_eq!(admins.len(), 1);
    }

    #[test]
    fn test_roles() {
        let settings = settings_fixture();
        assert_eq!(settings.role_of(1), Role::Owner);
        assert_eq!(settings.role_of(10), Role::Admin);
        assert_eq!(settings.role_of(99), Role::User);
        assert!(settings.is_admin(1));
        assert!(!settings.is_admin(99));
    }

    #[test]
    fn test_unset_owner_matches_nobody() {
        let mut settings = settings_fixture();
        settings.owner = 0;
        assert_eq!(settings.role_of(0), Role::User);
    }

    #[test]
    fn test_channels_skip_blank_slots() {
        let mut settings = settings_fixture();
        settings.channel_2 = Some("   ".to_string());
        let channels = settings.channels();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].slot, 1);
        assert_eq!(channels[0].label(), "Channel 1");
        assert!(settings.channel_by_slot(2).is_none());
    }
}
