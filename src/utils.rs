//! Utility functions for text processing, message formatting and retries.
//!
//! Patterns are declared with `lazy-regex`, so they are validated at compile
//! time and initialized on first use.

// lazy_regex! uses once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use crate::config::{
    TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
};
use crate::transport::TransportError;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use lazy_regex::lazy_regex;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

/// Relative delay: `+15m`, `+2h`, `+1d`
static RE_RELATIVE_DELAY: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"^\+(\d{1,6})([mhd])$");

/// Bot handle inside a `t.me` link
static RE_BOT_HANDLE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"^[A-Za-z][A-Za-z0-9_]{3,}$");

/// Markup tag in HTML parse mode
static RE_HTML_TAG: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"<[^>]*>");

/// Absolute schedule format, interpreted as UTC
pub const SCHEDULE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Escapes user-provided text for HTML parse mode.
#[must_use]
pub fn escape_html(text: &str) -> String {
    html_escape::encode_text(text).into_owned()
}

/// Length of HTML-mode text as Telegram counts it: tags removed, entities
/// decoded.
#[must_use]
pub fn visible_len(html: &str) -> usize {
    let stripped = RE_HTML_TAG.replace_all(html, "");
    html_escape::decode_html_entities(&stripped).chars().count()
}

/// Builds the shareable `t.me` link that opens the bot with a video id.
///
/// Returns `None` when the handle is not a valid bot username.
#[must_use]
pub fn deep_link(bot_username: &str, video_id: &str) -> Option<String> {
    let handle = bot_username.trim_start_matches('@');
    RE_BOT_HANDLE
        .is_match(handle)
        .then(|| format!("https://t.me/{handle}?start={video_id}"))
}

/// Parses a schedule time.
///
/// Accepts `+Nm`, `+Nh`, `+Nd` relative to `now`, or
/// [`SCHEDULE_TIME_FORMAT`] in UTC.
#[must_use]
pub fn parse_schedule_time(input: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Some(caps) = RE_RELATIVE_DELAY.captures(input) {
        let amount: i64 = caps.get(1)?.as_str().parse().ok()?;
        let delta = match caps.get(2)?.as_str() {
            "m" => ChronoDuration::try_minutes(amount)?,
            "h" => ChronoDuration::try_hours(amount)?,
            _ => ChronoDuration::try_days(amount)?,
        };
        return now.checked_add_signed(delta);
    }
    NaiveDateTime::parse_from_str(input, SCHEDULE_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Splits a long message into parts that fit `max_chars`.
///
/// Breaks on line boundaries where possible; a single line longer than the
/// limit is split on grapheme clusters.
#[must_use]
pub fn split_long_message(message: &str, max_chars: usize) -> Vec<String> {
    if message.is_empty() {
        return Vec::new();
    }

    if message.chars().count() <= max_chars {
        return vec![message.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in message.lines() {
        let line_len = line.chars().count();

        // Handle very long lines without newlines (edge case)
        if line_len > max_chars {
            if !current.is_empty() {
                parts.push(current.trim_end().to_string());
                current.clear();
                current_len = 0;
            }

            let mut chunk = String::new();
            let mut chunk_len = 0;
            for grapheme in line.graphemes(true) {
                let g_len = grapheme.chars().count();
                if chunk_len + g_len > max_chars {
                    parts.push(std::mem::take(&mut chunk));
                    chunk_len = 0;
                }
                chunk.push_str(grapheme);
                chunk_len += g_len;
            }
            if !chunk.is_empty() {
                current.push_str(&chunk);
                current.push('\n');
                current_len = chunk_len + 1;
            }
            continue;
        }

        if current_len + line_len + 1 > max_chars && !current.is_empty() {
            parts.push(current.trim_end().to_string());
            current.clear();
            current_len = 0;
        }
        current.push_str(line);
        current.push('\n');
        current_len += line_len + 1;
    }

    if !current.trim_end().is_empty() {
        parts.push(current.trim_end().to_string());
    }

    parts
}

/// Safely truncates a string to the specified number of characters (not bytes).
///
/// # Examples
///
/// ```
/// use video_vault::utils::truncate_str;
/// assert_eq!(truncate_str("Привет, мир!", 6), "Привет");
/// ```
#[must_use]
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Truncates a string to at most `max_bytes` bytes on a char boundary.
#[must_use]
pub fn truncate_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Retries a Telegram API call with exponential backoff and jitter.
///
/// Only errors whose kind is retryable (network, rate limits) are retried;
/// everything else is returned immediately.
///
/// # Errors
///
/// Returns the last error if all attempts fail.
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, TransportError>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter) // Add jitter to prevent thundering herd
        .take(TELEGRAM_API_MAX_RETRIES);

    RetryIf::spawn(retry_strategy, operation, |e: &TransportError| {
        e.kind().is_retryable()
    })
    .await
    .map_err(|e| {
        if e.kind().is_retryable() {
            warn!(
                "Telegram API operation failed after {} attempts: {}",
                TELEGRAM_API_MAX_RETRIES, e
            );
        }
        e
    })
}
