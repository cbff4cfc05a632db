//! Per-user conversation state.

use moka::future::Cache;
use std::time::Duration;

/// Position of a user in a multi-step dialogue
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ConversationState {
    /// No dialogue in progress
    #[default]
    Idle,
    /// Video received, waiting for its name
    AwaitingVideoName {
        /// Uploaded file reference
        file_ref: String,
    },
    /// Name received, waiting for a description or `skip`
    AwaitingVideoDescription {
        /// Uploaded file reference
        file_ref: String,
        /// Chosen name
        name: String,
    },
    /// Channel picker shown
    AwaitingBroadcastChannel,
    /// Channel chosen, waiting for the post
    AwaitingBroadcastContent {
        /// Raw channel identifier from settings
        channel: String,
        /// Human label of the channel
        channel_label: String,
        /// Identity that chose the channel; nobody else may complete the post
        initiator_id: i64,
    },
}

impl ConversationState {
    /// Part of the video upload dialogue
    #[must_use]
    pub const fn is_upload(&self) -> bool {
        matches!(
            self,
            Self::AwaitingVideoName { .. } | Self::AwaitingVideoDescription { .. }
        )
    }

    /// Part of the channel broadcast dialogue
    #[must_use]
    pub const fn is_broadcast(&self) -> bool {
        matches!(
            self,
            Self::AwaitingBroadcastChannel | Self::AwaitingBroadcastContent { .. }
        )
    }
}

/// In-memory map from user id to [`ConversationState`].
///
/// A missing entry means [`ConversationState::Idle`]. Entries idle for longer
/// than the configured TTL are dropped, so abandoned dialogues do not pile up.
#[derive(Clone)]
pub struct ConversationStore {
    states: Cache<i64, ConversationState>,
}

impl ConversationStore {
    /// Create a store whose entries expire after `idle_ttl` without access
    #[must_use]
    pub fn new(idle_ttl: Duration) -> Self {
        let states = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(idle_ttl)
            .build();
        Self { states }
    }

    /// Current state of the user
    pub async fn get(&self, user_id: i64) -> ConversationState {
        self.states.get(&user_id).await.unwrap_or_default()
    }

    /// Replace the user's state; `Idle` removes the entry
    pub async fn set(&self, user_id: i64, state: ConversationState) {
        if state == ConversationState::Idle {
            self.states.invalidate(&user_id).await;
        } else {
            self.states.insert(user_id, state).await;
        }
    }

    /// Remove and return the user's state
    pub async fn take(&self, user_id: i64) -> ConversationState {
        self.states.remove(&user_id).await.unwrap_or_default()
    }

    /// Approximate number of dialogues in progress
    #[must_use]
    pub fn active_count(&self) -> u64 {
        self.states.entry_count()
    }
}
