//! Delayed deletion of delivered videos.
//!
//! Each deletion is a task on a [`TaskTracker`] racing a timer against a
//! [`CancellationToken`]. Shutdown cancels whatever is still pending.

use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Schedules message deletions after a fixed delay
#[derive(Clone)]
pub struct MessageCleanup {
    transport: Arc<dyn Transport>,
    ttl: Duration,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl MessageCleanup {
    /// Create a cleaner; cancelling `token` drops all pending deletions
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, ttl: Duration, token: CancellationToken) -> Self {
        Self {
            transport,
            ttl,
            tracker: TaskTracker::new(),
            token,
        }
    }

    /// Delay before a scheduled deletion runs
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Delete `message_id` in `chat_id` once the TTL elapses
    pub fn schedule(&self, chat_id: i64, message_id: i32) {
        let transport = Arc::clone(&self.transport);
        let token = self.token.clone();
        let ttl = self.ttl;
        self.tracker.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    debug!(chat_id, message_id, "Pending deletion cancelled");
                }
                () = tokio::time::sleep(ttl) => {
                    if let Err(e) = transport.delete_message(chat_id, message_id).await {
                        warn!(chat_id, message_id, error = %e, "Failed to delete expired message");
                    }
                }
            }
        });
    }

    /// Number of deletions still waiting
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel pending deletions and wait for their tasks to finish
    pub async fn shutdown(&self) {
        let pending = self.pending();
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!(pending, "Message cleanup stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[tokio::test(start_paused = true)]
    async fn test_deletes_after_ttl() {
        let mut transport = MockTransport::new();
        transport
            .expect_delete_message()
            .withf(|chat, msg| *chat == 5 && *msg == 9)
            .times(1)
            .returning(|_, _| Ok(()));

        let cleanup = MessageCleanup::new(
            Arc::new(transport),
            Duration::from_secs(1200),
            CancellationToken::new(),
        );
        cleanup.schedule(5, 9);
        assert_eq!(cleanup.pending(), 1);

        tokio::time::sleep(Duration::from_secs(1201)).await;
        cleanup.tracker.close();
        cleanup.tracker.wait().await;
        assert_eq!(cleanup.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_deletions() {
        let mut transport = MockTransport::new();
        transport.expect_delete_message().never();

        let cleanup = MessageCleanup::new(
            Arc::new(transport),
            Duration::from_secs(1200),
            CancellationToken::new(),
        );
        cleanup.schedule(5, 9);
        cleanup.schedule(5, 10);
        cleanup.shutdown().await;
        assert_eq!(cleanup.pending(), 0);
    }
}
