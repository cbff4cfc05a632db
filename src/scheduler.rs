//! Delivery of scheduled channel broadcasts.
//!
//! One loop polls storage for pending broadcasts that are due, attempts each
//! once and writes back a terminal status. A row leaves the due set only
//! through that status write, so cycles never overlap: the next tick waits
//! for the current cycle to finish.

use crate::error::BotError;
use crate::models::{BroadcastStatus, ContentType, ScheduledBroadcast};
use crate::storage::{Storage, StorageError};
use crate::transport::{ChatTarget, MediaKind, OutgoingMedia, OutgoingMessage, Transport};
use crate::utils::escape_html;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters of one poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Due broadcasts fetched
    pub attempted: usize,
    /// Delivered and marked completed
    pub completed: usize,
    /// Rejected and marked failed
    pub failed: usize,
}

/// Background loop delivering due [`ScheduledBroadcast`]s
pub struct BroadcastScheduler {
    storage: Arc<dyn Storage>,
    transport: Arc<dyn Transport>,
    interval: Duration,
}

impl BroadcastScheduler {
    /// Create a scheduler polling every `interval`
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, transport: Arc<dyn Transport>, interval: Duration) -> Self {
        Self {
            storage,
            transport,
            interval,
        }
    }

    /// Poll until `token` is cancelled. Cycle errors are logged and the loop
    /// goes on with the next tick.
    pub async fn run(&self, token: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Broadcast scheduler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    match self.run_cycle(Utc::now()).await {
                        Ok(report) if report.attempted > 0 => {
                            info!(
                                attempted = report.attempted,
                                completed = report.completed,
                                failed = report.failed,
                                "Scheduled broadcasts processed"
                            );
                        }
                        Ok(_) => debug!("No scheduled broadcasts due"),
                        Err(e) => error!(error = %e, "Failed to load due broadcasts"),
                    }
                }
            }
        }
        info!("Broadcast scheduler stopped");
    }

    /// Deliver everything due at `now`.
    ///
    /// # Errors
    ///
    /// Only fetching the due list can fail the cycle; failures of single
    /// items are recorded on the item and do not affect the others.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, StorageError> {
        let due = self.storage.list_pending_due_broadcasts(now).await?;
        let mut report = CycleReport {
            attempted: due.len(),
            ..CycleReport::default()
        };

        for broadcast in &due {
            let (status, action, details) = match self.deliver(broadcast).await {
                Ok(()) => {
                    report.completed += 1;
                    info!(broadcast_id = broadcast.id, channel = %broadcast.target_channel, "Scheduled broadcast sent");
                    (
                        BroadcastStatus::Completed,
                        "scheduled_broadcast_sent",
                        format!("#{} {}", broadcast.id, broadcast.target_channel),
                    )
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(broadcast_id = broadcast.id, channel = %broadcast.target_channel, error = %e, "Scheduled broadcast failed");
                    (
                        BroadcastStatus::Failed,
                        "scheduled_broadcast_failed",
                        format!("#{} {}: {e}", broadcast.id, broadcast.target_channel),
                    )
                }
            };
            self.record(broadcast, status, action, &details).await;
        }
        Ok(report)
    }

    async fn deliver(&self, broadcast: &ScheduledBroadcast) -> Result<(), BotError> {
        let target = ChatTarget::parse(&broadcast.target_channel).ok_or_else(|| {
            BotError::ValidationFailure(format!("invalid channel {}", broadcast.target_channel))
        })?;

        match broadcast.content_type {
            ContentType::Text => {
                self.transport
                    .send_text(&target, &OutgoingMessage::plain(&broadcast.content))
                    .await?;
            }
            ContentType::Photo => {
                let file_ref = broadcast.media_ref.clone().ok_or_else(|| {
                    BotError::ValidationFailure("photo broadcast without media".to_string())
                })?;
                let media = OutgoingMedia {
                    kind: MediaKind::Photo,
                    file_ref,
                    caption: (!broadcast.content.is_empty())
                        .then(|| escape_html(&broadcast.content)),
                    keyboard: None,
                };
                self.transport.send_media(&target, &media).await?;
            }
        }
        Ok(())
    }

    async fn record(
        &self,
        broadcast: &ScheduledBroadcast,
        status: BroadcastStatus,
        action: &str,
        details: &str,
    ) {
        match self
            .storage
            .update_broadcast_status(broadcast.id, status)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(broadcast_id = broadcast.id, "Broadcast was no longer pending"),
            Err(e) => {
                error!(broadcast_id = broadcast.id, %status, error = %e, "Failed to store broadcast status");
            }
        }
        if let Err(e) = self
            .storage
            .log_activity(broadcast.admin_id, action, details)
            .await
        {
            warn!(broadcast_id = broadcast.id, error = %e, "Failed to log broadcast outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MockStorage;
    use crate::transport::{MockTransport, SentMessage, TransportError, TransportErrorKind};
    use chrono::Duration as ChronoDuration;

    fn due(id: i64, channel: &str, content_type: ContentType) -> ScheduledBroadcast {
        let now = Utc::now();
        ScheduledBroadcast {
            id,
            admin_id: 10,
            target_channel: channel.to_string(),
            content_type,
            content: format!("post {id}"),
            media_ref: None,
            scheduled_time: now - ChronoDuration::seconds(1),
            status: BroadcastStatus::Pending,
            created_at: now - ChronoDuration::minutes(5),
        }
    }

    fn storage_with(due_items: Vec<ScheduledBroadcast>) -> MockStorage {
        let mut storage = MockStorage::new();
        storage
            .expect_list_pending_due_broadcasts()
            .times(1)
            .return_once(move |_| Ok(due_items));
        storage.expect_log_activity().returning(|_, _, _| Ok(()));
        storage
    }

    #[tokio::test]
    async fn test_due_text_broadcast_is_completed() {
        let mut storage = storage_with(vec![due(1, "@news", ContentType::Text)]);
        storage
            .expect_update_broadcast_status()
            .withf(|id, status| *id == 1 && *status == BroadcastStatus::Completed)
            .times(1)
            .returning(|_, _| Ok(true));

        let mut transport = MockTransport::new();
        transport
            .expect_send_text()
            .withf(|chat, msg| *chat == ChatTarget::Handle("@news".into()) && msg.text == "post 1")
            .times(1)
            .returning(|_, _| {
                Ok(SentMessage {
                    chat_id: -100,
                    message_id: 1,
                })
            });

        let scheduler =
            BroadcastScheduler::new(Arc::new(storage), Arc::new(transport), Duration::from_secs(60));
        let report = scheduler.run_cycle(Utc::now()).await.expect("cycle runs");
        assert_eq!(
            report,
            CycleReport {
                attempted: 1,
                completed: 1,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_failed_item_does_not_block_the_rest() {
        let mut photo_without_media = due(3, "@news", ContentType::Photo);
        photo_without_media.media_ref = None;
        let mut storage = storage_with(vec![
            due(1, "@blocked", ContentType::Text),
            due(2, "@news", ContentType::Text),
            photo_without_media,
        ]);
        storage
            .expect_update_broadcast_status()
            .withf(|id, status| *id == 1 && *status == BroadcastStatus::Failed)
            .times(1)
            .returning(|_, _| Ok(true));
        storage
            .expect_update_broadcast_status()
            .withf(|id, status| *id == 2 && *status == BroadcastStatus::Completed)
            .times(1)
            .returning(|_, _| Ok(true));
        storage
            .expect_update_broadcast_status()
            .withf(|id, status| *id == 3 && *status == BroadcastStatus::Failed)
            .times(1)
            .returning(|_, _| Ok(true));

        let mut transport = MockTransport::new();
        transport.expect_send_text().times(2).returning(|chat, _| {
            if *chat == ChatTarget::Handle("@blocked".into()) {
                Err(TransportError::new(
                    TransportErrorKind::Forbidden,
                    "bot was kicked from the channel chat",
                ))
            } else {
                Ok(SentMessage {
                    chat_id: -100,
                    message_id: 2,
                })
            }
        });
        transport.expect_send_media().never();

        let scheduler =
            BroadcastScheduler::new(Arc::new(storage), Arc::new(transport), Duration::from_secs(60));
        let report = scheduler.run_cycle(Utc::now()).await.expect("cycle runs");
        assert_eq!(report.attempted, 3);
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 2);
    }

    #[tokio::test]
    async fn test_storage_outage_fails_the_cycle_only() {
        let mut storage = MockStorage::new();
        storage
            .expect_list_pending_due_broadcasts()
            .returning(|_| Err(StorageError::Unavailable("pool timed out".into())));
        let mut transport = MockTransport::new();
        transport.expect_send_text().never();

        let scheduler =
            BroadcastScheduler::new(Arc::new(storage), Arc::new(transport), Duration::from_secs(60));
        assert!(scheduler.run_cycle(Utc::now()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_a_failed_cycle() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let polls = Arc::new(AtomicUsize::new(0));
        let mut storage = MockStorage::new();
        let counter = polls.clone();
        storage
            .expect_list_pending_due_broadcasts()
            .returning(move |_| match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Err(StorageError::Unavailable("database is locked".into())),
                1 => Ok(vec![due(7, "@news", ContentType::Text)]),
                _ => Ok(Vec::new()),
            });
        storage
            .expect_update_broadcast_status()
            .withf(|id, status| *id == 7 && *status == BroadcastStatus::Completed)
            .times(1)
            .returning(|_, _| Ok(true));
        storage.expect_log_activity().returning(|_, _, _| Ok(()));

        let (delivered_tx, mut delivered_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut transport = MockTransport::new();
        transport
            .expect_send_text()
            .times(1)
            .returning(move |_, msg| {
                let _ = delivered_tx.send(msg.text.clone());
                Ok(SentMessage {
                    chat_id: -100,
                    message_id: 1,
                })
            });

        let scheduler = Arc::new(BroadcastScheduler::new(
            Arc::new(storage),
            Arc::new(transport),
            Duration::from_secs(60),
        ));
        let token = CancellationToken::new();
        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            let token = token.clone();
            async move { scheduler.run(token).await }
        });

        // The first tick fails; the paused clock moves on to the next one.
        let started = tokio::time::Instant::now();
        let text = delivered_rx.recv().await.expect("row delivered");
        assert_eq!(text, "post 7");
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(polls.load(Ordering::SeqCst), 2);

        token.cancel();
        handle.await.expect("scheduler task exits cleanly");
        drop(scheduler);
    }
}
