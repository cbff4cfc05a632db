//! Fixtures shared by unit tests.

use crate::bot::{DispatchRouter, MessageCleanup};
use crate::config::Settings;
use crate::storage::MockStorage;
use crate::transport::{MockTransport, SentMessage};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Owner 1, admins 10 and 11, one channel `@first`
#[must_use]
pub fn settings_fixture() -> Settings {
    Settings {
        telegram_token: "123456789:TEST".to_string(),
        admins_str: Some("10,11".to_string()),
        owner: 1,
        channel_1: Some("@first".to_string()),
        channel_2: None,
        database_url: "sqlite::memory:".to_string(),
        scheduler_interval_secs: 60,
        video_ttl_secs: 1200,
        conversation_ttl_secs: 3600,
        broadcast_delay_ms: 0,
        port: 5000,
        render_external_url: None,
        keep_alive_interval_secs: 840,
        poll_max_retries: 5,
        poll_initial_backoff_secs: 30,
        poll_max_backoff_secs: 300,
    }
}

/// Storage mock that admits everyone and accepts bookkeeping writes
#[must_use]
pub fn admitting_storage() -> MockStorage {
    let mut storage = MockStorage::new();
    storage.expect_upsert_user().returning(|_| Ok(()));
    storage.expect_log_activity().returning(|_, _, _| Ok(()));
    storage.expect_is_banned().returning(|_| Ok(false));
    storage
}

/// Acknowledgement returned by mocked sends
#[must_use]
pub const fn sent(chat_id: i64) -> SentMessage {
    SentMessage {
        chat_id,
        message_id: 1,
    }
}

/// Router over mocks with [`settings_fixture`]
#[must_use]
pub fn router_with(storage: MockStorage, transport: MockTransport) -> DispatchRouter {
    let transport = Arc::new(transport);
    let cleanup = MessageCleanup::new(
        transport.clone(),
        std::time::Duration::from_secs(1200),
        CancellationToken::new(),
    );
    DispatchRouter::new(
        Arc::new(settings_fixture()),
        Arc::new(storage),
        transport,
        cleanup,
    )
}
