#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use video_vault::bot::{Actor, DispatchRouter, MessageCleanup};
use video_vault::config::Settings;
use video_vault::models::UserIdentity;
use video_vault::storage::{SqliteStorage, Storage};
use video_vault::transport::{
    ChatTarget, Keyboard, MembershipStatus, OutgoingMedia, OutgoingMessage, SentMessage,
    Transport, TransportError, TransportErrorKind,
};

pub const OWNER: i64 = 1;
pub const ADMIN_A: i64 = 10;
pub const ADMIN_B: i64 = 11;
pub const USER: i64 = 99;

pub fn settings() -> Settings {
    Settings {
        telegram_token: "123456789:TEST".to_string(),
        admins_str: Some(format!("{ADMIN_A},{ADMIN_B}")),
        owner: OWNER,
        channel_1: Some("@first".to_string()),
        channel_2: Some("-100500".to_string()),
        database_url: "sqlite::memory:".to_string(),
        scheduler_interval_secs: 60,
        video_ttl_secs: 1200,
        conversation_ttl_secs: 3600,
        broadcast_delay_ms: 0,
        port: 0,
        render_external_url: None,
        keep_alive_interval_secs: 840,
        poll_max_retries: 5,
        poll_initial_backoff_secs: 30,
        poll_max_backoff_secs: 300,
    }
}

/// Something the fake transport was asked to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(ChatTarget, String),
    Media(ChatTarget, OutgoingMedia),
    Edit(i64, i32, String),
    Delete(i64, i32),
}

/// Transport that records every call; sends to `blocked` chats fail.
/// Everyone is a channel member unless marked with `leave`.
#[derive(Default)]
pub struct RecordingTransport {
    log: Mutex<Vec<Sent>>,
    keyboards: Mutex<HashMap<ChatTarget, Keyboard>>,
    blocked: Mutex<HashSet<ChatTarget>>,
    left: Mutex<HashSet<i64>>,
    membership_error: Mutex<Option<TransportErrorKind>>,
    next_id: AtomicI32,
}

impl RecordingTransport {
    pub fn block(&self, chat: ChatTarget) {
        self.blocked.lock().expect("lock").insert(chat);
    }

    pub fn leave(&self, user_id: i64) {
        self.left.lock().expect("lock").insert(user_id);
    }

    pub fn join(&self, user_id: i64) {
        self.left.lock().expect("lock").remove(&user_id);
    }

    pub fn fail_membership(&self, kind: Option<TransportErrorKind>) {
        *self.membership_error.lock().expect("lock") = kind;
    }

    /// Keyboard of the last text message to `chat` that carried one
    pub fn last_keyboard_to(&self, chat: &ChatTarget) -> Option<Keyboard> {
        self.keyboards.lock().expect("lock").get(chat).cloned()
    }

    pub fn media_to(&self, chat: &ChatTarget) -> Vec<OutgoingMedia> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Media(target, media) if &target == chat => Some(media),
                _ => None,
            })
            .collect()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.log.lock().expect("lock").clone()
    }

    pub fn texts_to(&self, chat: &ChatTarget) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(target, text) if &target == chat => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn last_text_to(&self, chat: &ChatTarget) -> Option<String> {
        self.texts_to(chat).pop()
    }

    fn check(&self, chat: &ChatTarget) -> Result<(), TransportError> {
        if self.blocked.lock().expect("lock").contains(chat) {
            return Err(TransportError::new(
                TransportErrorKind::Forbidden,
                "bot was blocked by the user",
            ));
        }
        Ok(())
    }

    fn ack(&self, chat: &ChatTarget) -> SentMessage {
        SentMessage {
            chat_id: match chat {
                ChatTarget::Id(id) => *id,
                ChatTarget::Handle(_) => -1,
            },
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(
        &self,
        chat: &ChatTarget,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, TransportError> {
        self.check(chat)?;
        if let Some(keyboard) = &message.keyboard {
            self.keyboards
                .lock()
                .expect("lock")
                .insert(chat.clone(), keyboard.clone());
        }
        self.log
            .lock()
            .expect("lock")
            .push(Sent::Text(chat.clone(), message.text.clone()));
        Ok(self.ack(chat))
    }

    async fn send_media(
        &self,
        chat: &ChatTarget,
        media: &OutgoingMedia,
    ) -> Result<SentMessage, TransportError> {
        self.check(chat)?;
        self.log
            .lock()
            .expect("lock")
            .push(Sent::Media(chat.clone(), media.clone()));
        Ok(self.ack(chat))
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError> {
        self.log
            .lock()
            .expect("lock")
            .push(Sent::Edit(chat_id, message_id, message.text.clone()));
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<(), TransportError> {
        self.check(&ChatTarget::Id(chat_id))
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError> {
        self.log
            .lock()
            .expect("lock")
            .push(Sent::Delete(chat_id, message_id));
        Ok(())
    }

    async fn chat_membership(
        &self,
        _chat: &ChatTarget,
        user_id: i64,
    ) -> Result<MembershipStatus, TransportError> {
        if let Some(kind) = *self.membership_error.lock().expect("lock") {
            return Err(TransportError::new(kind, "membership lookup failed"));
        }
        if self.left.lock().expect("lock").contains(&user_id) {
            return Ok(MembershipStatus::Left);
        }
        Ok(MembershipStatus::Member)
    }

    async fn bot_username(&self) -> Result<String, TransportError> {
        Ok("vault_bot".to_string())
    }
}

pub struct Harness {
    pub router: DispatchRouter,
    pub storage: Arc<SqliteStorage>,
    pub transport: Arc<RecordingTransport>,
}

pub async fn harness() -> Harness {
    let storage = Arc::new(
        SqliteStorage::in_memory()
            .await
            .expect("in-memory storage"),
    );
    let transport = Arc::new(RecordingTransport::default());
    let cleanup = MessageCleanup::new(
        transport.clone(),
        Duration::from_secs(1200),
        CancellationToken::new(),
    );
    let router = DispatchRouter::new(
        Arc::new(settings()),
        storage.clone() as Arc<dyn Storage>,
        transport.clone(),
        cleanup,
    );
    Harness {
        router,
        storage,
        transport,
    }
}

pub fn actor(id: i64) -> Actor {
    Actor::private(UserIdentity {
        id,
        username: Some(format!("user{id}")),
        first_name: Some(format!("User {id}")),
    })
}
