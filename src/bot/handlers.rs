//! Teloxide glue: converts updates into [`InboundEvent`]s for the router.

use super::commands::Command;
use super::router::{Actor, DispatchRouter, InboundEvent, Outcome};
use crate::models::UserIdentity;
use crate::transport::MediaKind;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, User};
use tracing::{debug, warn};

/// Builds the update handler tree
#[must_use]
pub fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(
            Update::filter_message()
                .filter(|msg: Message| msg.chat.is_private() && msg.from.is_some())
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(dptree::endpoint(handle_message)),
        )
}

/// Platform user to the identity the bot tracks
#[must_use]
pub fn identity_of(user: &User) -> UserIdentity {
    UserIdentity {
        id: user.id.0.cast_signed(),
        username: user.username.clone(),
        first_name: Some(user.first_name.clone()).filter(|name| !name.is_empty()),
    }
}

fn actor_of(msg: &Message) -> Option<Actor> {
    let user = msg.from.as_ref()?;
    Some(Actor {
        identity: identity_of(user),
        chat_id: msg.chat.id.0,
    })
}

/// Extracts the event carried by a non-command message
fn message_event(msg: &Message) -> Option<InboundEvent> {
    let caption = msg.caption().map(str::to_string);
    if let Some(video) = msg.video() {
        return Some(InboundEvent::Media {
            kind: MediaKind::Video,
            file_ref: video.file.id.0.clone(),
            caption,
        });
    }
    if let Some(photo) = msg.photo().and_then(<[_]>::last) {
        return Some(InboundEvent::Media {
            kind: MediaKind::Photo,
            file_ref: photo.file.id.0.clone(),
            caption,
        });
    }
    let text = msg.text()?;
    // Unknown commands must not be taken as dialogue input.
    if text.starts_with('/') {
        return None;
    }
    Some(InboundEvent::Text(text.to_string()))
}

async fn handle_command(
    msg: Message,
    cmd: Command,
    router: Arc<DispatchRouter>,
) -> Result<(), teloxide::RequestError> {
    if let Some(actor) = actor_of(&msg) {
        let outcome = router.dispatch(&actor, InboundEvent::Command(cmd)).await;
        debug!(user_id = actor.id(), ?outcome, "Command handled");
    }
    respond(())
}

async fn handle_message(msg: Message, router: Arc<DispatchRouter>) -> Result<(), teloxide::RequestError> {
    let (Some(actor), Some(event)) = (actor_of(&msg), message_event(&msg)) else {
        debug!(chat_id = msg.chat.id.0, "Ignoring unsupported message");
        return respond(());
    };
    let outcome = router.dispatch(&actor, event).await;
    debug!(user_id = actor.id(), ?outcome, "Message handled");
    respond(())
}

async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    router: Arc<DispatchRouter>,
) -> Result<(), teloxide::RequestError> {
    let outcome = match (q.data.clone(), q.message.as_ref()) {
        (Some(data), Some(message)) => {
            let actor = Actor {
                identity: identity_of(&q.from),
                chat_id: message.chat().id.0,
            };
            let event = InboundEvent::Button {
                data,
                message_id: message.id().0,
            };
            router.dispatch(&actor, event).await
        }
        _ => Outcome::Ignored,
    };

    // The spinner on the button stays until the query is answered.
    let answer = bot.answer_callback_query(q.id.clone());
    let result = match outcome {
        Outcome::Denied => {
            answer
                .text("🚫 You are banned from using this bot.")
                .show_alert(true)
                .await
        }
        Outcome::Forbidden => {
            answer
                .text("⛔️ Administrators only.")
                .show_alert(true)
                .await
        }
        _ => answer.await,
    };
    if let Err(e) = result {
        warn!(user_id = q.from.id.0, error = %e, "Failed to answer callback query");
    }
    respond(())
}
