mod common;

use common::{actor, harness, Sent, ADMIN_A, ADMIN_B, OWNER, USER};
use video_vault::bot::views::{CallbackAction, RetryTarget};
use video_vault::bot::{Command, ConversationState, InboundEvent, Outcome};
use video_vault::error::ErrorKind;
use video_vault::models::BroadcastStatus;
use video_vault::storage::Storage;
use video_vault::transport::{ButtonAction, ChatTarget, MediaKind, TransportErrorKind};

fn video(file_ref: &str) -> InboundEvent {
    InboundEvent::Media {
        kind: MediaKind::Video,
        file_ref: file_ref.to_string(),
        caption: None,
    }
}

fn text(body: &str) -> InboundEvent {
    InboundEvent::Text(body.to_string())
}

#[tokio::test]
async fn upload_with_skipped_description_stores_exactly_one_video() {
    let h = harness().await;
    let admin = actor(ADMIN_A);

    assert_eq!(h.router.dispatch(&admin, video("file-1")).await, Outcome::Handled);
    assert_eq!(
        h.router.conversations().get(ADMIN_A).await,
        ConversationState::AwaitingVideoName {
            file_ref: "file-1".into()
        }
    );

    assert_eq!(h.router.dispatch(&admin, text("Sunset")).await, Outcome::Handled);
    assert_eq!(h.router.dispatch(&admin, text("skip")).await, Outcome::Handled);
    assert_eq!(
        h.router.conversations().get(ADMIN_A).await,
        ConversationState::Idle
    );

    let videos = h.storage.list_videos().await.expect("list videos");
    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0].name, "Sunset");
    assert_eq!(videos[0].description, "");
    assert_eq!(videos[0].media_ref, "file-1");

    let reply = h
        .transport
        .last_text_to(&ChatTarget::Id(ADMIN_A))
        .expect("confirmation sent");
    assert!(reply.contains(&format!("https://t.me/vault_bot?start={}", videos[0].id)));
}

/// Stores a video through the upload dialogue and returns its id
async fn upload(h: &common::Harness, file_ref: &str) -> String {
    let admin = actor(ADMIN_A);
    h.router.dispatch(&admin, video(file_ref)).await;
    h.router.dispatch(&admin, text("Clip")).await;
    h.router.dispatch(&admin, text("skip")).await;
    h.storage
        .list_videos()
        .await
        .expect("list videos")
        .into_iter()
        .find(|v| v.media_ref == file_ref)
        .map(|v| v.id)
        .expect("video stored")
}

async fn enable_join_access(h: &common::Harness) {
    let outcome = h
        .router
        .dispatch(&actor(OWNER), InboundEvent::Command(Command::JoinAccess))
        .await;
    assert_eq!(outcome, Outcome::Handled);
    assert!(h.router.join_access_enabled());
}

#[tokio::test]
async fn new_video_restarts_an_unfinished_upload() {
    let h = harness().await;
    let admin = actor(ADMIN_A);
    h.router.dispatch(&admin, video("file-1")).await;
    h.router.dispatch(&admin, text("Old name")).await;

    assert_eq!(h.router.dispatch(&admin, video("file-2")).await, Outcome::Handled);
    assert_eq!(
        h.router.conversations().get(ADMIN_A).await,
        ConversationState::AwaitingVideoName {
            file_ref: "file-2".into()
        }
    );

    h.router.dispatch(&admin, text("New name")).await;
    h.router.dispatch(&admin, text("skip")).await;
    let videos = h.storage.list_videos().await.expect("list videos");
    assert_eq!(videos.len(), 1);
    assert_eq!((videos[0].name.as_str(), videos[0].media_ref.as_str()), ("New name", "file-2"));
}

#[tokio::test]
async fn interleaved_uploads_stay_per_identity() {
    let h = harness().await;
    let a = actor(ADMIN_A);
    let b = actor(ADMIN_B);

    h.router.dispatch(&a, video("file-a")).await;
    h.router.dispatch(&b, video("file-b")).await;
    h.router.dispatch(&b, text("From B")).await;
    h.router.dispatch(&a, text("From A")).await;
    h.router.dispatch(&a, text("first description")).await;
    h.router.dispatch(&b, text("skip")).await;

    let mut videos = h.storage.list_videos().await.expect("list videos");
    videos.sort_by(|x, y| x.name.cmp(&y.name));
    assert_eq!(videos.len(), 2);
    assert_eq!((videos[0].name.as_str(), videos[0].media_ref.as_str()), ("From A", "file-a"));
    assert_eq!(videos[0].description, "first description");
    assert_eq!((videos[1].name.as_str(), videos[1].media_ref.as_str()), ("From B", "file-b"));
}

#[tokio::test]
async fn empty_name_keeps_the_dialogue() {
    let h = harness().await;
    let admin = actor(ADMIN_A);
    h.router.dispatch(&admin, video("file-1")).await;

    let outcome = h.router.dispatch(&admin, text("   ")).await;
    assert_eq!(outcome, Outcome::Rejected(ErrorKind::ValidationFailure));
    assert!(h.router.conversations().get(ADMIN_A).await.is_upload());
}

#[tokio::test]
async fn videos_from_users_are_ignored() {
    let h = harness().await;
    let outcome = h.router.dispatch(&actor(USER), video("file-x")).await;
    assert_eq!(outcome, Outcome::Ignored);
    assert_eq!(h.router.conversations().get(USER).await, ConversationState::Idle);
}

#[tokio::test]
async fn deep_link_delivers_video_and_schedules_cleanup() {
    let h = harness().await;
    let admin = actor(ADMIN_A);
    h.router.dispatch(&admin, video("file-1")).await;
    h.router.dispatch(&admin, text("Clip")).await;
    h.router.dispatch(&admin, text("A short clip")).await;
    let id = h.storage.list_videos().await.expect("list videos")[0].id.clone();

    let outcome = h
        .router
        .dispatch(&actor(USER), InboundEvent::Command(Command::Start(id.clone())))
        .await;
    assert_eq!(outcome, Outcome::Handled);

    let delivered = h.transport.sent().into_iter().any(|s| {
        matches!(s, Sent::Media(ChatTarget::Id(USER), media) if media.file_ref == "file-1")
    });
    assert!(delivered);
    assert_eq!(h.router.cleanup().pending(), 1);

    let summary = h.storage.analytics_summary().await.expect("analytics");
    assert_eq!(summary.total_views, 1);
}

#[tokio::test]
async fn banned_identity_is_denied_without_state_changes() {
    let h = harness().await;
    h.storage
        .ban_user(ADMIN_B + 100, OWNER, "spam")
        .await
        .expect("ban");
    let banned = actor(ADMIN_B + 100);

    let outcome = h.router.dispatch(&banned, text("hello")).await;
    assert_eq!(outcome, Outcome::Denied);
    let outcome = h
        .router
        .dispatch(&banned, InboundEvent::Command(Command::Browse))
        .await;
    assert_eq!(outcome, Outcome::Denied);

    // One notice, then silence.
    assert_eq!(h.transport.texts_to(&ChatTarget::Id(ADMIN_B + 100)).len(), 1);
    // Denied attempts are still in the audit trail.
    let trail = h
        .storage
        .user_activity(ADMIN_B + 100, 10)
        .await
        .expect("activity");
    assert_eq!(trail.len(), 2);
}

#[tokio::test]
async fn admins_are_immune_to_bans() {
    let h = harness().await;
    let owner = actor(OWNER);
    let outcome = h
        .router
        .dispatch(
            &owner,
            InboundEvent::Command(Command::BulkBan(format!("{USER} {ADMIN_A} nope | flood"))),
        )
        .await;
    assert_eq!(outcome, Outcome::Handled);

    assert!(h.storage.is_banned(USER).await.expect("ban check"));
    assert!(!h.storage.is_banned(ADMIN_A).await.expect("ban check"));
    let report = h
        .transport
        .last_text_to(&ChatTarget::Id(OWNER))
        .expect("report sent");
    assert!(report.contains("Banned: 1"));
    assert!(report.contains("Skipped (admins): 1"));
    assert!(report.contains("Invalid ids: 1"));
}

#[tokio::test]
async fn channel_broadcast_dialogue_posts_once() {
    let h = harness().await;
    let admin = actor(ADMIN_A);

    let outcome = h
        .router
        .dispatch(&admin, InboundEvent::Command(Command::ChannelBroadcast))
        .await;
    assert_eq!(outcome, Outcome::Handled);
    assert_eq!(
        h.router.conversations().get(ADMIN_A).await,
        ConversationState::AwaitingBroadcastChannel
    );

    let pick = InboundEvent::Button {
        data: "bc:ch:1".to_string(),
        message_id: 7,
    };
    assert_eq!(h.router.dispatch(&admin, pick).await, Outcome::Handled);
    assert!(matches!(
        h.router.conversations().get(ADMIN_A).await,
        ConversationState::AwaitingBroadcastContent { initiator_id: ADMIN_A, .. }
    ));

    assert_eq!(h.router.dispatch(&admin, text("Big news")).await, Outcome::Handled);
    assert_eq!(
        h.transport.texts_to(&ChatTarget::Handle("@first".into())),
        vec!["Big news".to_string()]
    );
    assert_eq!(
        h.router.conversations().get(ADMIN_A).await,
        ConversationState::Idle
    );

    // The state was single-use: more text goes nowhere.
    assert_eq!(h.router.dispatch(&admin, text("again")).await, Outcome::Ignored);
    assert_eq!(h.transport.texts_to(&ChatTarget::Handle("@first".into())).len(), 1);
}

#[tokio::test]
async fn failed_channel_post_still_ends_the_dialogue() {
    let h = harness().await;
    h.transport.block(ChatTarget::Handle("@first".into()));
    let admin = actor(ADMIN_A);

    h.router
        .dispatch(&admin, InboundEvent::Command(Command::ChannelBroadcast))
        .await;
    h.router
        .dispatch(
            &admin,
            InboundEvent::Button {
                data: "bc:ch:1".to_string(),
                message_id: 7,
            },
        )
        .await;
    let outcome = h.router.dispatch(&admin, text("Big news")).await;
    assert_eq!(outcome, Outcome::Rejected(ErrorKind::DeliveryFailure));
    assert_eq!(
        h.router.conversations().get(ADMIN_A).await,
        ConversationState::Idle
    );
}

#[tokio::test]
async fn cancel_clears_any_dialogue() {
    let h = harness().await;
    let admin = actor(ADMIN_A);
    h.router
        .dispatch(&admin, InboundEvent::Command(Command::ChannelBroadcast))
        .await;

    let outcome = h
        .router
        .dispatch(&admin, InboundEvent::Command(Command::Cancel))
        .await;
    assert_eq!(outcome, Outcome::Handled);
    assert_eq!(
        h.router.conversations().get(ADMIN_A).await,
        ConversationState::Idle
    );
}

#[tokio::test]
async fn schedule_command_persists_a_pending_broadcast() {
    let h = harness().await;
    let outcome = h
        .router
        .dispatch(
            &actor(ADMIN_A),
            InboundEvent::Command(Command::Schedule("2 +30m Evening post".into())),
        )
        .await;
    assert_eq!(outcome, Outcome::Handled);

    let scheduled = h
        .storage
        .list_scheduled_broadcasts(Some(ADMIN_A), 10)
        .await
        .expect("list schedule");
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].target_channel, "-100500");
    assert_eq!(scheduled[0].content, "Evening post");
    assert_eq!(scheduled[0].status, BroadcastStatus::Pending);
}

#[tokio::test]
async fn photo_caption_schedules_a_photo_broadcast() {
    let h = harness().await;
    let outcome = h
        .router
        .dispatch(
            &actor(ADMIN_B),
            InboundEvent::Media {
                kind: MediaKind::Photo,
                file_ref: "photo-1".into(),
                caption: Some("/schedule @first +1h Look at this".into()),
            },
        )
        .await;
    assert_eq!(outcome, Outcome::Handled);

    let scheduled = h
        .storage
        .list_scheduled_broadcasts(None, 10)
        .await
        .expect("list schedule");
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].media_ref.as_deref(), Some("photo-1"));
    assert_eq!(scheduled[0].content, "Look at this");
}

#[tokio::test]
async fn owner_broadcast_removes_unreachable_users() {
    let h = harness().await;
    for id in [USER, USER + 1] {
        h.router
            .dispatch(&actor(id), InboundEvent::Command(Command::Ping))
            .await;
    }
    h.transport.block(ChatTarget::Id(USER + 1));

    let outcome = h
        .router
        .dispatch(
            &actor(OWNER),
            InboundEvent::Command(Command::Broadcast("Hello all".into())),
        )
        .await;
    assert_eq!(outcome, Outcome::Handled);

    assert!(h
        .transport
        .texts_to(&ChatTarget::Id(USER))
        .contains(&"Hello all".to_string()));
    assert!(h.storage.find_user(USER + 1).await.expect("lookup").is_none());
    assert!(h.storage.find_user(USER).await.expect("lookup").is_some());
}

#[tokio::test]
async fn broadcast_to_everyone_is_owner_only() {
    let h = harness().await;
    let outcome = h
        .router
        .dispatch(
            &actor(ADMIN_A),
            InboundEvent::Command(Command::Broadcast("hi".into())),
        )
        .await;
    assert_eq!(outcome, Outcome::Forbidden);
}

#[tokio::test]
async fn join_gate_holds_back_videos_until_the_user_joins() {
    let h = harness().await;
    let id = upload(&h, "file-1").await;
    enable_join_access(&h).await;
    h.transport.leave(USER);

    let outcome = h
        .router
        .dispatch(&actor(USER), InboundEvent::Command(Command::Start(id.clone())))
        .await;
    assert_eq!(outcome, Outcome::Handled);
    assert!(h.transport.media_to(&ChatTarget::Id(USER)).is_empty());

    let keyboard = h
        .transport
        .last_keyboard_to(&ChatTarget::Id(USER))
        .expect("join keyboard sent");
    let actions: Vec<ButtonAction> = keyboard
        .into_iter()
        .flatten()
        .map(|button| button.action)
        .collect();
    let retry_data = CallbackAction::Retry(RetryTarget::Start(id.clone())).encode();
    assert_eq!(
        actions,
        vec![
            ButtonAction::Url("https://t.me/first".into()),
            ButtonAction::Callback(retry_data.clone()),
        ]
    );

    h.transport.join(USER);
    let outcome = h
        .router
        .dispatch(
            &actor(USER),
            InboundEvent::Button {
                data: retry_data,
                message_id: 3,
            },
        )
        .await;
    assert_eq!(outcome, Outcome::Handled);
    let delivered = h.transport.media_to(&ChatTarget::Id(USER));
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].file_ref, "file-1");
}

#[tokio::test]
async fn admins_bypass_the_join_gate() {
    let h = harness().await;
    let id = upload(&h, "file-1").await;
    enable_join_access(&h).await;
    h.transport.leave(ADMIN_B);

    let outcome = h
        .router
        .dispatch(&actor(ADMIN_B), InboundEvent::Command(Command::Start(id)))
        .await;
    assert_eq!(outcome, Outcome::Handled);
    assert_eq!(h.transport.media_to(&ChatTarget::Id(ADMIN_B)).len(), 1);
}

#[tokio::test]
async fn membership_lookup_errors_at_the_join_gate() {
    let h = harness().await;
    let id = upload(&h, "file-1").await;
    enable_join_access(&h).await;

    // Network trouble is reported as temporary.
    h.transport.fail_membership(Some(TransportErrorKind::Network));
    let outcome = h
        .router
        .dispatch(&actor(USER), InboundEvent::Command(Command::Start(id.clone())))
        .await;
    assert_eq!(outcome, Outcome::Rejected(ErrorKind::TransientInfra));

    // Any other lookup failure counts as not joined.
    h.transport.fail_membership(Some(TransportErrorKind::Other));
    let outcome = h
        .router
        .dispatch(&actor(USER), InboundEvent::Command(Command::Start(id)))
        .await;
    assert_eq!(outcome, Outcome::Handled);
    assert!(h.transport.media_to(&ChatTarget::Id(USER)).is_empty());
    assert!(h.transport.last_keyboard_to(&ChatTarget::Id(USER)).is_some());
}

#[tokio::test]
async fn cleanup_removes_users_who_blocked_the_bot() {
    let h = harness().await;
    for id in [USER, USER + 1, USER + 2] {
        h.router
            .dispatch(&actor(id), InboundEvent::Command(Command::Ping))
            .await;
    }
    h.transport.block(ChatTarget::Id(USER + 2));

    let outcome = h
        .router
        .dispatch(&actor(OWNER), InboundEvent::Command(Command::CleanupUsers))
        .await;
    assert_eq!(outcome, Outcome::Handled);

    assert!(h.storage.find_user(USER).await.expect("lookup").is_some());
    assert!(h.storage.find_user(USER + 1).await.expect("lookup").is_some());
    assert!(h.storage.find_user(USER + 2).await.expect("lookup").is_none());
    let report = h
        .transport
        .last_text_to(&ChatTarget::Id(OWNER))
        .expect("report sent");
    assert!(report.contains("Removed (blocked): 1"));

    let outcome = h
        .router
        .dispatch(&actor(ADMIN_A), InboundEvent::Command(Command::CleanupUsers))
        .await;
    assert_eq!(outcome, Outcome::Forbidden);
}
