//! Integration tests driving the full `Dispatcher` the way a connection
//! would: room lifecycle, video state transitions, queue/chat, screen-share,
//! and the SFU voice handshake against a real (local) mediasoup worker.
//! Style mirrors the teacher's `tests/session.rs` / `tests/relay_server.rs`
//! split, generalized from a bare `RelayServer` to the watch-party
//! `Dispatcher`.

mod fixture;

use mediasoup::rtp_parameters::MediaKind;
use mediasoup::transport::Transport;

use watchparty_relay::ids::ParticipantId;

#[tokio::test]
async fn create_then_join_reaches_host_consistent_state() {
    let dispatcher = fixture::dispatcher().await;

    let (room_code, alice_id) = dispatcher.room_create("Alice").unwrap();
    let (room, bob_id) = dispatcher.room_join(&room_code, "Bob").unwrap();

    assert_eq!(room.host_id(), Some(alice_id));
    assert_eq!(room.participant_count(), 2);
    assert_ne!(alice_id, bob_id);
}

#[tokio::test]
async fn leave_promotes_earliest_joined_remaining_host() {
    let dispatcher = fixture::dispatcher().await;

    let (room_code, alice_id) = dispatcher.room_create("Alice").unwrap();
    let (_room, bob_id) = dispatcher.room_join(&room_code, "Bob").unwrap();
    let (room, _carol_id) = dispatcher.room_join(&room_code, "Carol").unwrap();

    dispatcher.room_leave(alice_id).await;

    assert_eq!(room.host_id(), Some(bob_id));
}

#[tokio::test]
async fn leave_then_rejoin_same_name_gives_fresh_id() {
    let dispatcher = fixture::dispatcher().await;

    let (room_code, alice_id) = dispatcher.room_create("Alice").unwrap();
    dispatcher.room_leave(alice_id).await;

    // The room died with its last participant; re-creating under the same
    // name must not resurrect the old id or room code.
    let (room_code2, new_id) = dispatcher.room_create("Alice").unwrap();
    assert_ne!(alice_id, new_id);
    assert_ne!(room_code, room_code2);
    assert!(dispatcher.registry().lookup_by_code(&room_code).is_none());
}

#[tokio::test]
async fn join_unknown_room_code_is_not_found() {
    let dispatcher = fixture::dispatcher().await;
    let err = dispatcher
        .room_join(&watchparty_relay::ids::RoomCode::from("ZZZZZZ"), "Mallory")
        .unwrap_err();
    assert!(matches!(err, watchparty_relay::error::RelayError::RoomNotFound(_)));
}

#[tokio::test]
async fn echo_suppression_play_and_pause_produce_no_mutation() {
    let dispatcher = fixture::dispatcher().await;
    let (_code, alice_id) = dispatcher.room_create("Alice").unwrap();
    let room = dispatcher.registry().lookup(alice_id).unwrap();

    dispatcher
        .video_load(alice_id, "https://youtu.be/dQw4w9WgXcQ")
        .unwrap();
    let seq_after_load = room.video_snapshot().seq;

    // Already playing -- a second `video:play` must be a no-op.
    dispatcher.video_play(alice_id).unwrap();
    assert_eq!(room.video_snapshot().seq, seq_after_load);

    dispatcher.video_pause(alice_id, 12.0).unwrap();
    let seq_after_pause = room.video_snapshot().seq;
    assert!(seq_after_pause > seq_after_load);

    // Already paused -- a second `video:pause` must be a no-op.
    dispatcher.video_pause(alice_id, 13.0).unwrap();
    assert_eq!(room.video_snapshot().seq, seq_after_pause);
    assert_eq!(room.video_snapshot().current_time, 12.0);
}

#[tokio::test]
async fn seek_and_rate_always_apply_and_bump_seq() {
    let dispatcher = fixture::dispatcher().await;
    let (_code, alice_id) = dispatcher.room_create("Alice").unwrap();
    let room = dispatcher.registry().lookup(alice_id).unwrap();

    dispatcher.video_load(alice_id, "https://youtu.be/dQw4w9WgXcQ").unwrap();
    dispatcher.video_pause(alice_id, 10.0).unwrap();
    let seq_before = room.video_snapshot().seq;

    dispatcher.video_seek(alice_id, 42.0).unwrap();
    assert!(room.video_snapshot().seq > seq_before);
    assert_eq!(room.video_snapshot().current_time, 42.0);

    dispatcher.video_play(alice_id).unwrap();
    let seq_before_rate = room.video_snapshot().seq;
    dispatcher.video_rate(alice_id, 2.0).unwrap();
    assert!(room.video_snapshot().seq > seq_before_rate);
    assert_eq!(room.video_snapshot().rate, 2.0);
}

#[tokio::test]
async fn queue_auto_advances_exactly_once_under_concurrent_ended() {
    let dispatcher = fixture::dispatcher().await;
    let (_code, alice_id) = dispatcher.room_create("Alice").unwrap();
    let room = dispatcher.registry().lookup(alice_id).unwrap();

    dispatcher.video_load(alice_id, "https://youtu.be/dQw4w9WgXcQ").unwrap();
    dispatcher.queue_add(alice_id, "https://youtu.be/AAAAAAAAAAA").unwrap();
    dispatcher.queue_add(alice_id, "https://youtu.be/BBBBBBBBBBB").unwrap();

    // Three clients firing `video:ended` within the debounce window.
    dispatcher.video_ended(alice_id).unwrap();
    dispatcher.video_ended(alice_id).unwrap();
    dispatcher.video_ended(alice_id).unwrap();

    assert_eq!(room.video_snapshot().video_id, "AAAAAAAAAAA");
    assert_eq!(room.queue_snapshot().len(), 1);
}

#[tokio::test]
async fn queue_add_rejected_at_capacity() {
    let dispatcher = fixture::dispatcher().await;
    let (_code, alice_id) = dispatcher.room_create("Alice").unwrap();

    for _ in 0..watchparty_relay::queue::MAX_QUEUE_LEN {
        dispatcher.queue_add(alice_id, "https://youtu.be/dQw4w9WgXcQ").unwrap();
    }
    let err = dispatcher
        .queue_add(alice_id, "https://youtu.be/dQw4w9WgXcQ")
        .unwrap_err();
    assert!(matches!(err, watchparty_relay::error::RelayError::InvalidInput(_)));
}

#[tokio::test]
async fn queue_item_title_carries_over_on_play() {
    let dispatcher = fixture::dispatcher().await;
    let (_code, alice_id) = dispatcher.room_create("Alice").unwrap();
    let room = dispatcher.registry().lookup(alice_id).unwrap();

    let item = dispatcher
        .queue_add(alice_id, "https://youtu.be/AAAAAAAAAAA")
        .unwrap();
    dispatcher.queue_backfill_title(&room, item.id, "Great Video".to_owned());
    dispatcher.queue_play(alice_id, item.id).unwrap();

    assert_eq!(room.video_snapshot().title.as_deref(), Some("Great Video"));
}

#[tokio::test]
async fn chat_message_over_length_cap_is_rejected() {
    let dispatcher = fixture::dispatcher().await;
    let (_code, alice_id) = dispatcher.room_create("Alice").unwrap();

    let too_long: String = "x".repeat(watchparty_relay::chat::MAX_BODY_LEN + 1);
    let err = dispatcher.chat_message(alice_id, &too_long).unwrap_err();
    assert!(matches!(err, watchparty_relay::error::RelayError::InvalidInput(_)));

    let ok: String = "x".repeat(watchparty_relay::chat::MAX_BODY_LEN);
    assert!(dispatcher.chat_message(alice_id, &ok).is_ok());
}

#[tokio::test]
async fn chat_delete_restricted_to_author_or_host() {
    let dispatcher = fixture::dispatcher().await;
    let (room_code, alice_id) = dispatcher.room_create("Alice").unwrap();
    let (_room, bob_id) = dispatcher.room_join(&room_code, "Bob").unwrap();

    dispatcher.chat_message(bob_id, "hello").unwrap();
    let room = dispatcher.registry().lookup(alice_id).unwrap();
    let message_id = room.snapshot().chat_log.iter().find(|m| m.body == "hello").unwrap().id;

    // A third party (neither author nor host) cannot delete.
    let (_room2, carol_id) = dispatcher.room_join(&room_code, "Carol").unwrap();
    assert!(dispatcher.chat_delete(carol_id, message_id).is_err());

    // The host can delete someone else's message.
    dispatcher.chat_delete(alice_id, message_id).unwrap();
    assert!(room.snapshot().chat_log.iter().all(|m| m.id != message_id));
}

#[tokio::test]
async fn screen_share_single_sharer_invariant() {
    let dispatcher = fixture::dispatcher().await;
    let (room_code, alice_id) = dispatcher.room_create("Alice").unwrap();
    let (_room, bob_id) = dispatcher.room_join(&room_code, "Bob").unwrap();

    dispatcher.screen_start(alice_id).unwrap();
    let err = dispatcher.screen_start(bob_id).unwrap_err();
    assert!(matches!(err, watchparty_relay::error::RelayError::Conflict(_)));

    dispatcher.screen_stop(alice_id).unwrap();
    // Once stopped, another participant may start sharing.
    dispatcher.screen_start(bob_id).unwrap();
}

#[tokio::test]
async fn voice_late_join_sees_existing_producers() {
    let dispatcher = fixture::dispatcher().await;
    let local_pool = tokio_local::new_local_pool(2);

    let (room_code, alice_id) = dispatcher.room_create("Alice").unwrap();
    let (_room, bob_id) = dispatcher.room_join(&room_code, "Bob").unwrap();

    for id in [alice_id, bob_id] {
        dispatcher.voice_join(id).await.unwrap();
        let send_transport = dispatcher.voice_create_send_transport(id).await.unwrap();
        dispatcher
            .voice_connect_transport(id, send_transport.id(), fixture::dtls_parameters())
            .await
            .unwrap();
        dispatcher
            .voice_produce(
                &local_pool,
                id,
                MediaKind::Audio,
                fixture::audio_producer_device_parameters(),
            )
            .await
            .unwrap();
    }

    let (_room3, carol_id) = dispatcher.room_join(&room_code, "Carol").unwrap();
    let (_caps, existing) = dispatcher.voice_join(carol_id).await.unwrap();

    let seen: Vec<ParticipantId> = existing.into_iter().map(|(id, _producer)| id).collect();
    assert!(seen.contains(&alice_id));
    assert!(seen.contains(&bob_id));
}

#[tokio::test]
async fn voice_leave_emits_producer_closed_and_drops_membership() {
    let dispatcher = fixture::dispatcher().await;
    let local_pool = tokio_local::new_local_pool(2);

    let (room_code, alice_id) = dispatcher.room_create("Alice").unwrap();
    let (room, _bob_id) = dispatcher.room_join(&room_code, "Bob").unwrap();

    dispatcher.voice_join(alice_id).await.unwrap();
    let send_transport = dispatcher.voice_create_send_transport(alice_id).await.unwrap();
    dispatcher
        .voice_connect_transport(alice_id, send_transport.id(), fixture::dtls_parameters())
        .await
        .unwrap();
    dispatcher
        .voice_produce(
            &local_pool,
            alice_id,
            MediaKind::Audio,
            fixture::audio_producer_device_parameters(),
        )
        .await
        .unwrap();

    assert!(room.voice_members().contains(&alice_id));
    dispatcher.voice_leave(alice_id).await.unwrap();
    assert!(!room.voice_members().contains(&alice_id));
}
