// Integration tests: stale signals, concurrent offers and failure paths.

mod common;

use common::{establish, eventually, pair, settle, spawn_peer};
use peercall::callcore::{CallError, Notice, Phase};
use peercall::platform::LoopbackPlatform;
use peercall::transport::MemoryRelay;

#[tokio::test]
async fn test_call_ended_for_another_peer_changes_nothing() {
    let relay = MemoryRelay::new();
    let (alice, bob) = pair(&relay).await;
    establish(&alice, &bob).await;
    let before = bob.view();

    relay
        .inject(
            "bob",
            r#"{"event":"call-ended","data":{"target":"carol","sender":"alice"}}"#.to_string(),
        )
        .await;
    relay
        .inject(
            "bob",
            r#"{"event":"call-ended","data":{"target":"bob","sender":"mallory"}}"#.to_string(),
        )
        .await;
    settle().await;

    assert_eq!(bob.view(), before);
    assert!(bob.events.notices().is_empty());
    assert!(bob.events.errors().is_empty());
}

#[tokio::test]
async fn test_stray_termination_while_idle_is_ignored() {
    let relay = MemoryRelay::new();
    let bob = spawn_peer(&relay, "bob", LoopbackPlatform::new("bob")).await;

    relay
        .inject(
            "bob",
            r#"{"event":"call-rejected","data":{"sender":"alice"}}"#.to_string(),
        )
        .await;
    relay
        .inject(
            "bob",
            r#"{"event":"call-ended","data":{"target":"bob","sender":"alice"}}"#.to_string(),
        )
        .await;
    relay
        .inject("bob", common::candidate_frame("alice", "late"))
        .await;
    settle().await;

    assert_eq!(bob.view().phase, Phase::Idle);
    assert!(bob.events.errors().is_empty());
    assert!(bob.platform.applied_candidates().is_empty());
}

#[tokio::test]
async fn test_offer_while_busy_is_rejected() {
    let relay = MemoryRelay::new();
    let (alice, bob) = pair(&relay).await;
    let carol = spawn_peer(&relay, "carol", LoopbackPlatform::new("carol")).await;
    carol
        .wait_for("bob online", |v| v.peers.iter().any(|p| p == "bob"))
        .await;
    establish(&alice, &bob).await;

    carol.engine().select_target("bob").await.unwrap();
    carol.engine().initiate_call().await.unwrap();
    carol.wait_for_phase(Phase::Idle).await;

    assert_eq!(
        carol.events.notices(),
        vec![Notice::CallRejected { by: "bob".into() }]
    );
    assert_eq!(
        bob.events.notices(),
        vec![Notice::AutoRejected {
            from: "carol".into()
        }]
    );
    assert_eq!(bob.view().phase, Phase::Connected);
    assert_eq!(bob.view().remote_peer, Some("alice".into()));
    assert_eq!(bob.platform.connections_created(), 1);
}

#[tokio::test]
async fn test_initiate_while_in_call_is_refused() {
    let relay = MemoryRelay::new();
    let (alice, bob) = pair(&relay).await;
    establish(&alice, &bob).await;

    assert_eq!(
        alice.engine().initiate_call().await,
        Err(CallError::ConcurrentSession("bob".into()))
    );
    assert_eq!(alice.view().phase, Phase::Connected);
}

#[tokio::test]
async fn test_peer_leaving_ends_the_call() {
    let relay = MemoryRelay::new();
    let (alice, bob) = pair(&relay).await;
    establish(&alice, &bob).await;

    relay.kick("bob").await;
    let view = alice.wait_for_phase(Phase::Idle).await;

    assert!(view.peers.is_empty());
    assert_eq!(
        alice.events.notices(),
        vec![Notice::PeerLeft { peer: "bob".into() }]
    );
    eventually("alice released", || alice.platform.live_connections() == 0).await;

    // Bob lost only the relay; his direct call survives locally.
    let bob_view = bob.wait_for("relay lost", |v| !v.channel_available).await;
    assert_eq!(bob_view.phase, Phase::Connected);
}

#[tokio::test]
async fn test_selected_peer_leaving_clears_selection() {
    let relay = MemoryRelay::new();
    let (alice, bob) = pair(&relay).await;

    alice.engine().select_target("bob").await.unwrap();
    alice
        .wait_for("selection", |v| v.selected_target.is_some())
        .await;
    bob.client.disconnect().await;

    let view = alice
        .wait_for("bob gone", |v| v.peers.is_empty())
        .await;
    assert_eq!(view.selected_target, None);
    assert_eq!(
        alice.engine().initiate_call().await,
        Err(CallError::NoTargetSelected)
    );
}

#[tokio::test]
async fn test_command_preconditions() {
    let relay = MemoryRelay::new();
    let (alice, _bob) = pair(&relay).await;

    assert_eq!(
        alice.engine().initiate_call().await,
        Err(CallError::NoTargetSelected)
    );
    assert_eq!(
        alice.engine().select_target("nobody").await,
        Err(CallError::UnknownPeer("nobody".into()))
    );
    assert_eq!(
        alice.engine().select_target("alice").await,
        Err(CallError::UnknownPeer("alice".into()))
    );
    assert_eq!(
        alice.engine().accept_call().await,
        Err(CallError::NoActiveSession)
    );
    assert_eq!(
        alice.engine().reject_call().await,
        Err(CallError::NoActiveSession)
    );
    assert_eq!(alice.engine().end_call().await, Ok(()));
    assert_eq!(alice.platform.connections_created(), 0);
}

#[tokio::test]
async fn test_media_failure_blocks_calls() {
    let relay = MemoryRelay::new();
    let bob = spawn_peer(&relay, "bob", LoopbackPlatform::new("bob")).await;

    let events = std::sync::Arc::new(common::Recorder::default());
    let bus = peercall::callcore::CoreEventBus::new();
    bus.add_handler(events.clone());
    let platform = LoopbackPlatform::new("alice").with_media_failure("no microphone");
    let alice = peercall::Client::new(
        "alice".into(),
        std::sync::Arc::new(relay.factory()),
        peercall::platform::Platform::new(platform.clone()),
        bus,
    );
    alice.connect().await.unwrap();

    eventually("media error", || !events.errors().is_empty()).await;
    assert_eq!(
        events.errors()[0],
        CallError::MediaUnavailable("no microphone".into())
    );

    let mut views = alice.engine().subscribe();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        views.wait_for(|v| v.peers.iter().any(|p| p == "bob")),
    )
    .await
    .unwrap()
    .unwrap();

    alice.engine().select_target("bob").await.unwrap();
    assert_eq!(
        alice.engine().initiate_call().await,
        Err(CallError::MediaUnavailable("no microphone".into()))
    );
    assert_eq!(platform.connections_created(), 0);
    assert_eq!(bob.view().phase, Phase::Idle);
}

#[tokio::test]
async fn test_failed_offer_apply_rejects_caller() {
    let relay = MemoryRelay::new();
    let alice = spawn_peer(&relay, "alice", LoopbackPlatform::new("alice")).await;
    let bob = spawn_peer(
        &relay,
        "bob",
        LoopbackPlatform::new("bob").rejecting_remote_descriptions(),
    )
    .await;
    alice
        .wait_for("bob online", |v| v.peers.iter().any(|p| p == "bob"))
        .await;

    alice.engine().select_target("bob").await.unwrap();
    alice.engine().initiate_call().await.unwrap();

    alice.wait_for_phase(Phase::Idle).await;
    assert_eq!(
        alice.events.notices(),
        vec![Notice::CallRejected { by: "bob".into() }]
    );
    assert!(matches!(
        bob.events.errors().as_slice(),
        [CallError::Negotiation(_)]
    ));
    bob.wait_for_phase(Phase::Idle).await;
    eventually("bob released", || bob.platform.live_connections() == 0).await;
}

#[tokio::test]
async fn test_relay_loss_aborts_pending_call() {
    let relay = MemoryRelay::new();
    let (alice, bob) = pair(&relay).await;

    alice.engine().select_target("bob").await.unwrap();
    alice.engine().initiate_call().await.unwrap();
    bob.wait_for_phase(Phase::RingingIncoming).await;

    relay.kick("alice").await;
    let view = alice.wait_for_phase(Phase::Idle).await;
    assert!(!view.channel_available);
    assert!(alice.events.errors().contains(&CallError::ChannelUnavailable));
    assert_eq!(
        alice.engine().initiate_call().await,
        Err(CallError::NoTargetSelected)
    );

    // Bob sees the caller vanish from the peer list.
    bob.wait_for_phase(Phase::Idle).await;
    assert_eq!(
        bob.events.notices(),
        vec![Notice::PeerLeft {
            peer: "alice".into()
        }]
    );
}

#[tokio::test]
async fn test_simultaneous_calls_resolve_to_one_session() {
    let relay = MemoryRelay::new();
    let (alice, bob) = pair(&relay).await;
    alice.engine().select_target("bob").await.unwrap();
    bob.engine().select_target("alice").await.unwrap();

    let (from_alice, from_bob) =
        tokio::join!(alice.engine().initiate_call(), bob.engine().initiate_call());
    assert_eq!(from_alice, Ok(()));
    assert_eq!(from_bob, Ok(()));

    // The lower id yields and rings with the other side's call.
    let ringing = alice.wait_for_phase(Phase::RingingIncoming).await;
    assert_eq!(ringing.incoming_call_from, Some("bob".into()));
    assert_eq!(bob.view().phase, Phase::Calling);
    settle().await;
    assert_eq!(alice.view().phase, Phase::RingingIncoming);
    assert_eq!(bob.view().phase, Phase::Calling);

    alice.engine().accept_call().await.unwrap();
    alice.wait_for_phase(Phase::Connected).await;
    bob.wait_for_phase(Phase::Connected).await;

    assert!(alice.events.notices().is_empty());
    assert!(bob.events.notices().is_empty());
    assert!(alice.events.errors().is_empty());
    assert!(bob.events.errors().is_empty());
    assert!(relay.sent_by("alice", "call-rejected").is_empty());
    assert!(relay.sent_by("bob", "call-rejected").len() <= 1);
    eventually("yielded connection released", || {
        alice.platform.live_connections() == 1
    })
    .await;
}

#[tokio::test]
async fn test_duplicate_offer_from_caller_is_ignored() {
    let relay = MemoryRelay::new();
    let (alice, bob) = pair(&relay).await;
    alice.engine().select_target("bob").await.unwrap();
    alice.engine().initiate_call().await.unwrap();
    bob.wait_for_phase(Phase::RingingIncoming).await;

    relay.inject("bob", common::offer_frame("alice")).await;
    settle().await;

    assert_eq!(bob.view().phase, Phase::RingingIncoming);
    assert_eq!(bob.platform.connections_created(), 1);
    assert!(relay.sent_by("bob", "call-rejected").is_empty());
}
