//! End-to-end orchestrator behavior against fake collaborators.

#[macro_use]
mod common;

use bridge_traits::metrics::EndReason;
use bridge_traits::{BackendEvent, MediaRequest};
use chrono::Utc;
use common::{BackendCall, FailMode, Harness, TRACK_DURATION};
use core_playback::PlaybackError;
use core_runtime::config::PreloadPolicy;
use core_runtime::events::{
    CoreEvent, EngineState, PlaybackEvent, SessionEvent, Slot, TransitionReason,
};

fn is_error(event: &CoreEvent) -> bool {
    matches!(event, CoreEvent::Playback(PlaybackEvent::Error { .. }))
}

fn is_privileges_lost(event: &CoreEvent) -> bool {
    matches!(event, CoreEvent::Session(SessionEvent::PrivilegesLost { .. }))
}

fn is_state_change(event: &CoreEvent, to: EngineState) -> bool {
    matches!(event, CoreEvent::Playback(PlaybackEvent::StateChanged { to: t, .. }) if *t == to)
}

/// Start `x`, mark it fully buffered and pre-load `y` behind it.
async fn playing_with_next(h: &Harness) {
    h.start_playing("x").await;
    h.backend.report("x", BackendEvent::Downloaded);
    h.set_next("y").await;
    h.wait_next_loaded().await;
}

#[tokio::test]
async fn load_then_play_reaches_playing() {
    let mut h = Harness::new();

    let id = h.load("x").await;
    assert_eq!(h.player.state(), EngineState::NotPlaying);

    let loaded = h
        .next_event(|e| matches!(e, CoreEvent::Playback(PlaybackEvent::ItemLoaded { .. })))
        .await;
    match loaded {
        CoreEvent::Playback(PlaybackEvent::ItemLoaded {
            session_id,
            product_id,
            duration_ms,
            slot,
        }) => {
            assert_eq!(session_id, id.to_string());
            assert_eq!(product_id, "x");
            assert_eq!(duration_ms, Some(TRACK_DURATION.as_millis() as u64));
            assert_eq!(slot, Slot::Current);
        }
        other => panic!("unexpected event {other:?}"),
    }

    h.player.play(Utc::now()).await.unwrap();
    let handle = h.backend.handle_of("x").unwrap();
    assert_eq!(h.backend.count(&BackendCall::Play(handle)), 1);

    h.backend.report("x", BackendEvent::Playing);
    h.wait_state(EngineState::Playing).await;

    let snapshot = h.snapshot().await;
    let current = snapshot.current.unwrap();
    assert_eq!(current.session_id, id);
    assert_eq!(current.duration, Some(TRACK_DURATION));
    assert!(snapshot.next.is_none());
}

#[tokio::test]
async fn next_load_waits_for_current_to_buffer() {
    let h = Harness::new();
    h.start_playing("x").await;

    h.set_next("y").await;
    h.settle().await;
    assert_eq!(h.resolver.calls_for("y"), 0);
    let next = h.snapshot().await.next.unwrap();
    assert!(!next.loading && !next.loaded);

    h.backend.report("x", BackendEvent::Downloaded);
    h.wait_next_loaded().await;
    assert_eq!(h.resolver.calls_for("y"), 1);
    assert_eq!(h.backend.loads_of("y"), 1);
}

#[tokio::test]
async fn eager_preload_starts_next_immediately() {
    let h = Harness::with(|b| b.preload(PreloadPolicy::Eager));
    h.start_playing("x").await;

    h.set_next("y").await;
    h.wait_next_loaded().await;
    assert_eq!(h.backend.loads_of("y"), 1);
}

#[tokio::test]
async fn skip_onto_loaded_next_keeps_playing() {
    let mut h = Harness::new();
    playing_with_next(&h).await;
    let x_handle = h.backend.handle_of("x").unwrap();
    let y_handle = h.backend.handle_of("y").unwrap();
    h.drain_events();

    h.player.skip_to_next().await.unwrap();

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.current.unwrap().request, MediaRequest::track("y"));
    assert!(snapshot.next.is_none());
    assert_eq!(snapshot.state, EngineState::Playing);
    assert_eq!(h.backend.count(&BackendCall::Unload(x_handle)), 1);
    assert_eq!(h.backend.count(&BackendCall::Play(y_handle)), 1);

    let events = h.drain_events();
    assert!(!events.iter().any(|e| is_state_change(e, EngineState::Stalled)));
    assert!(events.iter().any(|e| matches!(
        e,
        CoreEvent::Playback(PlaybackEvent::Transitioned {
            reason: TransitionReason::Skipped,
            from_session: Some(_),
            ..
        })
    )));
}

#[tokio::test]
async fn skip_stalls_when_backend_requires_it() {
    let mut h = Harness::new();
    h.backend.set_requires_stall_on_skip(true);
    playing_with_next(&h).await;
    h.drain_events();

    h.player.skip_to_next().await.unwrap();
    assert_eq!(h.player.state(), EngineState::Stalled);

    h.backend.report("y", BackendEvent::Playing);
    h.wait_state(EngineState::Playing).await;

    let events = h.drain_events();
    assert!(events.iter().any(|e| is_state_change(e, EngineState::Stalled)));
}

#[tokio::test]
async fn fatal_failure_clears_both_slots_and_notifies_once() {
    let mut h = Harness::new();
    playing_with_next(&h).await;
    let y_handle = h.backend.handle_of("y").unwrap();
    h.drain_events();

    h.backend
        .report("x", BackendEvent::Failed(FailMode::Fatal.error()));
    let event = h.next_event(is_error).await;
    assert!(matches!(
        event,
        CoreEvent::Playback(PlaybackEvent::Error { recoverable: false, ref product_id, .. }) if product_id == "x"
    ));

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.state, EngineState::NotPlaying);
    assert!(snapshot.current.is_none());
    assert!(snapshot.next.is_none());
    assert_eq!(h.backend.count(&BackendCall::Unload(y_handle)), 1);
    assert!(!h.drain_events().iter().any(is_error));
}

#[tokio::test]
async fn network_failure_on_next_is_retried_on_skip() {
    let mut h = Harness::new();
    h.start_playing("x").await;
    h.backend.report("x", BackendEvent::Downloaded);
    h.resolver.fail_once("y", FailMode::Network);

    h.set_next("y").await;
    eventually!(h.snapshot().await.next.is_some_and(|n| n.pending_error));
    assert!(!h.drain_events().iter().any(is_error));

    h.player.skip_to_next().await.unwrap();
    assert_eq!(h.player.state(), EngineState::Stalled);

    eventually!(h.backend.handle_of("y").is_some());
    let y_handle = h.backend.handle_of("y").unwrap();
    eventually!(h.backend.count(&BackendCall::Play(y_handle)) == 1);
    assert_eq!(h.resolver.calls_for("y"), 2);
    assert!(!h.drain_events().iter().any(is_error));
}

#[tokio::test]
async fn fatal_failure_on_next_surfaces_on_skip() {
    let mut h = Harness::new();
    h.start_playing("x").await;
    h.backend.report("x", BackendEvent::Downloaded);
    h.resolver.fail_once("y", FailMode::Fatal);

    h.set_next("y").await;
    eventually!(h.snapshot().await.next.is_some_and(|n| n.pending_error));

    h.player.skip_to_next().await.unwrap();
    h.next_event(is_error).await;
    let snapshot = h.snapshot().await;
    assert!(snapshot.current.is_none());
    assert_eq!(snapshot.state, EngineState::NotPlaying);
    assert_eq!(h.resolver.calls_for("y"), 1);
}

#[tokio::test]
async fn skip_during_initial_load_waits_for_it() {
    let h = Harness::with(|b| b.preload(PreloadPolicy::Eager));
    h.resolver.hold("a");

    h.load("a").await;
    h.set_next("b").await;
    h.wait_next_loaded().await;

    h.player.skip_to_next().await.unwrap();
    let snapshot = h.snapshot().await;
    assert!(snapshot.pending_skip);
    assert_eq!(snapshot.current.unwrap().request, MediaRequest::track("a"));

    h.resolver.release("a");
    eventually!(h
        .snapshot()
        .await
        .current
        .is_some_and(|c| c.request == MediaRequest::track("b")));

    let a_handle = h.backend.handle_of("a").unwrap();
    let b_handle = h.backend.handle_of("b").unwrap();
    assert_eq!(h.backend.count(&BackendCall::Unload(a_handle)), 1);
    assert_eq!(h.backend.count(&BackendCall::Play(b_handle)), 1);
    assert!(!h.snapshot().await.pending_skip);
}

#[tokio::test]
async fn skip_without_next_goes_idle() {
    let h = Harness::new();
    let id = h.start_playing("x").await;

    h.player.skip_to_next().await.unwrap();
    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.state, EngineState::Idle);
    assert!(snapshot.current.is_none());
    assert_eq!(h.metrics.end_reason_for(id), Some(EndReason::Skipped));
}

#[tokio::test]
async fn completed_promotes_next() {
    let mut h = Harness::new();
    playing_with_next(&h).await;
    h.drain_events();

    h.backend.report("x", BackendEvent::Completed);
    let event = h
        .next_event(|e| matches!(e, CoreEvent::Playback(PlaybackEvent::Transitioned { .. })))
        .await;
    assert!(matches!(
        event,
        CoreEvent::Playback(PlaybackEvent::Transitioned {
            reason: TransitionReason::Completed,
            ..
        })
    ));
    let current = h.snapshot().await.current.unwrap();
    assert_eq!(current.request, MediaRequest::track("y"));
}

#[tokio::test]
async fn completed_without_next_goes_idle() {
    let h = Harness::new();
    let id = h.start_playing("x").await;

    h.backend.report("x", BackendEvent::Completed);
    h.wait_state(EngineState::Idle).await;
    assert!(h.snapshot().await.current.is_none());
    assert_eq!(h.metrics.end_reason_for(id), Some(EndReason::Completed));
}

#[tokio::test]
async fn pause_is_sent_once() {
    let h = Harness::new();
    h.start_playing("x").await;
    let handle = h.backend.handle_of("x").unwrap();

    h.player.pause().await.unwrap();
    h.player.pause().await.unwrap();
    assert_eq!(h.backend.count(&BackendCall::Pause(handle)), 1);

    h.backend.report("x", BackendEvent::Paused);
    h.wait_state(EngineState::Paused).await;
    h.player.pause().await.unwrap();
    assert_eq!(h.backend.count(&BackendCall::Pause(handle)), 1);

    h.player.play(Utc::now()).await.unwrap();
    assert_eq!(h.backend.count(&BackendCall::Play(handle)), 2);
}

#[tokio::test]
async fn seek_is_forwarded() {
    let h = Harness::new();
    h.start_playing("x").await;
    let handle = h.backend.handle_of("x").unwrap();

    h.player.seek(std::time::Duration::from_secs(42)).await.unwrap();
    assert!(h
        .backend
        .calls()
        .contains(&BackendCall::Seek(handle, std::time::Duration::from_secs(42))));
}

#[tokio::test]
async fn controls_without_item_are_rejected() {
    let h = Harness::new();

    assert!(matches!(
        h.player.play(Utc::now()).await,
        Err(PlaybackError::NoItemLoaded)
    ));
    assert!(matches!(h.player.pause().await, Err(PlaybackError::NoItemLoaded)));
    assert!(matches!(
        h.player.seek(std::time::Duration::ZERO).await,
        Err(PlaybackError::NoItemLoaded)
    ));
}

#[tokio::test]
async fn set_next_is_ignored_while_idle() {
    let h = Harness::new();

    let id = h
        .player
        .set_next(Some(MediaRequest::track("y")))
        .await
        .unwrap();
    assert!(id.is_none());
    assert!(h.snapshot().await.next.is_none());
    assert_eq!(h.resolver.calls_for("y"), 0);
}

#[tokio::test]
async fn set_next_none_discards_next() {
    let h = Harness::with(|b| b.preload(PreloadPolicy::Eager));
    h.start_playing("x").await;
    let y = h.set_next("y").await;
    h.wait_next_loaded().await;
    let y_handle = h.backend.handle_of("y").unwrap();

    assert!(h.player.set_next(None).await.unwrap().is_none());
    assert!(h.snapshot().await.next.is_none());
    assert_eq!(h.backend.count(&BackendCall::Unload(y_handle)), 1);
    assert_eq!(h.metrics.end_reason_for(y), Some(EndReason::Discarded));
}

#[tokio::test]
async fn play_before_load_finishes_starts_when_ready() {
    let h = Harness::new();
    h.resolver.hold("x");

    h.load("x").await;
    h.player.play(Utc::now()).await.unwrap();
    assert!(h.backend.calls().is_empty());

    h.resolver.release("x");
    eventually!(h
        .backend
        .handle_of("x")
        .is_some_and(|handle| h.backend.count(&BackendCall::Play(handle)) == 1));
}

#[tokio::test]
async fn stale_reports_are_ignored() {
    let h = Harness::new();
    h.start_playing("x").await;
    let z = h.load("z").await;
    h.wait_current_loaded().await;

    h.backend.report("x", BackendEvent::Playing);
    h.backend.report("x", BackendEvent::Completed);
    h.settle().await;

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.state, EngineState::NotPlaying);
    assert_eq!(snapshot.current.unwrap().session_id, z);
}

#[tokio::test]
async fn superseded_load_is_cancelled() {
    let h = Harness::new();
    h.resolver.hold("x");

    let x = h.load("x").await;
    h.load("z").await;
    h.wait_current_loaded().await;
    assert_eq!(h.metrics.end_reason_for(x), Some(EndReason::Replaced));

    h.resolver.release("x");
    h.settle().await;
    assert_eq!(h.backend.loads_of("x"), 0);
    assert_eq!(
        h.snapshot().await.current.unwrap().request,
        MediaRequest::track("z")
    );
}

#[tokio::test]
async fn transient_failure_on_current_reloads_on_play() {
    let mut h = Harness::new();
    h.resolver.fail_once("x", FailMode::Network);

    h.load("x").await;
    let event = h.next_event(is_error).await;
    assert!(matches!(
        event,
        CoreEvent::Playback(PlaybackEvent::Error { recoverable: true, .. })
    ));
    assert_eq!(h.player.state(), EngineState::NotPlaying);
    assert!(h.snapshot().await.current.is_some());

    h.player.play(Utc::now()).await.unwrap();
    eventually!(h
        .backend
        .handle_of("x")
        .is_some_and(|handle| h.backend.count(&BackendCall::Play(handle)) == 1));
    assert_eq!(h.resolver.calls_for("x"), 2);
}

#[tokio::test]
async fn preload_failure_is_held_until_play() {
    let mut h = Harness::new();
    h.resolver.fail_once("x", FailMode::Fatal);

    h.player
        .load(MediaRequest::track("x"), Utc::now(), true)
        .await
        .unwrap();
    eventually!(h.snapshot().await.current.is_some_and(|c| c.pending_error));
    assert!(!h.drain_events().iter().any(is_error));

    h.player.play(Utc::now()).await.unwrap();
    let event = h.next_event(is_error).await;
    assert!(matches!(
        event,
        CoreEvent::Playback(PlaybackEvent::Error { recoverable: false, .. })
    ));
    assert!(h.snapshot().await.current.is_none());
}

#[tokio::test]
async fn backend_load_failure_is_routed() {
    let mut h = Harness::new();
    h.backend.fail_load("x", FailMode::Fatal);

    h.load("x").await;
    let event = h.next_event(is_error).await;
    assert!(matches!(
        event,
        CoreEvent::Playback(PlaybackEvent::Error { ref message, .. }) if message.contains("fake")
    ));
}

#[tokio::test]
async fn metadata_is_forwarded() {
    let mut h = Harness::new();
    let id = h.start_playing("x").await;

    let tags = [("title".to_string(), "Live Set".to_string())].into_iter().collect();
    h.backend
        .report("x", BackendEvent::MetadataLoaded { tags });
    let event = h
        .next_event(|e| matches!(e, CoreEvent::Playback(PlaybackEvent::MetadataLoaded { .. })))
        .await;
    match event {
        CoreEvent::Playback(PlaybackEvent::MetadataLoaded { session_id, tags }) => {
            assert_eq!(session_id, id.to_string());
            assert_eq!(tags.get("title").map(String::as_str), Some("Live Set"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn reset_keeps_orchestrator_usable() {
    let h = Harness::new();
    let x = h.start_playing("x").await;
    let handle = h.backend.handle_of("x").unwrap();

    h.player.reset().await.unwrap();
    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.state, EngineState::Idle);
    assert!(snapshot.current.is_none());
    assert_eq!(h.backend.count(&BackendCall::Unload(handle)), 1);
    assert_eq!(h.metrics.end_reason_for(x), Some(EndReason::Stopped));

    h.load("y").await;
    assert_eq!(h.player.state(), EngineState::NotPlaying);
}

#[tokio::test]
async fn unload_closes_orchestrator() {
    let h = Harness::new();
    h.start_playing("x").await;

    h.player.unload().await.unwrap();
    assert_eq!(h.player.state(), EngineState::Idle);
    assert!(matches!(
        h.player.play(Utc::now()).await,
        Err(PlaybackError::OrchestratorClosed)
    ));
    assert!(matches!(
        h.player.snapshot().await,
        Err(PlaybackError::OrchestratorClosed)
    ));
}

#[tokio::test]
async fn state_watch_follows_transitions() {
    let h = Harness::new();
    let mut watch = h.player.watch_state();

    h.load("x").await;
    watch.changed().await.unwrap();
    assert_eq!(*watch.borrow_and_update(), EngineState::NotPlaying);
}

#[tokio::test]
async fn play_after_pause_wins_over_late_paused_report() {
    let h = Harness::new();
    h.start_playing("x").await;
    let handle = h.backend.handle_of("x").unwrap();

    h.player.pause().await.unwrap();
    h.player.play(Utc::now()).await.unwrap();
    assert_eq!(h.backend.count(&BackendCall::Pause(handle)), 1);
    assert_eq!(h.backend.count(&BackendCall::Play(handle)), 2);

    h.backend.report("x", BackendEvent::Paused);
    h.backend.report("x", BackendEvent::Playing);
    h.settle().await;
    assert_eq!(h.player.state(), EngineState::Playing);
}

#[tokio::test]
async fn privileges_lost_during_load_reloads_on_play() {
    let mut h = Harness::new();
    h.resolver.fail_once("x", FailMode::PrivilegesLost);

    let x = h.load("x").await;
    let event = h.next_event(is_privileges_lost).await;
    assert_eq!(
        event,
        CoreEvent::Session(SessionEvent::PrivilegesLost {
            session_id: Some(x.to_string()),
            taken_by: None,
        })
    );
    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.state, EngineState::NotPlaying);
    let current = snapshot.current.unwrap();
    assert!(!current.loaded);
    assert!(!current.loading);

    h.player.play(Utc::now()).await.unwrap();
    eventually!(h.backend.handle_of("x").is_some());
    let handle = h.backend.handle_of("x").unwrap();
    eventually!(h.backend.count(&BackendCall::Play(handle)) == 1);
    assert_eq!(h.resolver.calls_for("x"), 2);
}

#[tokio::test]
async fn privileges_lost_on_next_reloads_after_promotion() {
    let mut h = Harness::new();
    h.start_playing("x").await;
    h.backend.report("x", BackendEvent::Downloaded);
    h.resolver.fail_once("y", FailMode::PrivilegesLost);

    let y = h.set_next("y").await;
    eventually!(h.snapshot().await.next.is_some_and(|n| n.pending_error));

    h.player.skip_to_next().await.unwrap();
    h.next_event(is_privileges_lost).await;
    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.state, EngineState::NotPlaying);
    assert_eq!(snapshot.current.unwrap().session_id, y);
    assert!(h.backend.handle_of("y").is_none());

    h.player.play(Utc::now()).await.unwrap();
    eventually!(h.backend.handle_of("y").is_some());
    let handle = h.backend.handle_of("y").unwrap();
    eventually!(h.backend.count(&BackendCall::Play(handle)) == 1);
    assert_eq!(h.resolver.calls_for("y"), 2);
}

#[tokio::test]
async fn deferred_skip_keeps_its_target_when_next_is_cleared() {
    let h = Harness::new();
    h.resolver.hold("x");

    let x = h.load("x").await;
    h.player.play(Utc::now()).await.unwrap();
    let y = h.set_next("y").await;
    h.player.skip_to_next().await.unwrap();
    assert_eq!(h.player.set_next(None).await.unwrap(), None);
    assert_eq!(h.snapshot().await.next.unwrap().session_id, y);

    h.resolver.release("x");
    eventually!(h.snapshot().await.current.is_some_and(|c| c.session_id == y));
    let snapshot = h.snapshot().await;
    assert!(snapshot.next.is_none());
    assert!(!snapshot.pending_skip);
    assert_eq!(h.metrics.end_reason_for(x), Some(EndReason::Skipped));

    eventually!(h.backend.handle_of("y").is_some());
    let handle = h.backend.handle_of("y").unwrap();
    eventually!(h.backend.count(&BackendCall::Play(handle)) == 1);
}

#[tokio::test]
async fn next_set_during_deferred_skip_follows_promoted_item() {
    let h = Harness::with(|b| b.preload(PreloadPolicy::Eager));
    h.resolver.hold("x");

    h.load("x").await;
    let y = h.set_next("y").await;
    h.player.skip_to_next().await.unwrap();
    let z = h.set_next("z").await;
    assert_eq!(h.snapshot().await.next.unwrap().session_id, y);
    assert_eq!(h.resolver.calls_for("z"), 0);

    h.resolver.release("x");
    eventually!(h.snapshot().await.current.is_some_and(|c| c.session_id == y));
    assert_eq!(h.snapshot().await.next.unwrap().session_id, z);
    h.wait_next_loaded().await;
}

#[tokio::test]
async fn reset_discards_next_held_by_deferred_skip() {
    let h = Harness::new();
    h.resolver.hold("x");

    h.load("x").await;
    h.set_next("y").await;
    h.player.skip_to_next().await.unwrap();
    let z = h.set_next("z").await;

    h.player.reset().await.unwrap();
    assert_eq!(h.metrics.end_reason_for(z), Some(EndReason::Discarded));
    assert_eq!(h.resolver.calls_for("z"), 0);
    assert_eq!(h.player.state(), EngineState::Idle);
}
