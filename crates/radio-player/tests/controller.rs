mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::fakes::{FakeFactory, FakeHttp};
use common::{Harness, FIXTURE_XML, POLL_INTERVAL};
use radio_player::backend::{BackendError, BackendEvent};
use radio_player::core::PlayerEvent;
use radio_player::BroadcastMessage;
use radio_proto::protocol::{Command, PlaybackState, Platform, Volume};

#[tokio::test(start_paused = true)]
async fn play_fetches_now_playing_and_pause_stops_polling() {
    let mut h = Harness::new(Platform::Web);
    assert!(!h.core.has_backend());

    h.core.play().await.unwrap();
    h.settle().await;

    let s = h.snapshot().await;
    assert_eq!(s.playback_state, PlaybackState::Playing);
    assert_eq!(h.http.calls(), 1);
    assert_eq!(s.current_song.artist, "DJ X");
    assert_eq!(s.current_song.title, "Night Drive");
    assert_eq!(s.current_song.album, "");
    assert_eq!(s.stats.listeners, "7");
    assert!(s.song_updated_at.is_some());
    h.assert_poll_invariant().await;

    h.core.pause().await.unwrap();
    assert_eq!(h.snapshot().await.playback_state, PlaybackState::Paused);
    h.assert_poll_invariant().await;

    h.advance(POLL_INTERVAL + Duration::from_secs(1)).await;
    assert_eq!(h.http.calls(), 1);
    // Paused keeps the backend around.
    assert!(h.core.has_backend());
    assert_eq!(h.factory.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn polls_again_every_interval_while_playing() {
    let mut h = Harness::new(Platform::Native);
    h.core.play().await.unwrap();
    h.settle().await;
    assert_eq!(h.http.calls(), 1);

    h.advance(POLL_INTERVAL).await;
    assert_eq!(h.http.calls(), 2);
    h.advance(POLL_INTERVAL).await;
    assert_eq!(h.http.calls(), 3);
    h.assert_poll_invariant().await;
}

#[tokio::test(start_paused = true)]
async fn dispose_while_playing_survives_failing_release() {
    let mut h = Harness::new(Platform::Web);
    h.core.play().await.unwrap();
    // Let the immediate fetch land before counting.
    h.settle().await;
    assert_eq!(h.http.calls(), 1);
    h.factory.faults.release.store(true, Ordering::SeqCst);

    h.core.dispose().await;

    assert_eq!(h.snapshot().await.playback_state, PlaybackState::Idle);
    assert!(!h.core.is_polling());
    assert!(!h.core.has_backend());
    let calls = h.factory.calls();
    assert!(calls.ends_with(&["stop", "unload"]), "{:?}", calls);

    let before = h.http.calls();
    h.advance(POLL_INTERVAL * 2).await;
    assert_eq!(h.http.calls(), before);
}

#[tokio::test(start_paused = true)]
async fn dispose_without_backend_is_harmless() {
    let mut h = Harness::new(Platform::Web);
    h.core.dispose().await;
    h.core.dispose().await;
    assert_eq!(h.snapshot().await.playback_state, PlaybackState::Idle);
    assert!(h.factory.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn volume_is_clamped_stored_and_applied() {
    let mut h = Harness::new(Platform::Web);

    assert_eq!(h.core.set_volume(150).await, Volume::MAX);
    assert_eq!(h.snapshot().await.volume.percent(), 100);
    // No backend yet: nothing to apply to.
    assert!(h.factory.calls().is_empty());

    h.core.play().await.unwrap();
    assert_eq!(
        h.factory.created_with.lock().unwrap().as_slice(),
        &[(Platform::Web, Volume::MAX)]
    );

    assert_eq!(h.core.set_volume(-5).await.percent(), 0);
    assert_eq!(h.factory.last_gain(), Some(0.0));
    assert_eq!(h.snapshot().await.volume.percent(), 0);

    // Volume is independent of playback state.
    h.core.pause().await.unwrap();
    assert_eq!(h.core.set_volume(55).await.percent(), 55);
    assert_eq!(h.snapshot().await.playback_state, PlaybackState::Paused);
}

#[tokio::test(start_paused = true)]
async fn play_failure_is_errored_then_recoverable() {
    let mut h = Harness::new(Platform::Web);
    h.factory.faults.play.store(true, Ordering::SeqCst);

    let err = h.core.play().await.unwrap_err();
    assert!(matches!(err, BackendError::Play(_)));
    h.settle().await;

    let s = h.snapshot().await;
    assert_eq!(s.playback_state, PlaybackState::Errored);
    assert!(s.last_error.is_some());
    assert!(!h.core.is_polling());
    assert_eq!(h.http.calls(), 0);

    h.factory.faults.play.store(false, Ordering::SeqCst);
    h.core.play().await.unwrap();
    let s = h.snapshot().await;
    assert_eq!(s.playback_state, PlaybackState::Playing);
    assert!(s.last_error.is_none());
    assert_eq!(h.factory.created(), 1);
    h.assert_poll_invariant().await;
}

#[tokio::test(start_paused = true)]
async fn backend_creation_failure_is_errored() {
    let mut h = Harness::new(Platform::Native);
    h.factory.faults.create.store(true, Ordering::SeqCst);

    assert!(matches!(h.core.play().await, Err(BackendError::Load(_))));
    assert_eq!(h.snapshot().await.playback_state, PlaybackState::Errored);
    assert!(!h.core.has_backend());
    h.assert_poll_invariant().await;
}

#[tokio::test(start_paused = true)]
async fn failed_pause_is_errored() {
    let mut h = Harness::new(Platform::Web);
    h.core.play().await.unwrap();
    h.factory.faults.pause.store(true, Ordering::SeqCst);

    assert!(h.core.pause().await.is_err());
    assert_eq!(h.snapshot().await.playback_state, PlaybackState::Errored);
    h.assert_poll_invariant().await;
}

#[tokio::test(start_paused = true)]
async fn pause_when_not_playing_is_a_noop() {
    let mut h = Harness::new(Platform::Web);
    h.core.pause().await.unwrap();
    assert_eq!(h.snapshot().await.playback_state, PlaybackState::Idle);
    assert!(!h.core.has_backend());
}

#[tokio::test(start_paused = true)]
async fn toggle_play_alternates() {
    let mut h = Harness::new(Platform::Web);
    h.core.toggle_play().await.unwrap();
    assert!(h.snapshot().await.is_playing());
    h.core.toggle_play().await.unwrap();
    assert_eq!(h.snapshot().await.playback_state, PlaybackState::Paused);
    h.core.toggle_play().await.unwrap();
    assert!(h.snapshot().await.is_playing());
    assert_eq!(h.factory.calls(), vec!["play", "pause", "play"]);
    h.assert_poll_invariant().await;
}

#[tokio::test(start_paused = true)]
async fn stream_end_is_recorded_and_stops_polling() {
    let mut h = Harness::new(Platform::Web);
    h.core.play().await.unwrap();
    h.settle().await;

    h.factory.emit(BackendEvent::Ended).await;
    h.settle().await;
    assert_eq!(h.snapshot().await.playback_state, PlaybackState::Ended);
    h.assert_poll_invariant().await;

    let calls = h.http.calls();
    h.advance(POLL_INTERVAL * 2).await;
    assert_eq!(h.http.calls(), calls);

    // A fresh play reuses the same backend.
    h.core.toggle_play().await.unwrap();
    assert!(h.snapshot().await.is_playing());
    assert_eq!(h.factory.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn backend_errors_move_to_errored() {
    let mut h = Harness::new(Platform::Native);
    h.core.play().await.unwrap();
    h.settle().await;

    h.factory
        .emit(BackendEvent::LoadError("connection reset".to_string()))
        .await;
    h.settle().await;

    let s = h.snapshot().await;
    assert_eq!(s.playback_state, PlaybackState::Errored);
    assert_eq!(s.last_error.as_deref(), Some("connection reset"));
    h.assert_poll_invariant().await;

    // The engine recovering on its own brings us back.
    h.factory.emit(BackendEvent::Playing).await;
    h.settle().await;
    assert!(h.snapshot().await.is_playing());
    h.assert_poll_invariant().await;
}

#[tokio::test(start_paused = true)]
async fn external_pause_is_followed() {
    let mut h = Harness::new(Platform::Native);
    h.core.play().await.unwrap();
    h.settle().await;

    h.factory.emit(BackendEvent::Paused).await;
    h.settle().await;
    assert_eq!(h.snapshot().await.playback_state, PlaybackState::Paused);
    h.assert_poll_invariant().await;

    // A late Playing echo must not undo a user pause.
    h.factory.emit(BackendEvent::Playing).await;
    h.settle().await;
    assert_eq!(h.snapshot().await.playback_state, PlaybackState::Paused);
}

#[tokio::test(start_paused = true)]
async fn stale_backend_events_are_ignored() {
    let mut h = Harness::new(Platform::Web);
    h.core.play().await.unwrap();

    let keep_going = h
        .core
        .handle_event(PlayerEvent::Backend {
            generation: 42,
            event: BackendEvent::Ended,
        })
        .await;
    assert!(keep_going);
    assert!(h.snapshot().await.is_playing());

    // Events after dispose belong to a released backend.
    h.core.dispose().await;
    h.core
        .handle_event(PlayerEvent::Backend {
            generation: 1,
            event: BackendEvent::Playing,
        })
        .await;
    assert_eq!(h.snapshot().await.playback_state, PlaybackState::Idle);
    h.assert_poll_invariant().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_metadata_keeps_now_playing() {
    let mut h = Harness::new(Platform::Web);
    h.core.play().await.unwrap();
    h.settle().await;
    assert_eq!(h.snapshot().await.current_song.title, "Night Drive");

    h.http.set_body(Some("<SHOUTCASTSERVER><SONGTITLE>Half"));
    h.advance(POLL_INTERVAL).await;
    assert_eq!(h.http.calls(), 2);
    assert_eq!(h.snapshot().await.current_song.title, "Night Drive");

    // Fetch failures are skipped too.
    h.http.set_body(None);
    h.advance(POLL_INTERVAL).await;
    assert_eq!(h.http.calls(), 3);
    assert_eq!(h.snapshot().await.current_song.artist, "DJ X");
    assert!(h.snapshot().await.is_playing());
}

#[tokio::test(start_paused = true)]
async fn now_playing_stays_loading_until_first_fetch() {
    let mut h = Harness::with_fakes(
        Platform::Web,
        FakeFactory::new(),
        FakeHttp::new("<SHOUTCASTSERVER><SONGTITLE>  </SONGTITLE></SHOUTCASTSERVER>"),
    );
    h.core.play().await.unwrap();
    h.settle().await;
    let s = h.snapshot().await;
    assert_eq!(s.current_song.title, "Loading");
    assert!(s.song_updated_at.is_none());

    h.http.set_body(Some(FIXTURE_XML));
    h.advance(POLL_INTERVAL).await;
    assert_eq!(h.snapshot().await.current_song.title, "Night Drive");
}

#[tokio::test(start_paused = true)]
async fn commands_drive_the_core() {
    let mut h = Harness::new(Platform::Web);

    assert!(h.core.handle_event(PlayerEvent::Command(Command::TogglePlay)).await);
    assert!(h.snapshot().await.is_playing());
    assert!(
        h.core
            .handle_event(PlayerEvent::Command(Command::SetVolume { value: 300 }))
            .await
    );
    assert_eq!(h.snapshot().await.volume, Volume::MAX);

    // Play failures inside a command are absorbed.
    h.factory.faults.play.store(true, Ordering::SeqCst);
    h.core.handle_event(PlayerEvent::Command(Command::Pause)).await;
    h.core.handle_event(PlayerEvent::Command(Command::Play)).await;
    assert_eq!(h.snapshot().await.playback_state, PlaybackState::Errored);

    h.core.handle_event(PlayerEvent::Command(Command::Dispose)).await;
    assert_eq!(h.snapshot().await.playback_state, PlaybackState::Idle);

    assert!(!h.core.handle_event(PlayerEvent::Shutdown).await);

    let mut updates = 0;
    while let Ok(msg) = h.updates.try_recv() {
        assert!(matches!(msg, BroadcastMessage::StateUpdated));
        updates += 1;
    }
    assert!(updates >= 5);
}

#[tokio::test(start_paused = true)]
async fn run_releases_backend_on_shutdown() {
    let h = Harness::new(Platform::Web);
    let Harness {
        core,
        factory,
        state,
        ..
    } = h;
    let (tx, rx) = tokio::sync::mpsc::channel(8);

    let loop_handle = tokio::spawn(core.run(rx));
    tx.send(PlayerEvent::Command(Command::Play)).await.unwrap();
    tx.send(PlayerEvent::Shutdown).await.unwrap();
    loop_handle.await.unwrap().unwrap();

    assert_eq!(factory.calls(), vec!["play", "stop", "unload"]);
    assert_eq!(state.get_state().await.playback_state, PlaybackState::Idle);
}
