//! Session and engine lifecycle tests
//!
//! The engine is replaced by small `sh` scripts, so these run on Unix only.

#![cfg(unix)]

mod helpers;

use std::time::Duration;

use helpers::*;
use kara_common::RelayEvent;
use kara_relay::param_channel::ParamChannel;
use kara_relay::supervisor::SessionState;
use serde_json::json;

#[tokio::test]
async fn test_load_song_reports_loaded_then_playing() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.load_song(SONG_ID);

    match conn.expect("song_loaded").await {
        RelayEvent::SongLoaded {
            song,
            input_device,
            output_device,
        } => {
            assert_eq!(song.id, SONG_ID);
            assert_eq!(song.title, "Queen - Bohemian Rhapsody");
            assert_eq!(input_device, "default");
            assert_eq!(output_device, "default");
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Auto-start, then the engine's own "Starting karaoke" line
    match conn.expect("state").await {
        RelayEvent::State { playing, song, .. } => {
            assert!(playing);
            assert_eq!(song.unwrap().id, SONG_ID);
        }
        other => panic!("unexpected event {:?}", other),
    }
    match conn.expect("backend_status").await {
        RelayEvent::BackendStatus { status, .. } => assert_eq!(status, "recording"),
        other => panic!("unexpected event {:?}", other),
    }

    let snapshot = relay.snapshot().await;
    assert_eq!(snapshot.state, SessionState::Running);
    assert_eq!(snapshot.launches, 1);
    assert_eq!(relay.launched_pids().len(), 1);
}

#[tokio::test]
async fn test_unknown_song_yields_single_error() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.load_song("No Such Song");

    let events = conn.drain(Duration::from_millis(400)).await;
    assert_eq!(events.len(), 1, "events: {:?}", events);
    assert_eq!(
        events[0],
        RelayEvent::error("Song not found: No Such Song")
    );

    let snapshot = relay.snapshot().await;
    assert_eq!(snapshot.state, SessionState::Idle);
    assert_eq!(snapshot.launches, 0);
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.load_song(SONG_ID);
    conn.expect_playing().await;

    conn.action("start_session", json!({}));
    match conn.expect("error").await {
        RelayEvent::Error { message } => {
            assert_eq!(message, "Session already in progress. Stop current session first.")
        }
        other => panic!("unexpected event {:?}", other),
    }

    let snapshot = relay.snapshot().await;
    assert_eq!(snapshot.launches, 1);
    assert_eq!(relay.launched_pids().len(), 1);
}

#[tokio::test]
async fn test_start_without_song_is_rejected() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.action("start_session", json!({}));
    assert_eq!(
        conn.expect("error").await,
        RelayEvent::error("No song loaded. Please select a song first.")
    );
}

#[tokio::test]
async fn test_hot_update_keeps_process() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.load_song(SONG_ID);
    conn.expect_playing().await;
    let before = relay.snapshot().await;

    conn.action("set_voice_effect", json!({"effect": "pitch_shift", "value": 3}));
    match conn.expect("voice_effect_updated").await {
        RelayEvent::VoiceEffectUpdated { effect, value } => {
            assert_eq!(effect, "pitch_shift");
            assert_eq!(value, json!(3.0));
        }
        other => panic!("unexpected event {:?}", other),
    }

    let after = relay.snapshot().await;
    assert_eq!(after.generation, before.generation);
    assert_eq!(after.pid, before.pid);
    assert_eq!(after.launches, 1);

    let params = ParamChannel::new(relay.param_file()).read_params().await.unwrap();
    assert_eq!(params.get("pitch_shift").map(String::as_str), Some("3"));
}

#[tokio::test]
async fn test_cold_update_relaunches_engine() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.load_song(SONG_ID);
    conn.expect_playing().await;
    let before = relay.snapshot().await;

    conn.action("set_voice_effect", json!({"effect": "enable_reverb", "value": true}));
    conn.expect("voice_effect_updated").await;
    conn.expect_playing().await;

    let after = relay.snapshot().await;
    assert_ne!(after.generation, before.generation);
    assert_eq!(after.launches, 2);
    assert_eq!(after.retiring, 0);

    // The previous engine is gone before the new one started
    let pids = relay.launched_pids();
    assert_eq!(pids.len(), 2);
    assert!(!process_alive(pids[0]));
}

#[tokio::test]
async fn test_robot_preset_restarts_engine() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.load_song(SONG_ID);
    conn.expect_playing().await;
    let before = relay.snapshot().await;

    conn.action("set_voice_preset", json!({"preset": "Robot"}));
    match conn.expect("voice_preset_applied").await {
        RelayEvent::VoicePresetApplied { preset, settings } => {
            assert_eq!(preset, "Robot");
            assert_eq!(settings.enable_chorus, Some(true));
        }
        other => panic!("unexpected event {:?}", other),
    }
    conn.expect_playing().await;

    let after = relay.snapshot().await;
    assert_ne!(after.generation, before.generation);
    assert!(after.effects.unwrap().enable_chorus);
}

#[tokio::test]
async fn test_hot_presets_keep_process() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.load_song(SONG_ID);
    conn.expect_playing().await;
    let before = relay.snapshot().await;

    for preset in ["Natural", "Autotune", "Chipmunk", "Deep Voice"] {
        conn.action("set_voice_preset", json!({ "preset": preset }));
        match conn.expect("voice_preset_applied").await {
            RelayEvent::VoicePresetApplied { preset: applied, .. } => assert_eq!(applied, preset),
            other => panic!("unexpected event {:?}", other),
        }
    }

    let after = relay.snapshot().await;
    assert_eq!(after.generation, before.generation);
    assert_eq!(after.pid, before.pid);
    assert_eq!(after.launches, 1);
    assert_eq!(after.effects.unwrap().pitch_shift, -7.0);

    let params = ParamChannel::new(relay.param_file()).read_params().await.unwrap();
    assert_eq!(params.get("pitch_shift").map(String::as_str), Some("-7"));
}

#[tokio::test]
async fn test_bulk_hot_update_writes_only_touched_keys() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.load_song(SONG_ID);
    conn.expect_playing().await;
    let before = relay.snapshot().await;

    // Values the relay must leave alone
    std::fs::write(relay.param_file(), "pitch_shift=9\nmixer_gain=4\n").unwrap();

    conn.action("set_voice_effects", json!({"autotune": 0.5, "voice_volume": 1.4}));
    match conn.expect("voice_effects_updated").await {
        RelayEvent::VoiceEffectsUpdated { effects } => {
            assert_eq!(effects.autotune, 0.5);
            assert_eq!(effects.voice_volume, 1.4);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let params = ParamChannel::new(relay.param_file()).read_params().await.unwrap();
    assert_eq!(params.get("autotune_strength").map(String::as_str), Some("0.5"));
    assert_eq!(params.get("voice_volume").map(String::as_str), Some("1.4"));
    assert_eq!(params.get("pitch_shift").map(String::as_str), Some("9"));
    assert_eq!(params.get("mixer_gain").map(String::as_str), Some("4"));
    assert_eq!(params.len(), 4);

    let after = relay.snapshot().await;
    assert_eq!(after.generation, before.generation);
    assert_eq!(after.launches, 1);
}

#[tokio::test]
async fn test_reload_while_running_replaces_song_and_keeps_effects() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut conn = relay.connect().await;

    std::fs::create_dir_all(relay.root().join("songs").join("Another_Song")).unwrap();
    conn.action("refresh_songs", json!({}));
    conn.expect("songs_list").await;

    conn.load_song(SONG_ID);
    conn.expect_playing().await;
    conn.action("set_voice_effect", json!({"effect": "pitch_shift", "value": 4}));
    conn.expect("voice_effect_updated").await;
    let before = relay.snapshot().await;

    conn.action(
        "load_song",
        json!({"songId": "Another_Song", "inputDevice": "usb_mic", "outputDevice": "hdmi"}),
    );
    match conn.expect("song_loaded").await {
        RelayEvent::SongLoaded {
            song,
            input_device,
            output_device,
        } => {
            assert_eq!(song.id, "Another_Song");
            assert_eq!(input_device, "usb_mic");
            assert_eq!(output_device, "hdmi");
        }
        other => panic!("unexpected event {:?}", other),
    }

    // The running engine is left alone, so auto-start has nothing to do
    assert_eq!(
        conn.expect("error").await,
        RelayEvent::error("Session already in progress. Stop current session first.")
    );

    let after = relay.snapshot().await;
    assert_eq!(after.state, SessionState::Running);
    assert_eq!(after.song.unwrap().id, "Another_Song");
    assert_eq!(after.generation, before.generation);
    assert_eq!(after.effects, before.effects);
    assert_eq!(after.effects.unwrap().pitch_shift, 4.0);
}

#[tokio::test]
async fn test_invalid_utf8_output_keeps_engine_running() {
    let relay = TestRelay::start(RAW_BYTES_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.load_song(SONG_ID);
    conn.expect_playing().await;

    let snapshot = relay.snapshot().await;
    assert_eq!(snapshot.state, SessionState::Running);
    let pids = relay.launched_pids();
    assert_eq!(pids.len(), 1);
    assert!(process_alive(pids[0]));
}

#[tokio::test]
async fn test_effect_without_session_is_rejected() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.action("set_voice_effect", json!({"effect": "pitch_shift", "value": 1}));
    assert_eq!(
        conn.expect("error").await,
        RelayEvent::error("No active session. Load a song first.")
    );
}

#[tokio::test]
async fn test_invalid_effect_leaves_effects_unchanged() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.load_song(SONG_ID);
    conn.expect_playing().await;
    let before = relay.snapshot().await;

    conn.action("set_voice_effect", json!({"effect": "warp_drive", "value": 1}));
    conn.expect("error").await;
    conn.action("set_voice_effects", json!({"pitch_shift": 2, "voice_volume": "loud"}));
    conn.expect("error").await;

    let after = relay.snapshot().await;
    assert_eq!(after.effects, before.effects);
    assert_eq!(after.generation, before.generation);
}

#[tokio::test]
async fn test_param_file_keeps_earlier_keys() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.load_song(SONG_ID);
    conn.expect_playing().await;

    let channel = ParamChannel::new(relay.param_file());
    let mut seen: Vec<String> = Vec::new();
    for (effect, value) in [("pitch_shift", 2.0), ("voice_volume", 1.5), ("autotune", 0.4)] {
        conn.action("set_voice_effect", json!({"effect": effect, "value": value}));
        conn.expect("voice_effect_updated").await;

        let params = channel.read_params().await.unwrap();
        for key in &seen {
            assert!(params.contains_key(key), "{} disappeared", key);
        }
        seen = params.keys().cloned().collect();
    }

    let params = channel.read_params().await.unwrap();
    assert_eq!(params.get("autotune_strength").map(String::as_str), Some("0.4"));
    assert_eq!(params.get("voice_volume").map(String::as_str), Some("1.5"));
}

#[tokio::test]
async fn test_stop_session_kills_engine_ignoring_sigterm() {
    let relay = TestRelay::start(STUBBORN_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.load_song(SONG_ID);
    conn.expect_playing().await;
    let pid: u32 = std::fs::read_to_string(relay.root().join("stubborn.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(process_alive(pid));

    conn.action("stop_session", json!({}));
    assert_eq!(conn.expect("state").await, RelayEvent::stopped());

    // Idle immediately, even though the process is still winding down
    let snapshot = relay.snapshot().await;
    assert_eq!(snapshot.state, SessionState::Idle);

    let grace = relay.config.timing.grace_period;
    tokio::time::sleep(grace + Duration::from_millis(500)).await;
    assert!(!process_alive(pid));
    wait_for(&relay, |s| s.retiring == 0).await;
}

#[tokio::test]
async fn test_engine_exit_reports_stopped() {
    let relay = TestRelay::start(SHORT_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.load_song(SONG_ID);
    conn.expect_playing().await;

    assert_eq!(conn.expect("state").await, RelayEvent::stopped());
    let snapshot = wait_for(&relay, |s| s.state == SessionState::Loaded).await;
    assert_eq!(snapshot.generation, None);
}

#[tokio::test]
async fn test_fatal_engine_output_is_reported() {
    let relay = TestRelay::start(FAILING_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.load_song(SONG_ID);
    assert_eq!(
        conn.expect("error").await,
        RelayEvent::error("Karaoke failed to start: input device not found")
    );

    let snapshot = wait_for(&relay, |s| s.retiring == 0).await;
    assert_eq!(snapshot.state, SessionState::Loaded);
}

#[tokio::test]
async fn test_missing_song_directory_is_reported() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut conn = relay.connect().await;
    std::fs::remove_dir_all(relay.root().join("songs").join(SONG_DIR)).unwrap();

    conn.load_song(SONG_ID);
    conn.expect("song_loaded").await;
    assert_eq!(
        conn.expect("error").await,
        RelayEvent::error(format!("Song directory not found: {}", SONG_DIR))
    );
    assert_eq!(relay.snapshot().await.state, SessionState::Loaded);
}

#[tokio::test]
async fn test_spawn_failure_clears_session() {
    let relay = TestRelay::start_configured(PLAYING_ENGINE, |config| {
        config.engine.program = "/nonexistent/kara-engine".to_string();
    })
    .await;
    let mut conn = relay.connect().await;

    conn.load_song(SONG_ID);
    conn.expect("song_loaded").await;
    match conn.expect("error").await {
        RelayEvent::Error { message } => {
            assert!(message.starts_with("Failed to start karaoke"), "{}", message)
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(relay.snapshot().await.state, SessionState::Idle);
}

#[tokio::test]
async fn test_pause_and_resume_are_echoed() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.load_song(SONG_ID);
    conn.expect_playing().await;
    let before = relay.snapshot().await;

    conn.action("pause", json!({}));
    match conn.expect("state").await {
        RelayEvent::State { playing, song, .. } => {
            assert!(!playing);
            assert!(song.is_none());
        }
        other => panic!("unexpected event {:?}", other),
    }
    conn.action("resume", json!({}));
    match conn.expect("state").await {
        RelayEvent::State { playing, .. } => assert!(playing),
        other => panic!("unexpected event {:?}", other),
    }

    // The engine itself is untouched
    assert_eq!(relay.snapshot().await.generation, before.generation);
}

#[tokio::test]
async fn test_ticks_while_playing() {
    let mut timing = fast_timing();
    timing.tick_interval = Some(Duration::from_millis(50));
    let relay = TestRelay::start_with(PLAYING_ENGINE, timing).await;
    let mut conn = relay.connect().await;

    conn.load_song(SONG_ID);
    conn.expect_playing().await;

    match conn.expect("tick").await {
        RelayEvent::Tick { position_sec } => assert!(position_sec >= 0.0),
        other => panic!("unexpected event {:?}", other),
    }

    conn.action("pause", json!({}));
    conn.expect("state").await;
    let events = conn.drain(Duration::from_millis(200)).await;
    assert!(events.iter().all(|e| e.type_name() != "tick"), "{:?}", events);
}

#[tokio::test]
async fn test_other_connection_cannot_control_session() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut owner = relay.connect().await;
    let mut other = relay.connect().await;

    owner.load_song(SONG_ID);
    owner.expect_playing().await;

    other.action("stop_session", json!({}));
    assert_eq!(
        other.expect("error").await,
        RelayEvent::error("Session is controlled by another connection")
    );
    assert_eq!(relay.snapshot().await.state, SessionState::Running);
}

#[tokio::test]
async fn test_owner_disconnect_halts_engine() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut owner = relay.connect().await;

    owner.load_song(SONG_ID);
    owner.expect_playing().await;
    owner.close();

    let snapshot = wait_for(&relay, |s| s.state == SessionState::Loaded && s.retiring == 0).await;
    assert_eq!(snapshot.generation, None);

    // A new connection may take the orphaned session over
    let mut next = relay.connect().await;
    next.action("start_session", json!({}));
    next.expect_playing().await;
    assert_eq!(relay.snapshot().await.launches, 2);
}

#[tokio::test]
async fn test_refresh_songs_rescans() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut conn = relay.connect().await;

    std::fs::create_dir_all(relay.root().join("songs").join("Another_Song")).unwrap();
    conn.action("refresh_songs", json!({}));

    match conn.expect("songs_list").await {
        RelayEvent::SongsList { songs } => {
            assert_eq!(songs.len(), 2);
            assert!(songs.iter().any(|s| s.title == "Another Song"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_shutdown_stops_engine() {
    let relay = TestRelay::start(PLAYING_ENGINE).await;
    let mut conn = relay.connect().await;

    conn.load_song(SONG_ID);
    conn.expect_playing().await;
    let pid = relay.launched_pids()[0];

    relay.supervisor.shutdown().await.unwrap();
    assert!(!process_alive(pid));
    assert!(relay.supervisor.snapshot().await.is_err());
}
