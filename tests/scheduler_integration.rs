mod common;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use common::{RecordingSink, Script, ScriptedFactory, image, video};
use rust_live_wallpaper::config::{CanvasSize, Configuration, FitMode};
use rust_live_wallpaper::error::Error;
use rust_live_wallpaper::events::EngineCommand;
use rust_live_wallpaper::media::SourceKind;
use rust_live_wallpaper::scheduler::{
    DelayedAction, LatestFrame, PlaybackScheduler, PlaybackState, TickOutcome,
};

const CANVAS: CanvasSize = CanvasSize {
    width: 8,
    height: 4,
};

fn config() -> Configuration {
    Configuration {
        recovery_delay: Duration::from_millis(50),
        ..Configuration::default()
    }
}

fn scheduler(script: &Script) -> PlaybackScheduler<RecordingSink> {
    let factory = ScriptedFactory::new(script)
        .with("/v/loop.mp4", video(8, 4, 25.0, 3))
        .with("/v/long.mp4", video(8, 4, 30.0, 100))
        .with("/v/huge.mp4", video(32, 16, 30.0, 10))
        .with("/i/still.png", image(8, 4));
    PlaybackScheduler::new(Box::new(factory), CANVAS, &config(), RecordingSink::default())
}

fn playing(script: &Script, path: &str) -> PlaybackScheduler<RecordingSink> {
    let mut s = scheduler(script);
    s.load(Path::new(path)).unwrap();
    s.play().unwrap();
    s
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(60)
}

#[test]
fn play_requires_an_open_source() {
    let script = Script::default();
    let mut s = scheduler(&script);
    assert!(matches!(s.play(), Err(Error::SourceClosed)));
    assert_eq!(s.state(), PlaybackState::Stopped);
    assert_eq!(s.tick(), TickOutcome::Idle);
}

#[test]
fn load_leaves_the_scheduler_stopped() {
    let script = Script::default();
    let mut s = scheduler(&script);
    let info = s.load(Path::new("/v/loop.mp4")).unwrap();
    assert_eq!(info.frame_count, 3);
    assert_eq!(s.state(), PlaybackState::Stopped);
    assert_eq!(s.tick_interval(), None);

    s.play().unwrap();
    assert_eq!(s.state(), PlaybackState::Playing);
    assert_eq!(s.tick_interval(), Some(Duration::from_millis(40)));
    assert_eq!(s.sink().states, vec![PlaybackState::Playing]);
}

#[test]
fn failed_load_is_surfaced_and_stays_stopped() {
    let script = Script::default();
    let mut s = playing(&script, "/v/loop.mp4");
    let err = s.load(Path::new("/v/missing.mp4")).unwrap_err();
    assert!(matches!(err, Error::SourceOpen { .. }));
    assert_eq!(s.state(), PlaybackState::Stopped);
    assert!(!s.source().is_open());
    assert!(s.play().is_err());
}

#[test]
fn end_of_stream_rewinds_without_rendering() {
    let script = Script::default();
    let mut s = playing(&script, "/v/loop.mp4");

    for _ in 0..3 {
        assert_eq!(s.tick(), TickOutcome::Presented);
    }
    assert_eq!(s.tick(), TickOutcome::Looped);
    assert_eq!(s.source().position(), 0);
    assert_eq!(s.sink().frames.len(), 3);

    assert_eq!(s.tick(), TickOutcome::Presented);
    assert_eq!(s.source().position(), 1);
    assert_eq!(script.journal().seeks, vec![0]);
}

#[test]
fn stream_without_frames_fails_instead_of_looping() {
    let script = Script::default();
    let factory = ScriptedFactory::new(&script).with("/v/empty.mp4", video(8, 4, 30.0, 0));
    let mut s = PlaybackScheduler::new(Box::new(factory), CANVAS, &config(), RecordingSink::default());
    s.load(Path::new("/v/empty.mp4")).unwrap();
    s.play().unwrap();

    assert_eq!(s.tick(), TickOutcome::Skipped);
    assert_eq!(s.tick(), TickOutcome::Skipped);
    assert_eq!(s.tick(), TickOutcome::StreamFailed);
    assert_eq!(s.state(), PlaybackState::Stopped);
    assert!(s.sink().frames.is_empty());
    assert!(script.journal().seeks.is_empty(), "no rewind without a frame");
    assert_eq!(s.pending_tasks().len(), 1);
    assert_eq!(
        s.pending_tasks()[0].action,
        DelayedAction::Recover(PathBuf::from("/v/empty.mp4"))
    );
}

#[test]
fn presented_frames_are_canvas_sized_and_reordered() {
    let script = Script::default();
    script.journal().color = [10, 20, 30, 255];
    let mut s = playing(&script, "/v/loop.mp4");

    assert_eq!(s.tick(), TickOutcome::Presented);
    let frame = &s.sink().frames[0];
    assert_eq!((frame.width, frame.height), (CANVAS.width, CANVAS.height));
    assert_eq!(frame.pixel(0, 0), Some([30, 20, 10, 255]));
}

#[test]
fn three_consecutive_failures_stop_and_schedule_one_recovery() {
    let script = Script::default();
    let mut s = playing(&script, "/v/long.mp4");
    assert_eq!(s.tick(), TickOutcome::Presented);

    script.fail_decoding(true);
    assert_eq!(s.tick(), TickOutcome::Skipped);
    assert_eq!(s.tick(), TickOutcome::Skipped);
    assert_eq!(s.state(), PlaybackState::Playing);
    assert_eq!(s.tick(), TickOutcome::StreamFailed);

    assert_eq!(s.state(), PlaybackState::Stopped);
    assert!(!s.source().is_open());
    assert_eq!(s.pending_tasks().len(), 1);
    assert_eq!(
        s.pending_tasks()[0].action,
        DelayedAction::Recover(PathBuf::from("/v/long.mp4"))
    );
    assert_eq!(s.tick(), TickOutcome::Idle);

    script.fail_decoding(false);
    assert_eq!(s.run_delayed(Instant::now()), 0, "recovery must wait for its delay");
    assert_eq!(s.run_delayed(far_future()), 1);
    assert_eq!(s.state(), PlaybackState::Playing);
    assert!(s.pending_tasks().is_empty());
    assert_eq!(script.journal().opens.len(), 2);
    assert_eq!(s.tick(), TickOutcome::Presented);
}

#[test]
fn a_good_frame_resets_the_failure_count() {
    let script = Script::default();
    let mut s = playing(&script, "/v/long.mp4");

    script.fail_decoding(true);
    assert_eq!(s.tick(), TickOutcome::Skipped);
    assert_eq!(s.tick(), TickOutcome::Skipped);
    script.fail_decoding(false);
    assert_eq!(s.tick(), TickOutcome::Presented);
    script.fail_decoding(true);
    assert_eq!(s.tick(), TickOutcome::Skipped);
    assert_eq!(s.state(), PlaybackState::Playing);
}

#[test]
fn failed_recovery_stays_stopped_without_retrying() {
    let script = Script::default();
    let mut s = playing(&script, "/v/long.mp4");
    script.fail_decoding(true);
    for _ in 0..3 {
        s.tick();
    }
    script.journal().fail_opening = true;

    assert_eq!(s.run_delayed(far_future()), 1);
    assert_eq!(s.state(), PlaybackState::Stopped);
    assert!(s.pending_tasks().is_empty());
    assert_eq!(s.run_delayed(far_future()), 0);
    assert_eq!(script.journal().opens.len(), 2);
}

#[test]
fn repeated_stream_failures_schedule_a_fresh_recovery() {
    let script = Script::default();
    let mut s = playing(&script, "/v/long.mp4");
    script.fail_decoding(true);
    for _ in 0..3 {
        s.tick();
    }
    assert_eq!(s.run_delayed(far_future()), 1);
    // the reload works but decoding keeps failing
    assert_eq!(s.state(), PlaybackState::Playing);
    for _ in 0..3 {
        s.tick();
    }
    assert_eq!(s.state(), PlaybackState::Stopped);
    assert_eq!(s.pending_tasks().len(), 1);
}

#[test]
fn stale_recovery_is_dropped_after_a_new_load() {
    let script = Script::default();
    let mut s = playing(&script, "/v/long.mp4");
    script.fail_decoding(true);
    for _ in 0..3 {
        s.tick();
    }
    assert_eq!(s.pending_tasks().len(), 1);

    script.fail_decoding(false);
    s.load(Path::new("/v/loop.mp4")).unwrap();
    assert_eq!(s.run_delayed(far_future()), 0);
    assert_eq!(s.state(), PlaybackState::Stopped);
    assert_eq!(s.source().path(), Some(Path::new("/v/loop.mp4")));
    assert!(s.pending_tasks().is_empty());
}

#[test]
fn stale_recovery_is_dropped_after_stop() {
    let script = Script::default();
    let mut s = playing(&script, "/v/long.mp4");
    script.fail_decoding(true);
    for _ in 0..3 {
        s.tick();
    }
    let generation = s.generation();
    s.stop();
    assert!(s.generation() > generation);
    assert_eq!(s.run_delayed(far_future()), 0);
    assert_eq!(s.state(), PlaybackState::Stopped);
}

#[test]
fn doubling_speed_halves_the_tick_interval() {
    let script = Script::default();
    let mut s = scheduler(&script);
    s.load(Path::new("/v/loop.mp4")).unwrap();

    s.set_speed_percent(100).unwrap();
    s.play().unwrap();
    let normal = s.tick_interval().unwrap();

    s.set_speed_percent(200).unwrap();
    let fast = s.tick_interval().unwrap();
    assert_eq!(normal, Duration::from_millis(40));
    assert_eq!(fast, Duration::from_millis(20));
    assert_eq!(s.state(), PlaybackState::Playing);
}

#[test]
fn speed_change_keeps_decode_position() {
    let script = Script::default();
    let mut s = playing(&script, "/v/long.mp4");
    s.tick();
    s.tick();
    s.set_speed(2.0).unwrap();
    assert_eq!(s.source().position(), 2);
}

#[test]
fn fast_playback_grabs_before_reading() {
    let script = Script::default();
    let mut s = playing(&script, "/v/long.mp4");
    s.set_speed(3.0).unwrap();

    assert_eq!(s.tick(), TickOutcome::Presented);
    assert_eq!(s.source().position(), 3);
    let journal = script.journal();
    assert_eq!(journal.grabs, 2);
    assert_eq!(journal.reads, 1);
}

#[test]
fn fractional_speeds_below_one_and_a_half_skip_nothing() {
    let script = Script::default();
    let mut s = playing(&script, "/v/long.mp4");
    s.set_speed(1.4).unwrap();
    s.tick();
    assert_eq!(script.journal().grabs, 0);
    assert_eq!(s.tick_interval(), Some(Duration::from_millis(24)));
}

#[test]
fn invalid_speeds_are_rejected() {
    let script = Script::default();
    let mut s = scheduler(&script);
    assert!(matches!(s.set_speed(0.0), Err(Error::InvalidSpeed(_))));
    assert!(matches!(s.set_speed(-1.0), Err(Error::InvalidSpeed(_))));
    assert!(matches!(s.set_speed(f64::NAN), Err(Error::InvalidSpeed(_))));
    assert!(s.set_speed_percent(0).is_err());
    assert_eq!(s.speed(), 1.0);
}

#[test]
fn pause_and_resume_keep_position() {
    let script = Script::default();
    let mut s = playing(&script, "/v/long.mp4");
    s.tick();
    s.tick();

    s.pause();
    assert_eq!(s.state(), PlaybackState::Paused);
    assert_eq!(s.tick_interval(), None);
    assert_eq!(s.tick(), TickOutcome::Idle);
    assert_eq!(s.source().position(), 2);

    s.resume().unwrap();
    assert_eq!(s.state(), PlaybackState::Playing);
    s.tick();
    assert_eq!(s.source().position(), 3);
    assert_eq!(
        s.sink().states,
        vec![
            PlaybackState::Playing,
            PlaybackState::Paused,
            PlaybackState::Playing
        ]
    );
}

#[test]
fn pause_and_resume_outside_their_states_do_nothing() {
    let script = Script::default();
    let mut s = scheduler(&script);
    s.load(Path::new("/v/loop.mp4")).unwrap();
    s.pause();
    assert_eq!(s.state(), PlaybackState::Stopped);
    s.resume().unwrap();
    assert_eq!(s.state(), PlaybackState::Stopped);
}

#[test]
fn stop_releases_the_source_but_reload_restores_it() {
    let script = Script::default();
    let mut s = playing(&script, "/v/long.mp4");
    s.tick();
    s.stop();
    assert_eq!(s.state(), PlaybackState::Stopped);
    assert!(!s.source().is_open());
    assert_eq!(script.journal().releases, 1);

    s.reload().unwrap();
    assert_eq!(s.state(), PlaybackState::Playing);
    assert_eq!(s.source().position(), 0);
}

#[test]
fn oversized_sources_are_pre_downscaled() {
    let script = Script::default();
    let mut s = playing(&script, "/v/huge.mp4");
    assert!(s.guard().is_active());
    assert_eq!(s.tick(), TickOutcome::Presented);
    let frame = &s.sink().frames[0];
    assert_eq!((frame.width, frame.height), (CANVAS.width, CANVAS.height));
}

#[test]
fn fit_modes_are_tracked_per_source_kind() {
    let script = Script::default();
    let mut s = scheduler(&script);
    assert_eq!(s.fit_mode_for(SourceKind::Video), FitMode::Stretch);
    assert_eq!(s.fit_mode_for(SourceKind::Image), FitMode::Scale);

    s.load(Path::new("/i/still.png")).unwrap();
    s.set_fit_mode(FitMode::Tile);
    assert_eq!(s.fit_mode(), FitMode::Tile);
    assert_eq!(s.fit_mode_for(SourceKind::Video), FitMode::Stretch);

    s.set_fit_mode_for(SourceKind::Video, FitMode::Fit);
    s.load(Path::new("/v/loop.mp4")).unwrap();
    assert_eq!(s.fit_mode(), FitMode::Fit);
}

#[test]
fn commands_drive_the_scheduler() {
    let script = Script::default();
    let mut s = scheduler(&script);

    s.apply(EngineCommand::Load(PathBuf::from("/v/long.mp4")))
        .unwrap();
    assert_eq!(s.state(), PlaybackState::Playing);

    s.apply(EngineCommand::SetSpeedPercent(150)).unwrap();
    assert_eq!(s.speed(), 1.5);

    s.apply(EngineCommand::Seek(0.5)).unwrap();
    assert_eq!(s.source().position(), 50);

    s.apply(EngineCommand::TogglePause).unwrap();
    assert_eq!(s.state(), PlaybackState::Paused);
    s.apply(EngineCommand::TogglePause).unwrap();
    assert_eq!(s.state(), PlaybackState::Playing);

    s.apply(EngineCommand::SetFitModeFor(SourceKind::Image, FitMode::Center))
        .unwrap();
    assert_eq!(s.fit_mode_for(SourceKind::Image), FitMode::Center);

    s.apply(EngineCommand::Stop).unwrap();
    assert_eq!(s.state(), PlaybackState::Stopped);
    assert!(s.apply(EngineCommand::Load(PathBuf::from("/v/nope.mp4"))).is_err());
}

#[test]
fn poll_ticks_only_when_the_timer_is_due() {
    let script = Script::default();
    let mut s = playing(&script, "/v/long.mp4");
    let start = Instant::now();
    assert_eq!(s.poll(start), None);
    let wake = s.next_wakeup().unwrap();
    assert!(wake > start);
    assert_eq!(s.poll(wake + Duration::from_millis(1)), Some(TickOutcome::Presented));
}

#[test]
fn latest_frame_sink_keeps_only_the_newest_buffer() {
    let script = Script::default();
    let factory = ScriptedFactory::new(&script).with("/v/long.mp4", video(8, 4, 30.0, 100));
    let mut s = PlaybackScheduler::new(Box::new(factory), CANVAS, &config(), LatestFrame::default());
    s.load(Path::new("/v/long.mp4")).unwrap();
    s.play().unwrap();
    s.tick();
    s.tick();

    assert_eq!(s.sink().presented(), 2);
    assert_eq!(s.sink().state(), PlaybackState::Playing);
    let newest = s.sink().peek().cloned().unwrap();
    assert_eq!((newest.width, newest.height), (CANVAS.width, CANVAS.height));
    assert_eq!(s.sink_mut().take(), Some(newest));
    assert!(s.sink().peek().is_none());
    assert!(s.sink_mut().take().is_none());
}
