//! Timer-driven playback: pulls frames from the source at a rate derived from
//! the source frame rate and a speed multiplier, runs them through the
//! guard/fit/convert chain and hands the result to a display sink.
//!
//! Everything here runs on one thread. The owner drives the scheduler by
//! calling [`PlaybackScheduler::poll`] and sleeping until
//! [`PlaybackScheduler::next_wakeup`].

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use image::Rgba;
use tracing::{debug, error, info, trace, warn};

use crate::config::{CanvasSize, Configuration, FitMode, ResolutionGuardOptions};
use crate::error::Error;
use crate::events::EngineCommand;
use crate::media::{DecoderFactory, SourceKind, StreamInfo, native_pixel};
use crate::processing::convert::{PresentationBuffer, PresentationConverter};
use crate::processing::fit;
use crate::processing::guard::ResolutionGuard;
use crate::source::{FrameSource, ReadOutcome};

/// Consecutive frame failures that turn into a stream error.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not playing; nothing was decoded.
    Idle,
    Presented,
    /// End of stream reached; rewound to frame 0 without rendering.
    Looped,
    /// The frame was unavailable; the tick was skipped.
    Skipped,
    /// Too many consecutive failures; playback stopped.
    StreamFailed,
}

/// Timer period in milliseconds for a base period and speed multiplier.
pub fn tick_interval_ms(base_ms: f64, speed: f64) -> u64 {
    (base_ms / speed).round().max(1.0) as u64
}

/// Frames advanced per tick: `n - 1` grabs and one read.
pub fn skip_count(speed: f64) -> u32 {
    speed.round().max(1.0) as u32
}

/// Repeating deadline. Missed periods are dropped rather than replayed.
#[derive(Debug, Default)]
pub struct TickTimer {
    interval: Option<Duration>,
    deadline: Option<Instant>,
}

impl TickTimer {
    pub fn start(&mut self, interval: Duration, now: Instant) {
        self.interval = Some(interval);
        self.deadline = Some(now + interval);
    }

    pub fn stop(&mut self) {
        self.interval = None;
        self.deadline = None;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    pub fn rearm(&mut self, now: Instant) {
        let (Some(interval), Some(deadline)) = (self.interval, self.deadline) else {
            return;
        };
        let next = deadline + interval;
        self.deadline = Some(if next <= now { now + interval } else { next });
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelayedAction {
    /// Reload the given source and resume playback.
    Recover(PathBuf),
}

/// One-shot work bound to the session generation it was scheduled in.
#[derive(Debug, Clone)]
pub struct DelayedTask {
    pub generation: u64,
    pub due: Instant,
    pub action: DelayedAction,
}

/// Receives rendered frames and state transitions.
pub trait DisplaySink {
    /// Called once per rendered tick. Must not block.
    fn present(&mut self, buffer: PresentationBuffer);

    fn state_changed(&mut self, _state: PlaybackState) {}
}

/// Sink that keeps only the newest frame until someone takes it.
#[derive(Debug, Default)]
pub struct LatestFrame {
    latest: Option<PresentationBuffer>,
    presented: u64,
    state: PlaybackState,
}

impl LatestFrame {
    pub fn take(&mut self) -> Option<PresentationBuffer> {
        self.latest.take()
    }

    pub fn peek(&self) -> Option<&PresentationBuffer> {
        self.latest.as_ref()
    }

    /// Total frames presented so far.
    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }
}

impl DisplaySink for LatestFrame {
    fn present(&mut self, buffer: PresentationBuffer) {
        self.presented += 1;
        self.latest = Some(buffer);
    }

    fn state_changed(&mut self, state: PlaybackState) {
        self.state = state;
    }
}

pub struct PlaybackScheduler<S: DisplaySink> {
    source: FrameSource,
    canvas: CanvasSize,
    guard: ResolutionGuard,
    guard_options: ResolutionGuardOptions,
    converter: PresentationConverter,
    background: Rgba<u8>,
    video_fit: FitMode,
    image_fit: FitMode,
    speed: f64,
    state: PlaybackState,
    generation: u64,
    failures: u32,
    last_good: Option<PathBuf>,
    recovery_delay: Duration,
    timer: TickTimer,
    delayed: Vec<DelayedTask>,
    sink: S,
}

impl<S: DisplaySink> PlaybackScheduler<S> {
    pub fn new(
        factory: Box<dyn DecoderFactory>,
        canvas: CanvasSize,
        config: &Configuration,
        sink: S,
    ) -> Self {
        Self {
            source: FrameSource::with_fallback_fps(factory, config.decoder.fallback_fps),
            canvas,
            guard: ResolutionGuard::inactive(),
            guard_options: config.resolution_guard,
            converter: PresentationConverter::new(
                canvas.width,
                canvas.height,
                config.background_color,
            ),
            background: native_pixel(config.background_color),
            video_fit: config.video_fit,
            image_fit: config.image_fit,
            speed: config.speed_multiplier(),
            state: PlaybackState::Stopped,
            generation: 0,
            failures: 0,
            last_good: None,
            recovery_delay: config.recovery_delay,
            timer: TickTimer::default(),
            delayed: Vec::new(),
            sink,
        }
    }

    /// Replace the current source. Legal in any state; leaves the scheduler
    /// `Stopped` whether or not the open succeeds.
    pub fn load(&mut self, path: &Path) -> Result<StreamInfo, Error> {
        self.timer.stop();
        self.generation += 1;
        self.failures = 0;
        self.set_state(PlaybackState::Stopped);

        match self.source.load(path) {
            Ok(info) => {
                self.guard = ResolutionGuard::evaluate(
                    info.width,
                    info.height,
                    self.canvas.width,
                    self.canvas.height,
                    &self.guard_options,
                );
                if self.guard.is_active() {
                    info!(
                        width = info.width,
                        height = info.height,
                        factor = self.guard.factor(),
                        "source exceeds canvas; frames will be pre-downscaled"
                    );
                }
                self.last_good = Some(path.to_path_buf());
                Ok(info)
            }
            Err(err) => {
                self.guard = ResolutionGuard::inactive();
                warn!(path = %path.display(), error = %err, "failed to load source");
                Err(err)
            }
        }
    }

    pub fn play(&mut self) -> Result<(), Error> {
        if self.state == PlaybackState::Playing {
            return Ok(());
        }
        let interval = self.current_interval().ok_or(Error::SourceClosed)?;
        self.timer.start(interval, Instant::now());
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            debug!(state = ?self.state, "pause ignored");
            return;
        }
        self.timer.stop();
        self.set_state(PlaybackState::Paused);
    }

    /// Continue from the retained position. Only acts when paused.
    pub fn resume(&mut self) -> Result<(), Error> {
        if self.state != PlaybackState::Paused {
            debug!(state = ?self.state, "resume ignored");
            return Ok(());
        }
        self.play()
    }

    pub fn toggle_pause(&mut self) -> Result<(), Error> {
        match self.state {
            PlaybackState::Playing => {
                self.pause();
                Ok(())
            }
            PlaybackState::Paused | PlaybackState::Stopped => self.play(),
        }
    }

    /// Release the decoder and invalidate pending delayed work.
    pub fn stop(&mut self) {
        self.timer.stop();
        self.source.close();
        self.guard = ResolutionGuard::inactive();
        self.generation += 1;
        self.failures = 0;
        self.set_state(PlaybackState::Stopped);
    }

    /// Reload the last source that opened successfully and play it.
    pub fn reload(&mut self) -> Result<(), Error> {
        let path = self.last_good.clone().ok_or(Error::SourceClosed)?;
        self.load(&path)?;
        self.play()
    }

    pub fn set_speed(&mut self, multiplier: f64) -> Result<(), Error> {
        if !(multiplier.is_finite() && multiplier > 0.0) {
            return Err(Error::InvalidSpeed(multiplier));
        }
        self.speed = multiplier;
        if self.state == PlaybackState::Playing {
            if let Some(interval) = self.current_interval() {
                self.timer.start(interval, Instant::now());
            }
        }
        info!(speed = multiplier, interval = ?self.tick_interval(), "playback speed changed");
        Ok(())
    }

    pub fn set_speed_percent(&mut self, percent: u32) -> Result<(), Error> {
        self.set_speed(f64::from(percent) / 100.0)
    }

    /// Change the fit mode for the kind of source currently loaded.
    pub fn set_fit_mode(&mut self, mode: FitMode) {
        self.set_fit_mode_for(self.current_kind(), mode);
    }

    pub fn set_fit_mode_for(&mut self, kind: SourceKind, mode: FitMode) {
        match kind {
            SourceKind::Video => self.video_fit = mode,
            SourceKind::Image => self.image_fit = mode,
        }
        info!(?kind, %mode, "fit mode changed");
    }

    pub fn seek_fraction(&mut self, p: f64) -> Result<u64, Error> {
        self.source.seek_fraction(p)
    }

    /// Run one step of the render pipeline.
    pub fn tick(&mut self) -> TickOutcome {
        if self.state != PlaybackState::Playing || !self.source.is_open() {
            return TickOutcome::Idle;
        }

        for _ in 1..skip_count(self.speed) {
            match self.source.grab() {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => return self.record_failure(err),
            }
        }

        match self.source.read() {
            Ok(ReadOutcome::EndOfStream) if self.source.position() == 0 => {
                self.record_failure(Error::Decode("end of stream before the first frame".into()))
            }
            Ok(ReadOutcome::EndOfStream) => match self.source.restart() {
                Ok(()) => {
                    self.failures = 0;
                    trace!("end of stream; looping");
                    TickOutcome::Looped
                }
                Err(err) => self.record_failure(err),
            },
            Ok(ReadOutcome::Frame(raw)) => match raw.into_image() {
                Ok(frame) => {
                    self.failures = 0;
                    let reduced = self.guard.apply(frame);
                    let fitted = fit::apply(
                        &reduced,
                        self.canvas.width,
                        self.canvas.height,
                        self.fit_mode(),
                        self.background,
                    );
                    let buffer = self.converter.to_display_buffer(&fitted);
                    self.sink.present(buffer);
                    TickOutcome::Presented
                }
                Err(err) => self.record_failure(err),
            },
            Err(err) => self.record_failure(err),
        }
    }

    /// Run due delayed tasks and, if the tick timer expired, one tick.
    pub fn poll(&mut self, now: Instant) -> Option<TickOutcome> {
        self.run_delayed(now);
        if !self.timer.is_due(now) {
            return None;
        }
        self.timer.rearm(now);
        Some(self.tick())
    }

    /// Earliest instant at which `poll` has work to do.
    pub fn next_wakeup(&self) -> Option<Instant> {
        let delayed = self.next_delayed_deadline();
        match (self.timer.deadline(), delayed) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire every delayed task due at `now`. Tasks from an older generation
    /// are dropped. Returns how many tasks acted.
    pub fn run_delayed(&mut self, now: Instant) -> usize {
        let (due, pending): (Vec<_>, Vec<_>) =
            self.delayed.drain(..).partition(|task| task.due <= now);
        self.delayed = pending;

        let mut acted = 0;
        for task in due {
            if task.generation != self.generation {
                debug!(
                    scheduled = task.generation,
                    current = self.generation,
                    "dropping stale delayed task"
                );
                continue;
            }
            acted += 1;
            match task.action {
                DelayedAction::Recover(path) => self.recover(&path),
            }
        }
        acted
    }

    pub fn next_delayed_deadline(&self) -> Option<Instant> {
        self.delayed.iter().map(|task| task.due).min()
    }

    pub fn pending_tasks(&self) -> &[DelayedTask] {
        &self.delayed
    }

    pub fn apply(&mut self, command: EngineCommand) -> Result<(), Error> {
        debug!(?command, "applying command");
        match command {
            EngineCommand::Play => self.play(),
            EngineCommand::Pause => {
                self.pause();
                Ok(())
            }
            EngineCommand::Resume => self.resume(),
            EngineCommand::TogglePause => self.toggle_pause(),
            EngineCommand::Stop => {
                self.stop();
                Ok(())
            }
            EngineCommand::Reload => self.reload(),
            EngineCommand::Load(path) => {
                self.load(&path)?;
                self.play()
            }
            EngineCommand::SetFitMode(mode) => {
                self.set_fit_mode(mode);
                Ok(())
            }
            EngineCommand::SetFitModeFor(kind, mode) => {
                self.set_fit_mode_for(kind, mode);
                Ok(())
            }
            EngineCommand::SetSpeedPercent(percent) => self.set_speed_percent(percent),
            EngineCommand::Seek(fraction) => self.seek_fraction(fraction).map(|_| ()),
        }
    }

    /// Period of the repeating timer while playing.
    pub fn tick_interval(&self) -> Option<Duration> {
        if self.state == PlaybackState::Playing {
            self.current_interval()
        } else {
            None
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Fit mode applied to the next frame of the current source.
    pub fn fit_mode(&self) -> FitMode {
        match self.current_kind() {
            SourceKind::Video => self.video_fit,
            SourceKind::Image => self.image_fit,
        }
    }

    pub fn fit_mode_for(&self, kind: SourceKind) -> FitMode {
        match kind {
            SourceKind::Video => self.video_fit,
            SourceKind::Image => self.image_fit,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn canvas(&self) -> CanvasSize {
        self.canvas
    }

    pub fn guard(&self) -> ResolutionGuard {
        self.guard
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    pub fn last_good_path(&self) -> Option<&Path> {
        self.last_good.as_deref()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    fn current_kind(&self) -> SourceKind {
        self.source
            .info()
            .map_or(SourceKind::Video, |info| info.kind)
    }

    fn current_interval(&self) -> Option<Duration> {
        let info = self.source.info()?;
        let base_ms = 1000.0 / info.fps;
        Some(Duration::from_millis(tick_interval_ms(base_ms, self.speed)))
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state == state {
            return;
        }
        info!(from = ?self.state, to = ?state, "playback state changed");
        self.state = state;
        self.sink.state_changed(state);
    }

    fn record_failure(&mut self, err: Error) -> TickOutcome {
        self.failures += 1;
        warn!(error = %err, failures = self.failures, "frame unavailable; skipping tick");
        if self.failures < MAX_CONSECUTIVE_FAILURES {
            return TickOutcome::Skipped;
        }

        let stream_err = Error::Stream {
            failures: self.failures,
        };
        error!(error = %stream_err, "stopping playback");
        self.stop();
        if let Some(path) = self.last_good.clone() {
            let due = Instant::now() + self.recovery_delay;
            info!(
                path = %path.display(),
                delay = %humantime::format_duration(self.recovery_delay),
                "scheduling recovery reload"
            );
            self.delayed.push(DelayedTask {
                generation: self.generation,
                due,
                action: DelayedAction::Recover(path),
            });
        }
        TickOutcome::StreamFailed
    }

    fn recover(&mut self, path: &Path) {
        info!(path = %path.display(), "attempting recovery reload");
        let result = self.load(path).and_then(|_| self.play());
        if let Err(err) = result {
            error!(path = %path.display(), error = %err, "recovery failed; staying stopped");
        }
    }
}

impl<S: DisplaySink> Drop for PlaybackScheduler<S> {
    fn drop(&mut self) {
        self.timer.stop();
        self.source.close();
    }
}
