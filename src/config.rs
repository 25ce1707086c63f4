use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::error::Error;

/// How a frame is mapped onto the fixed canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitMode {
    /// Resize to exactly the canvas size, ignoring aspect ratio.
    Stretch,
    /// Cover: fill the canvas, cropping the overflowing axis.
    #[serde(alias = "cover")]
    Scale,
    /// Contain: show the whole frame, padding with the background color.
    #[serde(alias = "contain")]
    Fit,
    /// Native size, centered; overflow cropped.
    Center,
    /// Native size, repeated from the canvas origin.
    Tile,
}

impl FitMode {
    const ALL: &'static [Self] = &[
        Self::Stretch,
        Self::Scale,
        Self::Fit,
        Self::Center,
        Self::Tile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stretch => "stretch",
            Self::Scale => "scale",
            Self::Fit => "fit",
            Self::Center => "center",
            Self::Tile => "tile",
        }
    }
}

impl fmt::Display for FitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FitMode {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim().to_ascii_lowercase();
        match raw.as_str() {
            "cover" => return Ok(Self::Scale),
            "contain" => return Ok(Self::Fit),
            _ => {}
        }
        Self::ALL
            .iter()
            .copied()
            .find(|mode| mode.as_str() == raw)
            .ok_or_else(|| {
                Error::Command(format!(
                    "unknown fit mode '{raw}', expected one of: stretch, scale, fit, center, tile"
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ResolutionGuardOptions {
    /// Source-to-canvas ratio (per axis) at which frames are pre-downscaled.
    pub threshold: f32,
    /// Scale factor applied to every frame once the guard is active.
    pub factor: f32,
}

impl ResolutionGuardOptions {
    pub const DEFAULT_THRESHOLD: f32 = 2.0;
    pub const DEFAULT_FACTOR: f32 = 0.5;
}

impl Default for ResolutionGuardOptions {
    fn default() -> Self {
        Self {
            threshold: Self::DEFAULT_THRESHOLD,
            factor: Self::DEFAULT_FACTOR,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DecoderOptions {
    /// `ffmpeg` executable used to stream raw frames.
    pub ffmpeg_path: PathBuf,
    /// `ffprobe` executable used to read stream metadata.
    pub ffprobe_path: PathBuf,
    /// Refresh rate for still-image backgrounds.
    pub still_image_fps: f64,
    /// Frame rate assumed when a video reports none.
    pub fallback_fps: f64,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            still_image_fps: 1.0,
            fallback_fps: 30.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Source shown at startup (video or still image).
    pub background: Option<PathBuf>,
    /// Canvas size; defaults to the size of the monitor hosting the window.
    pub canvas: Option<CanvasSize>,
    /// Fit mode used for video sources.
    pub video_fit: FitMode,
    /// Fit mode used for still-image sources.
    pub image_fit: FitMode,
    /// Playback speed in percent of the source frame rate.
    pub speed_percent: u32,
    /// RGB fill used for letterbox bars and fallback frames.
    pub background_color: [u8; 3],
    /// Delay before reloading the last good source after a stream error.
    #[serde(with = "humantime_serde")]
    pub recovery_delay: Duration,
    pub resolution_guard: ResolutionGuardOptions,
    pub decoder: DecoderOptions,
}

impl Configuration {
    pub const MIN_SPEED_PERCENT: u32 = 10;
    pub const MAX_SPEED_PERCENT: u32 = 300;

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(mut self) -> Result<Self> {
        ensure!(
            (Self::MIN_SPEED_PERCENT..=Self::MAX_SPEED_PERCENT).contains(&self.speed_percent),
            "speed-percent must be between {} and {}",
            Self::MIN_SPEED_PERCENT,
            Self::MAX_SPEED_PERCENT
        );
        if let Some(canvas) = self.canvas {
            ensure!(
                canvas.width > 0 && canvas.height > 0,
                "canvas dimensions must be positive"
            );
        }
        ensure!(
            !self.recovery_delay.is_zero(),
            "recovery-delay must be greater than zero"
        );
        let guard = self.resolution_guard;
        ensure!(
            guard.threshold.is_finite() && guard.threshold >= 1.0,
            "resolution-guard.threshold must be at least 1.0"
        );
        ensure!(
            guard.factor.is_finite() && guard.factor > 0.0 && guard.factor < 1.0,
            "resolution-guard.factor must be between 0 and 1 (exclusive)"
        );
        ensure!(
            self.decoder.still_image_fps.is_finite() && self.decoder.still_image_fps > 0.0,
            "decoder.still-image-fps must be positive"
        );
        ensure!(
            self.decoder.fallback_fps.is_finite() && self.decoder.fallback_fps > 0.0,
            "decoder.fallback-fps must be positive"
        );
        self.background = self.background.map(|path| expand_home(&path));
        if let Some(path) = self.background.as_ref() {
            ensure!(
                !path.as_os_str().is_empty(),
                "background path must not be empty"
            );
        }
        Ok(self)
    }

    /// Speed multiplier derived from `speed-percent`.
    pub fn speed_multiplier(&self) -> f64 {
        f64::from(self.speed_percent) / 100.0
    }

    /// Load, then validate, with context suitable for the CLI.
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?
            .validated()
            .context("invalid configuration values")
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            background: None,
            canvas: None,
            video_fit: FitMode::Stretch,
            image_fit: FitMode::Scale,
            speed_percent: 100,
            background_color: [0, 0, 0],
            recovery_delay: Duration::from_secs(1),
            resolution_guard: ResolutionGuardOptions::default(),
            decoder: DecoderOptions::default(),
        }
    }
}

/// Expand a leading `~` to `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_mode_parses_aliases() {
        assert_eq!("cover".parse::<FitMode>().unwrap(), FitMode::Scale);
        assert_eq!("Contain".parse::<FitMode>().unwrap(), FitMode::Fit);
        assert_eq!(" tile ".parse::<FitMode>().unwrap(), FitMode::Tile);
        assert!("zoom".parse::<FitMode>().is_err());
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        let p = Path::new("/videos/loop.mp4");
        assert_eq!(expand_home(p), p.to_path_buf());
    }
}
