use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::DecoderOptions;
use crate::error::Error;
use crate::media::{Decoder, DecoderFactory, RawFrame, StreamInfo};

/// Result of a successful `FrameSource::read`.
#[derive(Debug)]
pub enum ReadOutcome {
    Frame(RawFrame),
    EndOfStream,
}

/// A loaded media source with a decode cursor.
///
/// `position` is the index of the next frame to decode. A closed source
/// rejects `read`, `grab` and seeks with `Error::SourceClosed`.
pub struct FrameSource {
    factory: Box<dyn DecoderFactory>,
    decoder: Option<Box<dyn Decoder>>,
    path: Option<PathBuf>,
    info: Option<StreamInfo>,
    position: u64,
    fallback_fps: f64,
}

impl FrameSource {
    pub fn new(factory: Box<dyn DecoderFactory>) -> Self {
        Self::with_fallback_fps(factory, DecoderOptions::default().fallback_fps)
    }

    pub fn with_fallback_fps(factory: Box<dyn DecoderFactory>, fallback_fps: f64) -> Self {
        Self {
            factory,
            decoder: None,
            path: None,
            info: None,
            position: 0,
            fallback_fps,
        }
    }

    /// Release any held decoder and open `path`.
    pub fn load(&mut self, path: &Path) -> Result<StreamInfo, Error> {
        self.close();

        let mut decoder = self.factory.open(path)?;
        let mut info = decoder.info();
        if info.width == 0 || info.height == 0 {
            decoder.release();
            return Err(Error::open(path, "source has zero dimensions"));
        }
        if !(info.fps.is_finite() && info.fps > 0.0) {
            warn!(
                path = %path.display(),
                reported = info.fps,
                fallback = self.fallback_fps,
                "source reports no usable frame rate"
            );
            info.fps = self.fallback_fps;
        }

        info!(
            path = %path.display(),
            kind = ?info.kind,
            width = info.width,
            height = info.height,
            fps = info.fps,
            frames = info.frame_count,
            "source loaded"
        );
        self.decoder = Some(decoder);
        self.path = Some(path.to_path_buf());
        self.info = Some(info);
        self.position = 0;
        Ok(info)
    }

    pub fn read(&mut self) -> Result<ReadOutcome, Error> {
        let at_end = self.at_end();
        let decoder = self.decoder.as_mut().ok_or(Error::SourceClosed)?;
        if at_end {
            return Ok(ReadOutcome::EndOfStream);
        }
        match decoder.read()? {
            Some(frame) => {
                self.position += 1;
                Ok(ReadOutcome::Frame(frame))
            }
            None => Ok(ReadOutcome::EndOfStream),
        }
    }

    /// Advance one frame without decoding pixels. `Ok(false)` at end of stream.
    pub fn grab(&mut self) -> Result<bool, Error> {
        let at_end = self.at_end();
        let decoder = self.decoder.as_mut().ok_or(Error::SourceClosed)?;
        if at_end {
            return Ok(false);
        }
        let advanced = decoder.grab()?;
        if advanced {
            self.position += 1;
        }
        Ok(advanced)
    }

    /// Jump to `round(p * frame_count)`; `p` is clamped to `[0, 1]` and the
    /// target to the last frame. Returns the new position.
    pub fn seek_fraction(&mut self, p: f64) -> Result<u64, Error> {
        let info = self.info.ok_or(Error::SourceClosed)?;
        let target = seek_target(p, info.frame_count);
        let decoder = self.decoder.as_mut().ok_or(Error::SourceClosed)?;
        decoder.seek_frame(target)?;
        self.position = target;
        debug!(fraction = p, frame = target, "seeked");
        Ok(target)
    }

    pub fn restart(&mut self) -> Result<(), Error> {
        let decoder = self.decoder.as_mut().ok_or(Error::SourceClosed)?;
        decoder.seek_frame(0)?;
        self.position = 0;
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.release();
            if let Some(path) = self.path.as_ref() {
                debug!(path = %path.display(), "source closed");
            }
        }
        self.path = None;
        self.info = None;
        self.position = 0;
    }

    pub fn is_open(&self) -> bool {
        self.decoder.is_some()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn info(&self) -> Option<StreamInfo> {
        self.info
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn at_end(&self) -> bool {
        self.info
            .is_some_and(|info| info.frame_count > 0 && self.position >= info.frame_count)
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

pub fn seek_target(p: f64, frame_count: u64) -> u64 {
    if frame_count == 0 {
        return 0;
    }
    let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
    let target = (p * frame_count as f64).round() as u64;
    target.min(frame_count - 1)
}
