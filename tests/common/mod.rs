#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rust_live_wallpaper::error::Error;
use rust_live_wallpaper::media::{Decoder, DecoderFactory, RawFrame, SourceKind, StreamInfo};
use rust_live_wallpaper::processing::convert::PresentationBuffer;
use rust_live_wallpaper::scheduler::{DisplaySink, PlaybackState};

pub fn video(width: u32, height: u32, fps: f64, frame_count: u64) -> StreamInfo {
    StreamInfo {
        kind: SourceKind::Video,
        width,
        height,
        fps,
        frame_count,
    }
}

pub fn image(width: u32, height: u32) -> StreamInfo {
    StreamInfo {
        kind: SourceKind::Image,
        width,
        height,
        fps: 1.0,
        frame_count: 1,
    }
}

/// Everything the scripted decoders did, plus switches to make them fail.
#[derive(Debug, Default)]
pub struct Journal {
    pub opens: Vec<PathBuf>,
    pub reads: u32,
    pub grabs: u32,
    pub seeks: Vec<u64>,
    pub releases: u32,
    pub fail_decoding: bool,
    pub fail_opening: bool,
    /// Pixel every frame is filled with, in decoder order (B, G, R, A).
    pub color: [u8; 4],
}

#[derive(Clone, Default)]
pub struct Script(Arc<Mutex<Journal>>);

impl Script {
    pub fn journal(&self) -> MutexGuard<'_, Journal> {
        self.0.lock().unwrap()
    }

    pub fn fail_decoding(&self, fail: bool) {
        self.journal().fail_decoding = fail;
    }
}

/// Factory serving in-memory streams for a fixed set of paths.
pub struct ScriptedFactory {
    script: Script,
    streams: HashMap<PathBuf, StreamInfo>,
}

impl ScriptedFactory {
    pub fn new(script: &Script) -> Self {
        Self {
            script: script.clone(),
            streams: HashMap::new(),
        }
    }

    pub fn with(mut self, path: &str, info: StreamInfo) -> Self {
        self.streams.insert(PathBuf::from(path), info);
        self
    }
}

impl DecoderFactory for ScriptedFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn Decoder>, Error> {
        let mut journal = self.script.journal();
        journal.opens.push(path.to_path_buf());
        if journal.fail_opening {
            return Err(Error::SourceOpen {
                path: path.to_path_buf(),
                reason: "scripted open failure".into(),
            });
        }
        drop(journal);
        let info = self.streams.get(path).copied().ok_or_else(|| Error::SourceOpen {
            path: path.to_path_buf(),
            reason: "no such file".into(),
        })?;
        Ok(Box::new(ScriptedDecoder {
            script: self.script.clone(),
            info,
            cursor: 0,
        }))
    }
}

struct ScriptedDecoder {
    script: Script,
    info: StreamInfo,
    cursor: u64,
}

impl ScriptedDecoder {
    fn exhausted(&self) -> bool {
        self.cursor >= self.info.frame_count
    }
}

impl Decoder for ScriptedDecoder {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn grab(&mut self) -> Result<bool, Error> {
        let mut journal = self.script.journal();
        journal.grabs += 1;
        if journal.fail_decoding {
            return Err(Error::Decode("scripted grab failure".into()));
        }
        if self.exhausted() {
            return Ok(false);
        }
        self.cursor += 1;
        Ok(true)
    }

    fn read(&mut self) -> Result<Option<RawFrame>, Error> {
        let mut journal = self.script.journal();
        journal.reads += 1;
        if journal.fail_decoding {
            return Err(Error::Decode("scripted read failure".into()));
        }
        if self.exhausted() {
            return Ok(None);
        }
        self.cursor += 1;
        let pixel_count = self.info.width as usize * self.info.height as usize;
        Ok(Some(RawFrame {
            width: self.info.width,
            height: self.info.height,
            pixels: journal.color.repeat(pixel_count),
        }))
    }

    fn seek_frame(&mut self, index: u64) -> Result<(), Error> {
        self.script.journal().seeks.push(index);
        self.cursor = index;
        Ok(())
    }

    fn release(&mut self) {
        self.script.journal().releases += 1;
    }
}

/// Sink that records every presented frame and state transition.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub frames: Vec<PresentationBuffer>,
    pub states: Vec<PlaybackState>,
}

impl DisplaySink for RecordingSink {
    fn present(&mut self, buffer: PresentationBuffer) {
        self.frames.push(buffer);
    }

    fn state_changed(&mut self, state: PlaybackState) {
        self.states.push(state);
    }
}
