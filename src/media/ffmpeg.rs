//! Video decoding through `ffprobe`/`ffmpeg` subprocesses.
//!
//! - `ffprobe` reads dimensions, frame rate and frame count once at open time
//! - `ffmpeg -f rawvideo -pix_fmt bgra` streams frames over a pipe
//! - seeking respawns `ffmpeg` with an input seek (`-ss` before `-i`)

use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use tracing::{debug, warn};

use super::{Decoder, RawFrame, SourceKind, StreamInfo};
use crate::config::DecoderOptions;
use crate::error::Error;

const BYTES_PER_PIXEL: usize = 4;

/// Run `ffprobe` against `path` and parse its JSON report.
pub fn probe(ffprobe: &Path, path: &Path, fallback_fps: f64) -> Result<StreamInfo, Error> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .map_err(|err| Error::open(path, format!("failed to run ffprobe: {err}")))?;

    if !output.status.success() {
        return Err(Error::open(
            path,
            format!("ffprobe exited with {}", output.status),
        ));
    }

    parse_probe(&output.stdout, fallback_fps).map_err(|reason| Error::open(path, reason))
}

/// Extract the first video stream from an `ffprobe -print_format json` report.
pub fn parse_probe(json: &[u8], fallback_fps: f64) -> Result<StreamInfo, String> {
    let report: serde_json::Value =
        serde_json::from_slice(json).map_err(|err| format!("unreadable ffprobe output: {err}"))?;

    let streams = report["streams"]
        .as_array()
        .ok_or("no streams in ffprobe output")?;
    let video = streams
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("video"))
        .ok_or("no video stream found")?;

    let width = video["width"].as_u64().unwrap_or(0) as u32;
    let height = video["height"].as_u64().unwrap_or(0) as u32;

    let fps = ["avg_frame_rate", "r_frame_rate"]
        .iter()
        .filter_map(|key| video[*key].as_str())
        .find_map(parse_frame_rate)
        .unwrap_or(fallback_fps);

    let duration_secs = report["format"]["duration"]
        .as_str()
        .or_else(|| video["duration"].as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    let frame_count = video["nb_frames"]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| (duration_secs * fps).round().max(0.0) as u64);

    Ok(StreamInfo {
        kind: SourceKind::Video,
        width,
        height,
        fps,
        frame_count,
    })
}

/// Parse `30000/1001` or `25` style rates. Zero or malformed rates yield `None`.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let n: f64 = num.trim().parse().ok()?;
            let d: f64 = den.trim().parse().ok()?;
            if d == 0.0 {
                return None;
            }
            n / d
        }
        None => rate.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    path: PathBuf,
    info: StreamInfo,
    frame_bytes: usize,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    scratch: Vec<u8>,
}

impl FfmpegDecoder {
    pub fn open(path: &Path, options: &DecoderOptions) -> Result<Self, Error> {
        let info = probe(&options.ffprobe_path, path, options.fallback_fps)?;
        if info.width == 0 || info.height == 0 {
            return Err(Error::open(path, "stream reports zero dimensions"));
        }
        let frame_bytes = info.width as usize * info.height as usize * BYTES_PER_PIXEL;
        let mut decoder = Self {
            ffmpeg: options.ffmpeg_path.clone(),
            path: path.to_path_buf(),
            info,
            frame_bytes,
            child: None,
            stdout: None,
            scratch: Vec::new(),
        };
        decoder
            .spawn_at(0)
            .map_err(|err| Error::open(path, err.to_string()))?;
        debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            fps = info.fps,
            frames = info.frame_count,
            "ffmpeg decoder opened"
        );
        Ok(decoder)
    }

    fn spawn_at(&mut self, frame_index: u64) -> Result<(), Error> {
        self.release();
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-v", "error", "-nostdin"]);
        if frame_index > 0 {
            let start = frame_index as f64 / self.info.fps;
            cmd.arg("-ss").arg(format!("{start:.6}"));
        }
        cmd.arg("-i")
            .arg(&self.path)
            .args(["-an", "-f", "rawvideo", "-pix_fmt", "bgra"])
            .arg("-s")
            .arg(format!("{}x{}", self.info.width, self.info.height))
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd
            .spawn()
            .map_err(|err| Error::Decode(format!("failed to spawn ffmpeg: {err}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Decode("ffmpeg has no stdout pipe".into()))?;
        self.child = Some(child);
        self.stdout = Some(stdout);
        Ok(())
    }

    /// Fill `buf` with the next frame. `Ok(false)` on a clean end of stream;
    /// a pipe that closes because ffmpeg failed is a decode error.
    fn next_frame_into(
        stdout: Option<&mut ChildStdout>,
        child: Option<&mut Child>,
        buf: &mut [u8],
    ) -> Result<bool, Error> {
        let Some(stdout) = stdout else {
            return Err(Error::Decode("ffmpeg pipe is closed".into()));
        };
        match stdout.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                let Some(child) = child else {
                    return Ok(false);
                };
                let status = child
                    .wait()
                    .map_err(|err| Error::Decode(format!("failed to reap ffmpeg: {err}")))?;
                if status.success() {
                    Ok(false)
                } else {
                    Err(Error::Decode(format!("ffmpeg exited with {status}")))
                }
            }
            Err(err) => Err(Error::Decode(format!("ffmpeg pipe read failed: {err}"))),
        }
    }
}

impl Decoder for FfmpegDecoder {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn grab(&mut self) -> Result<bool, Error> {
        if self.scratch.len() != self.frame_bytes {
            self.scratch.resize(self.frame_bytes, 0);
        }
        Self::next_frame_into(self.stdout.as_mut(), self.child.as_mut(), &mut self.scratch)
    }

    fn read(&mut self) -> Result<Option<RawFrame>, Error> {
        let mut pixels = vec![0u8; self.frame_bytes];
        if Self::next_frame_into(self.stdout.as_mut(), self.child.as_mut(), &mut pixels)? {
            Ok(Some(RawFrame {
                width: self.info.width,
                height: self.info.height,
                pixels,
            }))
        } else {
            Ok(None)
        }
    }

    fn seek_frame(&mut self, index: u64) -> Result<(), Error> {
        self.spawn_at(index)
    }

    fn release(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill() {
                if err.kind() != ErrorKind::InvalidInput {
                    warn!(error = %err, "failed to stop ffmpeg");
                }
            }
            let _ = child.wait();
        }
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        self.release();
    }
}
