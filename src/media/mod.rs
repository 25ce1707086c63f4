//! Decoder boundary: everything the engine needs from an external media decoder.
//!
//! Frames cross this boundary as four interleaved 8-bit channels in decoder
//! order (B, G, R, A). The engine never interprets pixel values beyond the one
//! channel reordering done by the presentation converter.

pub mod ffmpeg;
pub mod still;

use std::path::Path;

use image::{ImageBuffer, ImageFormat, Rgba};

use crate::config::DecoderOptions;
use crate::error::Error;

/// Four-channel image in decoder channel order (B, G, R, A).
///
/// `image::Rgba` is only used as a 4 x u8 container here; channel 0 is blue.
pub type NativeImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Build a decoder-order pixel from an RGB color.
pub fn native_pixel(rgb: [u8; 3]) -> Rgba<u8> {
    Rgba([rgb[2], rgb[1], rgb[0], 255])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Video,
    Image,
}

/// Metadata reported by a decoder right after opening.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub kind: SourceKind,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Total number of frames; zero when the container does not say.
    pub frame_count: u64,
}

/// One decoded frame. Transient: never retained beyond a tick.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RawFrame {
    pub fn into_image(self) -> Result<NativeImage, Error> {
        let (width, height) = (self.width, self.height);
        NativeImage::from_raw(width, height, self.pixels).ok_or_else(|| {
            Error::Decode(format!(
                "frame buffer too small for {width}x{height} decoder output"
            ))
        })
    }
}

/// An open decoder handle.
pub trait Decoder {
    fn info(&self) -> StreamInfo;

    /// Advance one frame without producing pixels. `Ok(false)` at end of stream.
    fn grab(&mut self) -> Result<bool, Error>;

    /// Decode the next frame. `Ok(None)` at end of stream.
    fn read(&mut self) -> Result<Option<RawFrame>, Error>;

    /// Position the cursor so the next `read` returns frame `index`.
    fn seek_frame(&mut self, index: u64) -> Result<(), Error>;

    /// Free decoder resources. Must be idempotent.
    fn release(&mut self);
}

/// Opens decoders for paths.
pub trait DecoderFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn Decoder>, Error>;
}

/// Production factory: still images through the `image` crate, everything
/// else through ffmpeg.
#[derive(Debug, Clone)]
pub struct MediaDecoderFactory {
    options: DecoderOptions,
}

impl MediaDecoderFactory {
    pub fn new(options: DecoderOptions) -> Self {
        Self { options }
    }
}

impl DecoderFactory for MediaDecoderFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn Decoder>, Error> {
        if !path.is_file() {
            return Err(Error::open(path, "no such file"));
        }
        if is_still_image(path) {
            let decoder = still::StillImageDecoder::open(path, self.options.still_image_fps)?;
            Ok(Box::new(decoder))
        } else {
            let decoder = ffmpeg::FfmpegDecoder::open(path, &self.options)?;
            Ok(Box::new(decoder))
        }
    }
}

/// Whether the path names a format handled as a still background.
pub fn is_still_image(path: &Path) -> bool {
    matches!(
        ImageFormat::from_path(path),
        Ok(ImageFormat::Png
            | ImageFormat::Jpeg
            | ImageFormat::Gif
            | ImageFormat::WebP
            | ImageFormat::Bmp)
    )
}
