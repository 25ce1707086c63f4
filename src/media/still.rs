use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::RgbaImage;
use image::imageops;
use tracing::debug;

use super::{Decoder, NativeImage, RawFrame, SourceKind, StreamInfo};
use crate::error::Error;

/// A still image exposed as a one-frame stream that loops at a fixed rate.
pub struct StillImageDecoder {
    info: StreamInfo,
    frame: NativeImage,
    consumed: bool,
}

impl StillImageDecoder {
    pub fn open(path: &Path, fps: f64) -> Result<Self, Error> {
        let rgba = decode_rgba8_apply_exif(path)?;
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::open(path, "image has zero dimensions"));
        }
        Ok(Self {
            info: StreamInfo {
                kind: SourceKind::Image,
                width,
                height,
                fps,
                frame_count: 1,
            },
            frame: rgba_to_native(rgba),
            consumed: false,
        })
    }
}

impl Decoder for StillImageDecoder {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn grab(&mut self) -> Result<bool, Error> {
        let had_frame = !self.consumed;
        self.consumed = true;
        Ok(had_frame)
    }

    fn read(&mut self) -> Result<Option<RawFrame>, Error> {
        if self.consumed {
            return Ok(None);
        }
        self.consumed = true;
        Ok(Some(RawFrame {
            width: self.info.width,
            height: self.info.height,
            pixels: self.frame.as_raw().clone(),
        }))
    }

    fn seek_frame(&mut self, index: u64) -> Result<(), Error> {
        self.consumed = index > 0;
        Ok(())
    }

    fn release(&mut self) {}
}

// Decodes to RGBA8 and applies EXIF orientation when present.
fn decode_rgba8_apply_exif(path: &Path) -> Result<RgbaImage, Error> {
    let img = image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|err| Error::open(path, err.to_string()))?
        .decode()
        .map_err(|err| Error::open(path, err.to_string()))?;
    let mut img = img.to_rgba8();

    match read_orientation(path).unwrap_or(1) {
        2 => img = imageops::flip_horizontal(&img),
        3 => img = imageops::rotate180(&img),
        4 => img = imageops::flip_vertical(&img),
        5 => {
            img = imageops::rotate90(&img);
            img = imageops::flip_horizontal(&img);
        }
        6 => img = imageops::rotate90(&img),
        7 => {
            img = imageops::rotate270(&img);
            img = imageops::flip_horizontal(&img);
        }
        8 => img = imageops::rotate270(&img),
        _ => {}
    }

    Ok(img)
}

fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut buf).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let o = field.value.get_uint(0)? as u16;
    debug!("exif orientation {} for {}", o, path.display());
    Some(o)
}

fn rgba_to_native(mut img: RgbaImage) -> NativeImage {
    for px in img.pixels_mut() {
        px.0.swap(0, 2);
    }
    img
}
