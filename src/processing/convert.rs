use tracing::{trace, warn};

use crate::error::Error;
use crate::media::NativeImage;

const CHANNELS: usize = 4;

/// Canvas-sized pixel data in display order (R, G, B, A).
///
/// Owned by whoever received it; independent of the converter's scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl PresentationBuffer {
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixel = [rgb[0], rgb[1], rgb[2], 255];
        let pixels = pixel
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * CHANNELS)
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
        self.pixels.get(i..i + CHANNELS)?.try_into().ok()
    }
}

/// Reorders decoder-order pixels into display order through a reusable
/// scratch buffer.
#[derive(Debug)]
pub struct PresentationConverter {
    canvas: (u32, u32),
    fallback_color: [u8; 3],
    scratch: Vec<u8>,
    dims: (u32, u32),
    reallocations: u64,
}

impl PresentationConverter {
    pub fn new(canvas_w: u32, canvas_h: u32, fallback_color: [u8; 3]) -> Self {
        Self {
            canvas: (canvas_w, canvas_h),
            fallback_color,
            scratch: Vec::new(),
            dims: (0, 0),
            reallocations: 0,
        }
    }

    /// Convert `image` and return an owned copy of the result. On failure
    /// returns a canvas-sized buffer of the fallback color.
    pub fn to_display_buffer(&mut self, image: &NativeImage) -> PresentationBuffer {
        match self.convert(image) {
            Ok(()) => PresentationBuffer {
                width: self.dims.0,
                height: self.dims.1,
                pixels: self.scratch.clone(),
            },
            Err(err) => {
                warn!(error = %err, "presentation conversion failed; presenting solid canvas");
                PresentationBuffer::solid(self.canvas.0, self.canvas.1, self.fallback_color)
            }
        }
    }

    /// Number of times the scratch buffer was (re)allocated.
    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    fn convert(&mut self, image: &NativeImage) -> Result<(), Error> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(Error::Transform("cannot present an empty image".into()));
        }
        let len = w as usize * h as usize * CHANNELS;
        let src = image.as_raw();
        if src.len() < len {
            return Err(Error::Transform(format!(
                "image buffer holds {} bytes, {w}x{h} needs {len}",
                src.len()
            )));
        }

        if self.dims != (w, h) {
            trace!(width = w, height = h, "reallocating presentation buffer");
            self.scratch = vec![0; len];
            self.dims = (w, h);
            self.reallocations += 1;
        }

        for (dst, px) in self
            .scratch
            .chunks_exact_mut(CHANNELS)
            .zip(src.chunks_exact(CHANNELS))
        {
            dst.copy_from_slice(&[px[2], px[1], px[0], px[3]]);
        }
        Ok(())
    }
}
