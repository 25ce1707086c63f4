use fast_image_resize as fir;
use image::{Rgba, imageops};
use tracing::warn;

use super::layout::compute_layout;
use super::resize::resize_native;
use crate::config::FitMode;
use crate::error::Error;
use crate::media::NativeImage;

/// Map `frame` onto a `canvas_w x canvas_h` image under `mode`.
///
/// Never fails: a failing mode falls back to `Stretch`, and a failing
/// `Stretch` yields a canvas filled with `background`.
pub fn apply(
    frame: &NativeImage,
    canvas_w: u32,
    canvas_h: u32,
    mode: FitMode,
    background: Rgba<u8>,
) -> NativeImage {
    with_fallback(canvas_w, canvas_h, mode, background, |mode| {
        try_apply(frame, canvas_w, canvas_h, mode, background)
    })
}

fn with_fallback(
    canvas_w: u32,
    canvas_h: u32,
    mode: FitMode,
    background: Rgba<u8>,
    attempt: impl Fn(FitMode) -> Result<NativeImage, Error>,
) -> NativeImage {
    match attempt(mode) {
        Ok(image) => image,
        Err(err) => {
            warn!(error = %err, %mode, "fit transform failed; falling back to stretch");
            if mode != FitMode::Stretch {
                match attempt(FitMode::Stretch) {
                    Ok(image) => return image,
                    Err(err) => warn!(error = %err, "stretch fallback failed"),
                }
            }
            NativeImage::from_pixel(canvas_w, canvas_h, background)
        }
    }
}

pub fn try_apply(
    frame: &NativeImage,
    canvas_w: u32,
    canvas_h: u32,
    mode: FitMode,
    background: Rgba<u8>,
) -> Result<NativeImage, Error> {
    if canvas_w == 0 || canvas_h == 0 {
        return Err(Error::Transform("canvas dimensions must be positive".into()));
    }
    if frame.width() == 0 || frame.height() == 0 {
        return Err(Error::Transform("frame has zero dimensions".into()));
    }

    let layout = compute_layout(frame.width(), frame.height(), canvas_w, canvas_h, mode);
    let resize = |w, h| resize_native(frame, w, h, fir::FilterType::Bilinear);

    let out = match mode {
        FitMode::Stretch => resize(canvas_w, canvas_h)?,
        FitMode::Scale => {
            let scaled = resize(layout.scaled_width, layout.scaled_height)?;
            if scaled.dimensions() == (canvas_w, canvas_h) {
                scaled
            } else {
                let crop_x = u32::try_from(-layout.x_offset).unwrap_or(0);
                let crop_y = u32::try_from(-layout.y_offset).unwrap_or(0);
                imageops::crop_imm(&scaled, crop_x, crop_y, canvas_w, canvas_h).to_image()
            }
        }
        FitMode::Fit => {
            let scaled = resize(layout.scaled_width, layout.scaled_height)?;
            let mut canvas = NativeImage::from_pixel(canvas_w, canvas_h, background);
            imageops::replace(&mut canvas, &scaled, layout.x_offset, layout.y_offset);
            canvas
        }
        FitMode::Center => {
            let mut canvas = NativeImage::from_pixel(canvas_w, canvas_h, background);
            imageops::replace(&mut canvas, frame, layout.x_offset, layout.y_offset);
            canvas
        }
        FitMode::Tile => {
            let mut canvas = NativeImage::from_pixel(canvas_w, canvas_h, background);
            for y in (0..canvas_h).step_by(frame.height() as usize) {
                for x in (0..canvas_w).step_by(frame.width() as usize) {
                    imageops::replace(&mut canvas, frame, i64::from(x), i64::from(y));
                }
            }
            canvas
        }
    };

    if out.dimensions() != (canvas_w, canvas_h) {
        return Err(Error::Transform(format!(
            "{mode} produced {}x{} for a {canvas_w}x{canvas_h} canvas",
            out.width(),
            out.height()
        )));
    }
    Ok(out)
}
