use fast_image_resize as fir;
use tracing::{debug, warn};

use super::resize::resize_native;
use crate::config::ResolutionGuardOptions;
use crate::media::NativeImage;

/// Pre-downscale policy, evaluated once per loaded source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionGuard {
    active: bool,
    factor: f32,
}

impl ResolutionGuard {
    pub fn inactive() -> Self {
        Self {
            active: false,
            factor: 1.0,
        }
    }

    /// Active when either native axis reaches `threshold` times the canvas.
    pub fn evaluate(
        native_w: u32,
        native_h: u32,
        canvas_w: u32,
        canvas_h: u32,
        options: &ResolutionGuardOptions,
    ) -> Self {
        let threshold = f64::from(options.threshold);
        let oversized = |native: u32, canvas: u32| f64::from(native) >= threshold * f64::from(canvas);
        let active = oversized(native_w, canvas_w) || oversized(native_h, canvas_h);
        debug!(
            native_w,
            native_h,
            canvas_w,
            canvas_h,
            active,
            "resolution guard evaluated"
        );
        if active {
            Self {
                active,
                factor: options.factor,
            }
        } else {
            Self::inactive()
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    /// Size a `width x height` frame is reduced to, or `None` when inactive.
    pub fn target_size(&self, width: u32, height: u32) -> Option<(u32, u32)> {
        if !self.active {
            return None;
        }
        let scale = |v: u32| ((v as f32 * self.factor).round() as u32).max(1);
        Some((scale(width), scale(height)))
    }

    /// Downscale `frame` when active. A failed resize passes the frame through.
    pub fn apply(&self, frame: NativeImage) -> NativeImage {
        let Some((w, h)) = self.target_size(frame.width(), frame.height()) else {
            return frame;
        };
        match resize_native(&frame, w, h, fir::FilterType::Bilinear) {
            Ok(small) => small,
            Err(err) => {
                warn!(error = %err, "resolution guard downscale failed; using full-size frame");
                frame
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn triggers_at_twice_the_canvas() {
        let opts = ResolutionGuardOptions::default();
        let guard = ResolutionGuard::evaluate(3840, 2160, 1920, 1080, &opts);
        assert!(guard.is_active());
        assert_eq!(guard.target_size(3840, 2160), Some((1920, 1080)));
    }

    #[test]
    fn either_axis_is_enough() {
        let opts = ResolutionGuardOptions::default();
        assert!(ResolutionGuard::evaluate(1000, 2400, 1920, 1080, &opts).is_active());
        assert!(!ResolutionGuard::evaluate(3000, 2000, 1920, 1080, &opts).is_active());
    }

    #[test]
    fn inactive_guard_passes_frames_through() {
        let guard = ResolutionGuard::inactive();
        let frame = NativeImage::from_pixel(5, 3, Rgba([1, 2, 3, 255]));
        assert_eq!(guard.apply(frame).dimensions(), (5, 3));
    }

    #[test]
    fn active_guard_halves_frames() {
        let opts = ResolutionGuardOptions::default();
        let guard = ResolutionGuard::evaluate(40, 20, 10, 10, &opts);
        let frame = NativeImage::from_pixel(40, 20, Rgba([1, 2, 3, 255]));
        assert_eq!(guard.apply(frame).dimensions(), (20, 10));
    }
}
