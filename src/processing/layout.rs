use crate::config::FitMode;

/// Placement of a scaled frame on the canvas.
///
/// Offsets are the canvas coordinates of the scaled frame's top-left corner;
/// negative values mean that many pixels are cropped on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitLayout {
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub x_offset: i64,
    pub y_offset: i64,
}

impl FitLayout {
    /// Whether the scaled frame lies entirely inside the canvas.
    pub fn within(&self, canvas_w: u32, canvas_h: u32) -> bool {
        self.x_offset >= 0
            && self.y_offset >= 0
            && self.x_offset + i64::from(self.scaled_width) <= i64::from(canvas_w)
            && self.y_offset + i64::from(self.scaled_height) <= i64::from(canvas_h)
    }
}

/// Pure layout math for `mode`. Zero dimensions are treated as 1.
pub fn compute_layout(
    frame_w: u32,
    frame_h: u32,
    canvas_w: u32,
    canvas_h: u32,
    mode: FitMode,
) -> FitLayout {
    let (fw, fh) = (frame_w.max(1), frame_h.max(1));
    let (cw, ch) = (canvas_w.max(1), canvas_h.max(1));

    match mode {
        FitMode::Stretch => FitLayout {
            scaled_width: cw,
            scaled_height: ch,
            x_offset: 0,
            y_offset: 0,
        },
        FitMode::Scale => {
            let (w, h) = resize_to_cover(cw, ch, fw, fh);
            let (x, y) = center_offset(w, h, cw, ch);
            FitLayout {
                scaled_width: w,
                scaled_height: h,
                x_offset: x,
                y_offset: y,
            }
        }
        FitMode::Fit => {
            let (w, h) = resize_to_contain(cw, ch, fw, fh);
            let (x, y) = center_offset(w, h, cw, ch);
            FitLayout {
                scaled_width: w,
                scaled_height: h,
                x_offset: x.clamp(0, i64::from(cw - w)),
                y_offset: y.clamp(0, i64::from(ch - h)),
            }
        }
        FitMode::Center => {
            let (x, y) = center_offset(fw, fh, cw, ch);
            FitLayout {
                scaled_width: fw,
                scaled_height: fh,
                x_offset: x,
                y_offset: y,
            }
        }
        FitMode::Tile => FitLayout {
            scaled_width: fw,
            scaled_height: fh,
            x_offset: 0,
            y_offset: 0,
        },
    }
}

/// Frame wider than the canvas (by aspect) if `fw/fh > cw/ch`, compared
/// exactly in integers.
fn wider_than_canvas(cw: u32, ch: u32, fw: u32, fh: u32) -> bool {
    u64::from(fw) * u64::from(ch) > u64::from(cw) * u64::from(fh)
}

fn scale_dim(value: u32, num: u32, den: u32) -> u32 {
    let scaled = f64::from(value) * f64::from(num) / f64::from(den);
    scaled.round().max(1.0) as u32
}

/// Smallest size covering the canvas: one axis equals the canvas, the other
/// is at least as large.
pub fn resize_to_cover(cw: u32, ch: u32, fw: u32, fh: u32) -> (u32, u32) {
    if wider_than_canvas(cw, ch, fw, fh) {
        (scale_dim(fw, ch, fh).max(cw), ch)
    } else {
        (cw, scale_dim(fh, cw, fw).max(ch))
    }
}

/// Largest size contained in the canvas: one axis equals the canvas, the
/// other is at most as large.
pub fn resize_to_contain(cw: u32, ch: u32, fw: u32, fh: u32) -> (u32, u32) {
    if wider_than_canvas(cw, ch, fw, fh) {
        (cw, scale_dim(fh, cw, fw).min(ch))
    } else {
        (scale_dim(fw, ch, fh).min(cw), ch)
    }
}

/// Signed offset that centers `inner` in `outer`.
pub fn center_offset(inner_w: u32, inner_h: u32, outer_w: u32, outer_h: u32) -> (i64, i64) {
    let ox = (i64::from(outer_w) - i64::from(inner_w)).div_euclid(2);
    let oy = (i64::from(outer_h) - i64::from(inner_h)).div_euclid(2);
    (ox, oy)
}
