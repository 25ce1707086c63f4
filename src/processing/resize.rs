use fast_image_resize as fir;

use crate::error::Error;
use crate::media::NativeImage;

/// Resize a four-channel image with `fast_image_resize`.
pub fn resize_native(
    source: &NativeImage,
    target_w: u32,
    target_h: u32,
    filter: fir::FilterType,
) -> Result<NativeImage, Error> {
    if target_w == 0 || target_h == 0 {
        return Err(Error::Transform("resize dimensions must be positive".into()));
    }
    if source.width() == target_w && source.height() == target_h {
        return Ok(source.clone());
    }

    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .map_err(|err| Error::Transform(format!("invalid resize source: {err}")))?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(filter));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .map_err(|err| Error::Transform(format!("resize failed: {err}")))?;
    NativeImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| Error::Transform("resized buffer has the wrong length".into()))
}
