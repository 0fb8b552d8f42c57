use image::{GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;

use crate::errors::DetectError;

const SMOOTH_SIGMA: f32 = 2.0;
const BACKGROUND_SIGMA: f32 = 16.0;

/// Decode uploaded bytes into a single-channel intensity image.
pub fn decode_intensity(bytes: &[u8]) -> Result<GrayImage, DetectError> {
    let img =
        image::load_from_memory(bytes).map_err(|e| DetectError::InvalidImage(e.to_string()))?;
    if img.width() == 0 || img.height() == 0 {
        return Err(DetectError::InvalidImage(
            "image has zero width or height".to_string(),
        ));
    }
    Ok(img.to_luma8())
}

/// Apply Gaussian blur to reduce sensor noise.
pub fn smooth(img: &GrayImage) -> GrayImage {
    gaussian_blur_f32(img, SMOOTH_SIGMA)
}

/// Compensate uneven illumination: subtract a wide Gaussian background
/// estimate and re-center the result at mid-gray. Local contrast survives,
/// slow lighting gradients do not.
pub fn flatten_illumination(img: &GrayImage) -> GrayImage {
    let background = gaussian_blur_f32(img, BACKGROUND_SIGMA);
    let mut out = GrayImage::new(img.width(), img.height());
    for (x, y, pixel) in img.enumerate_pixels() {
        let bg = background.get_pixel(x, y)[0] as i16;
        let v = (128 + pixel[0] as i16 - bg).clamp(0, 255) as u8;
        out.put_pixel(x, y, Luma([v]));
    }
    out
}

/// Full preprocessing chain: decode, smooth, flatten. Deterministic for
/// identical input bytes.
pub fn preprocess(bytes: &[u8]) -> Result<GrayImage, DetectError> {
    let gray = decode_intensity(bytes)?;
    Ok(flatten_illumination(&smooth(&gray)))
}
