//! Pixel operations for exported frames.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageBuffer, Pixel};

use crate::edit::{ColorFilter, ImageTransform};
use crate::error::CoreError;

/// Apply `transform` in its fixed order: crop, resize, color, filter.
///
/// An identity transform returns the input untouched, pixel for pixel.
pub fn apply_transform(img: &DynamicImage, transform: &ImageTransform) -> Result<DynamicImage, CoreError> {
    if transform.is_identity() {
        return Ok(img.clone());
    }

    let mut out = img.clone();

    if let Some(crop) = transform.crop {
        let (w, h) = out.dimensions();
        let fits = crop.width > 0
            && crop.height > 0
            && crop.x.checked_add(crop.width).is_some_and(|r| r <= w)
            && crop.y.checked_add(crop.height).is_some_and(|b| b <= h);
        if !fits {
            return Err(CoreError::Validation(format!(
                "crop {}x{}+{}+{} exceeds a {w}x{h} frame",
                crop.width, crop.height, crop.x, crop.y
            )));
        }
        out = out.crop_imm(crop.x, crop.y, crop.width, crop.height);
    }

    if let Some(size) = transform.resize {
        if size.width == 0 || size.height == 0 {
            return Err(CoreError::Validation("resize target must be non-empty".to_string()));
        }
        out = out.resize_exact(size.width, size.height, FilterType::Triangle);
    }

    if let Some(color) = transform.color {
        if color.brightness != 0 {
            out = out.brighten(color.brightness);
        }
        if color.contrast != 0.0 {
            out = out.adjust_contrast(color.contrast);
        }
    }

    match transform.filter {
        Some(ColorFilter::Grayscale) => out = out.grayscale(),
        Some(ColorFilter::Invert) => out.invert(),
        None => {}
    }

    Ok(out)
}

/// Pixel blend of two equally sized frames; `factor` 0.0 is all `before`.
///
/// The result has `before`'s pixel format; `after` is converted to it first.
pub fn blend_frames(before: &DynamicImage, after: &DynamicImage, factor: f64) -> Result<DynamicImage, CoreError> {
    if before.dimensions() != after.dimensions() {
        let (bw, bh) = before.dimensions();
        let (aw, ah) = after.dimensions();
        return Err(CoreError::Validation(format!(
            "cannot blend a {bw}x{bh} frame with a {aw}x{ah} frame"
        )));
    }
    let t = factor.clamp(0.0, 1.0);
    let int = |max: f64| move |x: f64, y: f64| (x + (y - x) * t).round().clamp(0.0, max);
    let u8_mix = |x: u8, y: u8| int(255.0)(x as f64, y as f64) as u8;
    let u16_mix = |x: u16, y: u16| int(65535.0)(x as f64, y as f64) as u16;
    let f32_mix = |x: f32, y: f32| (x as f64 + (y as f64 - x as f64) * t) as f32;

    let out = match before {
        DynamicImage::ImageLuma8(a) => DynamicImage::ImageLuma8(mix(a, &after.to_luma8(), u8_mix)),
        DynamicImage::ImageLumaA8(a) => DynamicImage::ImageLumaA8(mix(a, &after.to_luma_alpha8(), u8_mix)),
        DynamicImage::ImageRgb8(a) => DynamicImage::ImageRgb8(mix(a, &after.to_rgb8(), u8_mix)),
        DynamicImage::ImageRgba8(a) => DynamicImage::ImageRgba8(mix(a, &after.to_rgba8(), u8_mix)),
        DynamicImage::ImageLuma16(a) => DynamicImage::ImageLuma16(mix(a, &after.to_luma16(), u16_mix)),
        DynamicImage::ImageLumaA16(a) => DynamicImage::ImageLumaA16(mix(a, &after.to_luma_alpha16(), u16_mix)),
        DynamicImage::ImageRgb16(a) => DynamicImage::ImageRgb16(mix(a, &after.to_rgb16(), u16_mix)),
        DynamicImage::ImageRgba16(a) => DynamicImage::ImageRgba16(mix(a, &after.to_rgba16(), u16_mix)),
        DynamicImage::ImageRgb32F(a) => DynamicImage::ImageRgb32F(mix(a, &after.to_rgb32f(), f32_mix)),
        other => DynamicImage::ImageRgba32F(mix(&other.to_rgba32f(), &after.to_rgba32f(), f32_mix)),
    };
    Ok(out)
}

/// Channel-wise blend of two buffers with identical layout.
fn mix<P: Pixel>(
    a: &ImageBuffer<P, Vec<P::Subpixel>>,
    b: &ImageBuffer<P, Vec<P::Subpixel>>,
    lerp: impl Fn(P::Subpixel, P::Subpixel) -> P::Subpixel,
) -> ImageBuffer<P, Vec<P::Subpixel>> {
    let mut out = a.clone();
    for (o, &s) in out.iter_mut().zip(b.as_raw().iter()) {
        *o = lerp(*o, s);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::{ColorAdjustment, CropRect, ResizeTarget};
    use assert_matches::assert_matches;
    use image::{ColorType, Luma, Rgb, Rgba};

    fn solid(w: u32, h: u32, v: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(w, h, Rgb([v, v, v])))
    }

    /// 4x2 image whose red channel encodes the x coordinate.
    fn gradient() -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_fn(4, 2, |x, y| Rgb([x as u8 * 10, y as u8, 0])))
    }

    #[test]
    fn identity_is_unchanged() {
        let img = gradient();
        let out = apply_transform(&img, &ImageTransform::default()).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn crop_selects_region() {
        let t = ImageTransform {
            crop: Some(CropRect { x: 1, y: 0, width: 2, height: 2 }),
            ..ImageTransform::default()
        };
        let out = apply_transform(&gradient(), &t).unwrap().to_rgb8();
        assert_eq!(out.dimensions(), (2, 2));
        assert_eq!(out.get_pixel(0, 0).0[0], 10);
        assert_eq!(out.get_pixel(1, 1).0, [20, 1, 0]);
    }

    #[test]
    fn crop_outside_frame_rejected() {
        let t = ImageTransform {
            crop: Some(CropRect { x: 3, y: 0, width: 2, height: 1 }),
            ..ImageTransform::default()
        };
        assert_matches!(apply_transform(&gradient(), &t), Err(CoreError::Validation(_)));
    }

    #[test]
    fn crop_runs_before_resize() {
        let t = ImageTransform {
            crop: Some(CropRect { x: 0, y: 0, width: 2, height: 2 }),
            resize: Some(ResizeTarget { width: 8, height: 8 }),
            ..ImageTransform::default()
        };
        let out = apply_transform(&solid(4, 4, 50), &t).unwrap();
        assert_eq!(out.dimensions(), (8, 8));
    }

    #[test]
    fn brightness_and_invert() {
        let t = ImageTransform {
            color: Some(ColorAdjustment { brightness: 20, contrast: 0.0 }),
            filter: Some(ColorFilter::Invert),
            ..ImageTransform::default()
        };
        let out = apply_transform(&solid(2, 2, 100), &t).unwrap().to_rgb8();
        assert_eq!(out.get_pixel(0, 0).0, [135, 135, 135]);
    }

    #[test]
    fn grayscale_keeps_size() {
        let t = ImageTransform { filter: Some(ColorFilter::Grayscale), ..ImageTransform::default() };
        let out = apply_transform(&gradient(), &t).unwrap();
        assert_eq!(out.dimensions(), (4, 2));
    }

    #[test]
    fn blend_endpoints_and_midpoint() {
        let a = solid(2, 2, 0);
        let b = solid(2, 2, 200);
        assert_eq!(blend_frames(&a, &b, 0.0).unwrap().to_rgb8().get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(blend_frames(&a, &b, 1.0).unwrap().to_rgb8().get_pixel(0, 0).0, [200, 200, 200]);
        assert_eq!(blend_frames(&a, &b, 0.25).unwrap().to_rgb8().get_pixel(1, 1).0, [50, 50, 50]);
    }

    #[test]
    fn blend_keeps_alpha_and_format() {
        let a = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(2, 2, Rgba([0, 0, 0, 255])));
        let b = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(2, 2, Rgba([100, 200, 50, 55])));
        let out = blend_frames(&a, &b, 0.5).unwrap();
        assert_eq!(out.color(), ColorType::Rgba8);
        assert_eq!(out.to_rgba8().get_pixel(0, 0).0, [50, 100, 25, 155]);
    }

    #[test]
    fn blend_keeps_sixteen_bit_precision() {
        let a = DynamicImage::ImageLuma16(ImageBuffer::from_pixel(1, 1, Luma([1000u16])));
        let b = DynamicImage::ImageLuma16(ImageBuffer::from_pixel(1, 1, Luma([1003u16])));
        let out = blend_frames(&a, &b, 1.0 / 3.0).unwrap();
        assert_eq!(out.color(), ColorType::L16);
        assert_eq!(out.to_luma16().get_pixel(0, 0).0, [1001]);
    }

    #[test]
    fn blend_converts_after_to_before_format() {
        let a = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(1, 1, Luma([0u8])));
        let b = solid(1, 1, 100);
        let out = blend_frames(&a, &b, 0.5).unwrap();
        assert_eq!(out.color(), ColorType::L8);
        assert_eq!(out.to_luma8().get_pixel(0, 0).0, [50]);
    }

    #[test]
    fn blend_requires_matching_size() {
        assert_matches!(
            blend_frames(&solid(2, 2, 0), &solid(3, 2, 0), 0.5),
            Err(CoreError::Validation(_))
        );
    }
}
