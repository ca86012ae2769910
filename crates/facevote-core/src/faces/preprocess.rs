//! Crop enhancement applied before the deep-embedding network.

use image::imageops;
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::filter::median_filter;

use crate::errors::{AppError, AppResult};
use crate::faces::detector::FaceBox;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessParams {
    /// Margin added on every side, as a fraction of the face box's shorter side.
    pub margin_ratio: f64,
    pub clip_limit: f64,
    pub tile_grid: u32,
    /// Median window radius; `0` disables denoising.
    pub denoise_radius: u32,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            margin_ratio: 0.2,
            clip_limit: 2.0,
            tile_grid: 8,
            denoise_radius: 1,
        }
    }
}

/// Margin crop, CLAHE on luminance, then median denoise.
pub fn preprocess_face(
    image: &RgbImage,
    face: FaceBox,
    params: &PreprocessParams,
) -> AppResult<RgbImage> {
    let (crop, _) = margin_crop(image, face, params.margin_ratio)?;
    let enhanced = equalize_luminance(&crop, params.clip_limit, params.tile_grid);
    Ok(denoise(&enhanced, params.denoise_radius))
}

/// Grow `face` by `ratio * min(width, height)` on each side, clipped to the image.
pub fn margin_crop(image: &RgbImage, face: FaceBox, ratio: f64) -> AppResult<(RgbImage, FaceBox)> {
    let (width, height) = image.dimensions();
    let face = face.clamp_to(width, height).ok_or_else(|| {
        AppError::EncodingFailed(format!(
            "face box {face:?} lies outside the {width}x{height} image"
        ))
    })?;

    let margin = (ratio * f64::from(face.width.min(face.height))) as u32;
    let x0 = face.x.saturating_sub(margin);
    let y0 = face.y.saturating_sub(margin);
    let x1 = (face.x + face.width + margin).min(width);
    let y1 = (face.y + face.height + margin).min(height);
    let region = FaceBox::new(x0, y0, x1 - x0, y1 - y0);

    let crop = imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image();
    Ok((crop, region))
}

/// CLAHE on the luma channel; chroma is preserved by shifting every channel
/// by the luma change.
pub fn equalize_luminance(image: &RgbImage, clip_limit: f64, tile_grid: u32) -> RgbImage {
    let luma = |p: &Rgb<u8>| {
        0.299 * f64::from(p[0]) + 0.587 * f64::from(p[1]) + 0.114 * f64::from(p[2])
    };
    let gray = GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([luma(image.get_pixel(x, y)).round().clamp(0.0, 255.0) as u8])
    });
    let equalized = clahe(&gray, clip_limit, tile_grid);

    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let pixel = image.get_pixel(x, y);
        let delta = f64::from(equalized.get_pixel(x, y)[0]) - luma(pixel);
        Rgb(pixel.0.map(|c| (f64::from(c) + delta).round().clamp(0.0, 255.0) as u8))
    })
}

/// Contrast-limited adaptive histogram equalisation over a `grid`x`grid` tiling.
pub fn clahe(gray: &GrayImage, clip_limit: f64, grid: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    let tile_width = width.div_ceil(grid.clamp(1, width));
    let tile_height = height.div_ceil(grid.clamp(1, height));
    let tiles_x = width.div_ceil(tile_width);
    let tiles_y = height.div_ceil(tile_height);

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_width;
            let y0 = ty * tile_height;
            let x1 = (x0 + tile_width).min(width);
            let y1 = (y0 + tile_height).min(height);
            let mut histogram = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    histogram[usize::from(gray.get_pixel(x, y)[0])] += 1;
                }
            }
            luts.push(clipped_lut(histogram, (x1 - x0) * (y1 - y0), clip_limit));
        }
    }

    let lut = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];
    let inv_tw = 1.0 / f64::from(tile_width);
    let inv_th = 1.0 / f64::from(tile_height);

    GrayImage::from_fn(width, height, |x, y| {
        let fx = f64::from(x) * inv_tw - 0.5;
        let fy = f64::from(y) * inv_th - 0.5;
        let (left, ax) = (fx.floor(), fx - fx.floor());
        let (top, ay) = (fy.floor(), fy - fy.floor());
        let tx0 = (left.max(0.0) as u32).min(tiles_x - 1);
        let tx1 = ((left + 1.0).max(0.0) as u32).min(tiles_x - 1);
        let ty0 = (top.max(0.0) as u32).min(tiles_y - 1);
        let ty1 = ((top + 1.0).max(0.0) as u32).min(tiles_y - 1);

        let v = usize::from(gray.get_pixel(x, y)[0]);
        let sample = |tx, ty| f64::from(lut(tx, ty)[v]);
        let value = (sample(tx0, ty0) * (1.0 - ax) + sample(tx1, ty0) * ax) * (1.0 - ay)
            + (sample(tx0, ty1) * (1.0 - ax) + sample(tx1, ty1) * ax) * ay;
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

fn clipped_lut(mut histogram: [u32; 256], area: u32, clip_limit: f64) -> [u8; 256] {
    if clip_limit > 0.0 {
        let limit = ((clip_limit * f64::from(area) / 256.0) as u32).max(1);
        let mut excess = 0u32;
        for bin in histogram.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }

        let batch = excess / 256;
        let mut residual = excess % 256;
        for bin in histogram.iter_mut() {
            *bin += batch;
        }
        if residual > 0 {
            let step = (256 / residual).max(1) as usize;
            for bin in histogram.iter_mut().step_by(step) {
                if residual == 0 {
                    break;
                }
                *bin += 1;
                residual -= 1;
            }
        }
    }

    let scale = 255.0 / f64::from(area.max(1));
    let mut lut = [0u8; 256];
    let mut cumulative = 0u32;
    for (entry, count) in lut.iter_mut().zip(histogram) {
        cumulative += count;
        *entry = (f64::from(cumulative) * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

pub fn denoise(image: &RgbImage, radius: u32) -> RgbImage {
    if radius == 0 {
        return image.clone();
    }
    median_filter(image, radius, radius)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_is_twenty_percent_of_shorter_side() {
        let image = RgbImage::new(400, 400);
        let (crop, region) = margin_crop(&image, FaceBox::new(100, 100, 100, 150), 0.2).unwrap();
        assert_eq!(region, FaceBox::new(80, 80, 140, 190));
        assert_eq!(crop.dimensions(), (140, 190));
    }

    #[test]
    fn margin_is_clipped_at_image_border() {
        let image = RgbImage::new(120, 120);
        let (_, region) = margin_crop(&image, FaceBox::new(5, 5, 110, 110), 0.2).unwrap();
        assert_eq!(region, FaceBox::new(0, 0, 120, 120));
    }

    #[test]
    fn clahe_stretches_low_contrast_input() {
        let gray = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x % 8) as u8]));
        let out = clahe(&gray, 2.0, 8);
        let (min, max) = out
            .pixels()
            .fold((255u8, 0u8), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
        assert!(max - min > 7, "range {min}..{max}");
    }

    #[test]
    fn clahe_handles_images_smaller_than_grid() {
        let gray = GrayImage::from_pixel(3, 5, Luma([42]));
        assert_eq!(clahe(&gray, 2.0, 8).dimensions(), (3, 5));
    }

    #[test]
    fn luminance_equalisation_keeps_gray_pixels_gray() {
        let image = RgbImage::from_fn(32, 32, |x, y| {
            let v = (90 + (x + y) % 20) as u8;
            Rgb([v, v, v])
        });
        let out = equalize_luminance(&image, 2.0, 8);
        assert!(out.pixels().all(|p| p[0] == p[1] && p[1] == p[2]));
    }

    #[test]
    fn preprocess_outputs_margin_crop_dimensions() {
        let image = RgbImage::from_fn(300, 300, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
        let out = preprocess_face(&image, FaceBox::new(100, 100, 100, 100), &PreprocessParams::default())
            .unwrap();
        assert_eq!(out.dimensions(), (140, 140));
    }
}
