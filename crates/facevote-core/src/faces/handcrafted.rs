//! Handcrafted 128-value face descriptor.
//!
//! Layout of the raw vector before normalisation:
//!
//! | range     | content                                              |
//! |-----------|------------------------------------------------------|
//! | `0..32`   | 2-bin intensity histogram for each cell of a 4x4 grid |
//! | `32..96`  | 8-neighbour binary patterns sampled every 8 px        |
//! | `96..128` | Sobel magnitude mean and std for each grid cell       |

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use imageproc::contrast::equalize_histogram;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

use crate::errors::{AppError, AppResult};
use crate::faces::detector::{to_gray, FaceBox};
use crate::faces::encoding::{EncodingStrategy, FaceEncoding, FeatureEncoder};

pub const HANDCRAFTED_DIMENSION: usize = 128;

const PATCH_SIDE: u32 = 128;
const GRID: u32 = 4;
const CELL: u32 = PATCH_SIDE / GRID;
const LBP_STEP: u32 = 8;
const LBP_FEATURES: usize = 64;

/// Clockwise from the top-left neighbour; bit `i` is set when neighbour `i`
/// is at least as bright as the centre.
const LBP_NEIGHBOURS: [(i32, i32); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct HandcraftedEncoder;

impl HandcraftedEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Canonical 128x128 equalised grayscale patch for a face box.
    pub fn normalized_patch(image: &RgbImage, face: FaceBox) -> AppResult<GrayImage> {
        let (width, height) = image.dimensions();
        let face = face.clamp_to(width, height).ok_or_else(|| {
            AppError::EncodingFailed(format!(
                "face box {face:?} lies outside the {width}x{height} image"
            ))
        })?;

        let crop = imageops::crop_imm(image, face.x, face.y, face.width, face.height).to_image();
        let resized = imageops::resize(&to_gray(&crop), PATCH_SIDE, PATCH_SIDE, FilterType::Triangle);
        Ok(equalize_histogram(&resized))
    }

    pub fn describe(patch: &GrayImage) -> Vec<f64> {
        let mut features = Vec::with_capacity(HANDCRAFTED_DIMENSION);
        features.extend(regional_histograms(patch));
        features.extend(binary_patterns(patch));
        features.extend(gradient_statistics(patch));

        features.resize(HANDCRAFTED_DIMENSION, 0.0);
        l2_normalize(&mut features);
        features
    }
}

impl FeatureEncoder for HandcraftedEncoder {
    fn strategy(&self) -> EncodingStrategy {
        EncodingStrategy::Handcrafted
    }

    fn expected_dimension(&self) -> Option<usize> {
        Some(HANDCRAFTED_DIMENSION)
    }

    fn requires_quality_gate(&self) -> bool {
        false
    }

    fn encode(&self, image: &RgbImage, face: FaceBox) -> AppResult<FaceEncoding> {
        let patch = Self::normalized_patch(image, face)?;
        Ok(FaceEncoding::new(
            Self::describe(&patch),
            EncodingStrategy::Handcrafted,
        ))
    }
}

fn cells() -> impl Iterator<Item = (u32, u32)> {
    (0..GRID).flat_map(|row| (0..GRID).map(move |col| (row * CELL, col * CELL)))
}

fn regional_histograms(patch: &GrayImage) -> Vec<f64> {
    let mut features = Vec::with_capacity((GRID * GRID * 2) as usize);
    for (top, left) in cells() {
        let mut bins = [0f64; 2];
        for y in top..top + CELL {
            for x in left..left + CELL {
                let value = patch.get_pixel(x, y)[0];
                bins[usize::from(value >= 128)] += 1.0;
            }
        }
        features.extend(bins);
    }
    features
}

fn binary_patterns(patch: &GrayImage) -> Vec<f64> {
    let (width, height) = patch.dimensions();
    let mut features = Vec::with_capacity(LBP_FEATURES);

    'rows: for y in (LBP_STEP..height.saturating_sub(LBP_STEP)).step_by(LBP_STEP as usize) {
        for x in (LBP_STEP..width.saturating_sub(LBP_STEP)).step_by(LBP_STEP as usize) {
            let centre = patch.get_pixel(x, y)[0];
            let mut pattern = 0u32;
            for (bit, (dy, dx)) in LBP_NEIGHBOURS.iter().enumerate() {
                let ny = (y as i32 + dy) as u32;
                let nx = (x as i32 + dx) as u32;
                if patch.get_pixel(nx, ny)[0] >= centre {
                    pattern |= 1 << bit;
                }
            }
            features.push(f64::from(pattern) / 255.0);
            if features.len() == LBP_FEATURES {
                break 'rows;
            }
        }
    }

    features.resize(LBP_FEATURES, 0.0);
    features
}

fn gradient_statistics(patch: &GrayImage) -> Vec<f64> {
    let gx = horizontal_sobel(patch);
    let gy = vertical_sobel(patch);
    let magnitude = |x: u32, y: u32| {
        let h = f64::from(gx.get_pixel(x, y)[0]);
        let v = f64::from(gy.get_pixel(x, y)[0]);
        (h * h + v * v).sqrt()
    };

    let mut features = Vec::with_capacity((GRID * GRID * 2) as usize);
    for (top, left) in cells() {
        let values: Vec<f64> = (top..top + CELL)
            .flat_map(|y| (left..left + CELL).map(move |x| (x, y)))
            .map(|(x, y)| magnitude(x, y))
            .collect();
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        features.push(mean);
        features.push(variance.sqrt());
    }
    features
}

/// Scale to unit length; an all-zero vector is left untouched.
pub fn l2_normalize(values: &mut [f64]) {
    let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for value in values.iter_mut() {
            *value /= norm;
        }
    }
}
