//! SeetaFace frontal detector via `rustface`, used when the build has no
//! OpenCV cascades.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::GrayImage;
use rustface::ImageData;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::faces::detector::{DetectorParams, FaceBox, RegionDetector};

const SCORE_THRESHOLD: f64 = 2.0;
const WINDOW_STEP: u32 = 4;
// rustface refuses anything smaller.
const MIN_FACE_SIZE: u32 = 20;

pub struct SeetaFaceDetector {
    model: rustface::Model,
    params: DetectorParams,
}

impl SeetaFaceDetector {
    /// Reads a `seeta_fd_frontal_v1.0.bin` model.
    pub fn open(path: &Path) -> AppResult<Self> {
        debug!(path = %path.display(), "loading seetaface model");
        let model_error = |message: String| AppError::ModelLoad {
            path: path.to_path_buf(),
            message,
        };
        let file = File::open(path).map_err(|err| model_error(err.to_string()))?;
        let model =
            rustface::read_model(BufReader::new(file)).map_err(|err| model_error(err.to_string()))?;
        Ok(Self {
            model,
            params: DetectorParams::FACE,
        })
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }
}

impl RegionDetector for SeetaFaceDetector {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceBox> {
        // Detectors carry per-call scratch state; the model is shared.
        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.params.min_size.0.max(MIN_FACE_SIZE));
        detector.set_score_thresh(SCORE_THRESHOLD);
        detector.set_pyramid_scale_factor(pyramid_scale(self.params.scale_factor));
        detector.set_slide_window_step(WINDOW_STEP, WINDOW_STEP);

        let (width, height) = gray.dimensions();
        detector
            .detect(&ImageData::new(gray.as_raw(), width, height))
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                let to_i32 = |value: u32| i32::try_from(value).unwrap_or(i32::MAX);
                FaceBox::from_signed(
                    bbox.x(),
                    bbox.y(),
                    to_i32(bbox.width()),
                    to_i32(bbox.height()),
                    width,
                    height,
                )
            })
            .collect()
    }
}

/// SeetaFace shrinks the image by this factor per pyramid level, the inverse
/// of a cascade's window growth.
fn pyramid_scale(scale_factor: f64) -> f32 {
    if scale_factor > 1.0 {
        (1.0 / scale_factor) as f32
    } else {
        0.8
    }
}
