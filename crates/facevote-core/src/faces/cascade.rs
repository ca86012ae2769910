//! OpenCV Haar cascades (`haarcascade_frontalface_default.xml`,
//! `haarcascade_eye.xml`) run through `CascadeClassifier::detect_multi_scale`.

use std::io::Cursor;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use image::{GrayImage, ImageFormat};
use opencv::core::{Size, Vector};
use opencv::objdetect::{CascadeClassifier, CASCADE_SCALE_IMAGE};
use opencv::prelude::*;
use opencv::{imgcodecs, types::VectorOfRect};
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::faces::detector::{DetectorParams, FaceBox, RegionDetector};

/// `detect_multi_scale` needs `&mut self`, so the classifier sits behind a
/// mutex to keep the detector shareable.
pub struct CascadeDetector {
    classifier: Mutex<CascadeClassifier>,
    params: DetectorParams,
}

impl CascadeDetector {
    pub fn open(path: &Path, params: DetectorParams) -> AppResult<Self> {
        debug!(path = %path.display(), "loading haar cascade");
        let name = path.to_str().ok_or_else(|| AppError::ModelLoad {
            path: path.to_path_buf(),
            message: "path is not valid UTF-8".into(),
        })?;
        if !path.is_file() {
            return Err(AppError::ModelLoad {
                path: path.to_path_buf(),
                message: "file not found".into(),
            });
        }

        let format_error = |message: String| AppError::CascadeFormat {
            path: path.to_path_buf(),
            message,
        };
        let classifier = CascadeClassifier::new(name).map_err(|err| format_error(err.to_string()))?;
        // OpenCV reports a file it cannot parse as an empty classifier.
        if classifier.empty().map_err(|err| format_error(err.to_string()))? {
            return Err(format_error("OpenCV could not load a cascade from this file".into()));
        }

        Ok(Self {
            classifier: Mutex::new(classifier),
            params,
        })
    }

    pub fn faces(path: &Path) -> AppResult<Self> {
        Self::open(path, DetectorParams::FACE)
    }

    pub fn eyes(path: &Path) -> AppResult<Self> {
        Self::open(path, DetectorParams::EYE)
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    fn scan(&self, gray: &GrayImage) -> Result<Vec<FaceBox>, String> {
        let mut bmp = Vec::new();
        gray.write_to(&mut Cursor::new(&mut bmp), ImageFormat::Bmp)
            .map_err(|err| err.to_string())?;
        let mat = imgcodecs::imdecode(&Vector::from_slice(&bmp), imgcodecs::IMREAD_GRAYSCALE)
            .map_err(|err| err.to_string())?;

        let (min_width, min_height) = self.params.min_size;
        let mut rects = VectorOfRect::new();
        self.classifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .detect_multi_scale(
                &mat,
                &mut rects,
                self.params.scale_factor,
                i32::try_from(self.params.min_neighbors).unwrap_or(i32::MAX),
                CASCADE_SCALE_IMAGE,
                Size::new(to_i32(min_width), to_i32(min_height)),
                Size::new(0, 0),
            )
            .map_err(|err| err.to_string())?;

        let (width, height) = gray.dimensions();
        Ok(rects
            .iter()
            .filter_map(|rect| {
                FaceBox::from_signed(rect.x, rect.y, rect.width, rect.height, width, height)
            })
            .collect())
    }
}

impl RegionDetector for CascadeDetector {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceBox> {
        self.scan(gray).unwrap_or_else(|message| {
            warn!(error = %message, "haar cascade detection failed");
            Vec::new()
        })
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
