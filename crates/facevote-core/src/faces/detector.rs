use std::path::Path;

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::errors::AppResult;

/// Axis-aligned face (or eye) rectangle in image pixel coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Clip the box to an image of the given size; `None` if nothing remains.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<FaceBox> {
        if self.x >= image_width || self.y >= image_height {
            return None;
        }
        let width = self.width.min(image_width - self.x);
        let height = self.height.min(image_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(FaceBox::new(self.x, self.y, width, height))
    }

    /// Detectors report signed rectangles that may start left of or above
    /// the frame; trim them to the image.
    pub fn from_signed(
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        image_width: u32,
        image_height: u32,
    ) -> Option<FaceBox> {
        let left = i64::from(x).max(0);
        let top = i64::from(y).max(0);
        let right = i64::from(x) + i64::from(width);
        let bottom = i64::from(y) + i64::from(height);
        if right <= left || bottom <= top {
            return None;
        }
        let as_u32 = |value: i64| u32::try_from(value).unwrap_or(u32::MAX);
        FaceBox::new(
            as_u32(left),
            as_u32(top),
            as_u32(right - left),
            as_u32(bottom - top),
        )
        .clamp_to(image_width, image_height)
    }
}

/// Tuning for a multi-scale sliding-window detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorParams {
    pub scale_factor: f64,
    pub min_neighbors: usize,
    pub min_size: (u32, u32),
}

impl DetectorParams {
    /// Frontal-face tuning used by enrollment and verification.
    pub const FACE: DetectorParams = DetectorParams {
        scale_factor: 1.1,
        min_neighbors: 5,
        min_size: (30, 30),
    };

    /// Eye tuning; the classic cascade defaults with no minimum size.
    pub const EYE: DetectorParams = DetectorParams {
        scale_factor: 1.1,
        min_neighbors: 3,
        min_size: (0, 0),
    };
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self::FACE
    }
}

/// Locates candidate regions in a grayscale frame.
///
/// Implementations hold only immutable model state so one instance can be
/// shared by concurrent requests.
pub trait RegionDetector: Send + Sync {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceBox>;

    fn detect_rgb(&self, image: &RgbImage) -> Vec<FaceBox> {
        self.detect(&to_gray(image))
    }
}

impl<D: RegionDetector + ?Sized> RegionDetector for &D {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceBox> {
        (**self).detect(gray)
    }
}

impl<D: RegionDetector + ?Sized> RegionDetector for Box<D> {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceBox> {
        (**self).detect(gray)
    }
}

impl<D: RegionDetector + ?Sized> RegionDetector for std::sync::Arc<D> {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceBox> {
        (**self).detect(gray)
    }
}

pub fn to_gray(image: &RgbImage) -> GrayImage {
    image::imageops::grayscale(image)
}

/// Downstream stages work on exactly one face: the one with the largest area.
/// Ties go to the box the detector reported first.
pub fn largest_face(faces: &[FaceBox]) -> Option<FaceBox> {
    faces.iter().copied().fold(None, |best, face| match best {
        Some(current) if current.area() >= face.area() => Some(current),
        _ => Some(face),
    })
}

/// Face detection engine compiled into this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorBackend {
    /// OpenCV `CascadeClassifier` with Haar cascade XML files.
    HaarCascade,
    /// `rustface` with a SeetaFace model.
    SeetaFace,
}

impl DetectorBackend {
    pub fn compiled() -> Self {
        if cfg!(feature = "opencv") {
            Self::HaarCascade
        } else {
            Self::SeetaFace
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::HaarCascade => "haar cascade",
            Self::SeetaFace => "seetaface",
        }
    }

    /// Eye detection for blink checks needs the eye cascade.
    pub fn detects_eyes(self) -> bool {
        matches!(self, Self::HaarCascade)
    }
}

/// Opens the compiled face detector; `path` is a Haar cascade XML file or a
/// SeetaFace model depending on [`DetectorBackend::compiled`].
pub fn open_face_detector(path: &Path) -> AppResult<Box<dyn RegionDetector>> {
    #[cfg(feature = "opencv")]
    {
        return Ok(Box::new(crate::faces::cascade::CascadeDetector::faces(path)?));
    }

    #[cfg(not(feature = "opencv"))]
    {
        Ok(Box::new(crate::faces::seeta::SeetaFaceDetector::open(path)?))
    }
}

pub fn open_eye_detector(path: &Path) -> AppResult<Box<dyn RegionDetector>> {
    #[cfg(feature = "opencv")]
    {
        return Ok(Box::new(crate::faces::cascade::CascadeDetector::eyes(path)?));
    }

    #[cfg(not(feature = "opencv"))]
    {
        let _ = path;
        Err(crate::errors::AppError::EyeDetectionUnavailable)
    }
}
