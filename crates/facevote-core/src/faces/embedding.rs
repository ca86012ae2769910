//! Deep-embedding strategy.
//!
//! The network itself is an opaque backend: given an enhanced face crop it
//! returns a fixed-length vector. Backends are compiled in through the `dlib`
//! and `onnx` features; without either, asking for the deep strategy fails
//! with [`AppError::EmbeddingUnavailable`].

use std::env;
use std::path::PathBuf;

use image::RgbImage;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::faces::detector::FaceBox;
use crate::faces::encoding::{EncodingStrategy, FaceEncoding, FeatureEncoder};
use crate::faces::preprocess::{preprocess_face, PreprocessParams};

pub const EMBEDDING_MODEL_ENV: &str = "FACEVOTE_EMBEDDING_MODEL";
pub const LANDMARK_MODEL_ENV: &str = "FACEVOTE_LANDMARK_MODEL";

pub trait FaceEmbeddingBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Output length, when the backend knows it ahead of time.
    fn dimension(&self) -> Option<usize>;

    /// Embed a preprocessed crop. `Ok(None)` means the backend's own face
    /// check rejected the crop.
    fn embed(&self, crop: &RgbImage) -> AppResult<Option<Vec<f64>>>;
}

impl<B: FaceEmbeddingBackend + ?Sized> FaceEmbeddingBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn dimension(&self) -> Option<usize> {
        (**self).dimension()
    }

    fn embed(&self, crop: &RgbImage) -> AppResult<Option<Vec<f64>>> {
        (**self).embed(crop)
    }
}

pub struct DeepEncoder<B> {
    backend: B,
    preprocess: PreprocessParams,
}

impl<B: FaceEmbeddingBackend> DeepEncoder<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            preprocess: PreprocessParams::default(),
        }
    }

    pub fn with_preprocess(mut self, params: PreprocessParams) -> Self {
        self.preprocess = params;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: FaceEmbeddingBackend> FeatureEncoder for DeepEncoder<B> {
    fn strategy(&self) -> EncodingStrategy {
        EncodingStrategy::DeepEmbedding
    }

    fn expected_dimension(&self) -> Option<usize> {
        self.backend.dimension()
    }

    fn requires_quality_gate(&self) -> bool {
        true
    }

    fn encode(&self, image: &RgbImage, face: FaceBox) -> AppResult<FaceEncoding> {
        let crop = preprocess_face(image, face, &self.preprocess)?;
        debug!(
            backend = self.backend.name(),
            width = crop.width(),
            height = crop.height(),
            "running embedding backend"
        );

        let vector = match self.backend.embed(&crop) {
            Ok(Some(vector)) => vector,
            Ok(None) => return Err(AppError::NoFaceDetected),
            Err(err @ AppError::NoFaceDetected) | Err(err @ AppError::EncodingFailed(_)) => {
                return Err(err)
            }
            Err(other) => return Err(AppError::EncodingFailed(other.to_string())),
        };

        if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
            return Err(AppError::EncodingFailed(format!(
                "{} backend returned an unusable embedding",
                self.backend.name()
            )));
        }
        if let Some(expected) = self.backend.dimension() {
            if vector.len() != expected {
                return Err(AppError::EncodingFailed(format!(
                    "{} backend returned {} values, expected {expected}",
                    self.backend.name(),
                    vector.len()
                )));
            }
        }

        Ok(FaceEncoding::new(vector, EncodingStrategy::DeepEmbedding))
    }
}

/// Model files requested by flag or configuration; unset entries fall back
/// to the environment.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingModelConfig {
    pub model: Option<PathBuf>,
    pub landmark_model: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingModelPaths {
    pub model: PathBuf,
    pub landmark: Option<PathBuf>,
}

pub trait ModelPathResolver {
    fn resolve(&self, config: &EmbeddingModelConfig) -> AppResult<EmbeddingModelPaths>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvModelPathResolver;

impl ModelPathResolver for EnvModelPathResolver {
    fn resolve(&self, config: &EmbeddingModelConfig) -> AppResult<EmbeddingModelPaths> {
        let model = config
            .model
            .clone()
            .or_else(|| env::var(EMBEDDING_MODEL_ENV).ok().map(PathBuf::from))
            .ok_or(AppError::MissingModel {
                kind: "face embedding model",
                flag: "--embedding-model",
                env: EMBEDDING_MODEL_ENV,
            })?;
        let landmark = config
            .landmark_model
            .clone()
            .or_else(|| env::var(LANDMARK_MODEL_ENV).ok().map(PathBuf::from));
        Ok(EmbeddingModelPaths { model, landmark })
    }
}

/// Open whichever backend this build was compiled with. ONNX wins when both
/// features are enabled.
pub fn open_backend(paths: &EmbeddingModelPaths) -> AppResult<Box<dyn FaceEmbeddingBackend>> {
    #[cfg(feature = "onnx")]
    {
        return Ok(Box::new(onnx::OnnxBackend::open(&paths.model)?));
    }

    #[cfg(all(feature = "dlib", not(feature = "onnx")))]
    {
        let landmark = paths.landmark.as_ref().ok_or(AppError::MissingModel {
            kind: "landmark predictor",
            flag: "--landmark-model",
            env: LANDMARK_MODEL_ENV,
        })?;
        return Ok(Box::new(dlib::DlibBackend::open(landmark, &paths.model)?));
    }

    #[cfg(not(any(feature = "dlib", feature = "onnx")))]
    {
        let _ = paths;
        Err(AppError::EmbeddingUnavailable)
    }
}

pub fn backend_compiled_in() -> bool {
    cfg!(any(feature = "dlib", feature = "onnx"))
}

#[cfg(feature = "dlib")]
pub mod dlib {
    use std::path::Path;
    use std::sync::mpsc::{self, Sender};
    use std::sync::{Mutex, PoisonError};
    use std::thread;

    use dlib_face_recognition::{
        FaceDetector, FaceDetectorTrait, FaceEncoderNetwork, FaceEncoderTrait, ImageMatrix,
        LandmarkPredictor, LandmarkPredictorTrait,
    };
    use image::RgbImage;
    use tracing::debug;

    use super::FaceEmbeddingBackend;
    use crate::errors::{AppError, AppResult};

    struct Job {
        crop: RgbImage,
        reply: Sender<Option<Vec<f64>>>,
    }

    /// dlib ResNet face encoder (128 values) with its HOG detector and
    /// 68-point landmark alignment.
    ///
    /// The dlib handles are not thread-safe, so they live on one worker
    /// thread that owns them for their whole life; callers queue crops to it.
    pub struct DlibBackend {
        jobs: Mutex<Sender<Job>>,
    }

    impl DlibBackend {
        pub fn open(landmark: &Path, encoder: &Path) -> AppResult<Self> {
            let (jobs, queue) = mpsc::channel::<Job>();
            let (ready, opened) = mpsc::channel::<AppResult<()>>();
            let landmark = landmark.to_path_buf();
            let encoder = encoder.to_path_buf();

            thread::Builder::new()
                .name("dlib-encoder".into())
                .spawn(move || {
                    let models = match DlibModels::open(&landmark, &encoder) {
                        Ok(models) => models,
                        Err(err) => {
                            let _ = ready.send(Err(err));
                            return;
                        }
                    };
                    if ready.send(Ok(())).is_err() {
                        return;
                    }
                    // Ends once the backend, and with it the sender, is dropped.
                    for job in queue {
                        let _ = job.reply.send(models.embed(&job.crop));
                    }
                })?;

            opened.recv().map_err(|_| worker_stopped())??;
            Ok(Self {
                jobs: Mutex::new(jobs),
            })
        }
    }

    fn worker_stopped() -> AppError {
        AppError::EncodingFailed("dlib worker thread stopped".into())
    }

    struct DlibModels {
        detector: FaceDetector,
        predictor: LandmarkPredictor,
        encoder: FaceEncoderNetwork,
    }

    impl DlibModels {
        fn open(landmark: &Path, encoder: &Path) -> AppResult<Self> {
            debug!(path = %landmark.display(), "loading landmark model");
            let predictor = LandmarkPredictor::open(landmark).map_err(|message| {
                AppError::ModelLoad {
                    path: landmark.to_path_buf(),
                    message,
                }
            })?;
            debug!(path = %encoder.display(), "loading encoder model");
            let encoder_network = FaceEncoderNetwork::open(encoder).map_err(|message| {
                AppError::ModelLoad {
                    path: encoder.to_path_buf(),
                    message,
                }
            })?;

            Ok(Self {
                detector: FaceDetector::new(),
                predictor,
                encoder: encoder_network,
            })
        }

        fn embed(&self, crop: &RgbImage) -> Option<Vec<f64>> {
            let matrix = ImageMatrix::from_image(crop);
            let locations = self.detector.face_locations(&matrix);
            let rect = locations
                .iter()
                .max_by_key(|rect| (rect.right - rect.left) * (rect.bottom - rect.top))?;

            let landmarks = self.predictor.face_landmarks(&matrix, rect);
            let encodings = self.encoder.get_face_encodings(&matrix, &[landmarks], 0);
            encodings.iter().next().map(|encoding| encoding.as_ref().to_vec())
        }
    }

    impl FaceEmbeddingBackend for DlibBackend {
        fn name(&self) -> &'static str {
            "dlib"
        }

        fn dimension(&self) -> Option<usize> {
            Some(128)
        }

        fn embed(&self, crop: &RgbImage) -> AppResult<Option<Vec<f64>>> {
            let (reply, answer) = mpsc::channel();
            self.jobs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .send(Job {
                    crop: crop.clone(),
                    reply,
                })
                .map_err(|_| worker_stopped())?;
            answer.recv().map_err(|_| worker_stopped())
        }
    }

}

#[cfg(feature = "onnx")]
pub mod onnx {
    use std::path::Path;

    use image::imageops::{self, FilterType};
    use image::RgbImage;
    use tract_onnx::prelude::*;
    use tracing::debug;

    use super::FaceEmbeddingBackend;
    use crate::errors::{AppError, AppResult};

    const INPUT_SIDE: usize = 112;

    /// ArcFace-style ONNX embedding network taking a 1x3x112x112 input
    /// normalised to `(pixel - 127.5) / 128`.
    pub struct OnnxBackend {
        model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    }

    impl OnnxBackend {
        pub fn open(path: &Path) -> AppResult<Self> {
            debug!(path = %path.display(), "loading onnx embedding model");
            let load_error = |err: TractError| AppError::ModelLoad {
                path: path.to_path_buf(),
                message: err.to_string(),
            };
            let model = tract_onnx::onnx()
                .model_for_path(path)
                .map_err(load_error)?
                .with_input_fact(
                    0,
                    InferenceFact::dt_shape(
                        f32::datum_type(),
                        tvec!(1, 3, INPUT_SIDE, INPUT_SIDE),
                    ),
                )
                .map_err(load_error)?
                .into_optimized()
                .map_err(load_error)?
                .into_runnable()
                .map_err(load_error)?;
            Ok(Self { model })
        }

        fn build_input(crop: &RgbImage) -> Tensor {
            let side = INPUT_SIDE as u32;
            let resized = imageops::resize(crop, side, side, FilterType::Triangle);
            tract_ndarray::Array4::from_shape_fn(
                (1, 3, INPUT_SIDE, INPUT_SIDE),
                |(_, channel, y, x)| {
                    let value = resized.get_pixel(x as u32, y as u32)[channel];
                    (f32::from(value) - 127.5) / 128.0
                },
            )
            .into_tensor()
        }
    }

    impl FaceEmbeddingBackend for OnnxBackend {
        fn name(&self) -> &'static str {
            "onnx"
        }

        fn dimension(&self) -> Option<usize> {
            None
        }

        fn embed(&self, crop: &RgbImage) -> AppResult<Option<Vec<f64>>> {
            let input = Self::build_input(crop);
            let outputs = self
                .model
                .run(tvec!(input.into()))
                .map_err(|err| AppError::EncodingFailed(format!("onnx inference failed: {err}")))?;
            let output = outputs
                .first()
                .ok_or_else(|| AppError::EncodingFailed("model produced no outputs".into()))?;
            let values = output.to_array_view::<f32>().map_err(|err| {
                AppError::EncodingFailed(format!("model output tensor was not f32: {err}"))
            })?;
            Ok(Some(values.iter().map(|v| f64::from(*v)).collect()))
        }
    }
}
