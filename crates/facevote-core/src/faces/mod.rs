#[cfg(feature = "opencv")]
pub mod cascade;
pub mod comparer;
pub mod detector;
pub mod embedding;
pub mod encoding;
pub mod enrollment;
pub mod handcrafted;
pub mod preprocess;
pub mod quality;
pub mod seeta;
pub mod store;

#[cfg(feature = "opencv")]
pub use cascade::CascadeDetector;

pub use comparer::{
    cosine_distance, euclidean_distance, normalized_distance, scaled_euclidean_distance, verify,
    VerificationResult,
};

pub use detector::{
    largest_face, open_eye_detector, open_face_detector, DetectorBackend, DetectorParams, FaceBox,
    RegionDetector,
};

pub use embedding::{
    open_backend, DeepEncoder, EmbeddingModelConfig, EmbeddingModelPaths, EnvModelPathResolver,
    FaceEmbeddingBackend, ModelPathResolver,
};

pub use encoding::{DistanceMetric, EncodingStrategy, FaceEncoding, FeatureEncoder};

pub use enrollment::{
    run_face_enrollment_with, run_face_removal_with, validate_identity, EnrollmentCandidate,
    EnrollmentRecord, FaceEnrollmentConfig, FaceEnrollmentOutcome, FaceRemovalConfig,
    FaceRemovalOutcome,
};

pub use handcrafted::{HandcraftedEncoder, HANDCRAFTED_DIMENSION};

pub use preprocess::PreprocessParams;

pub use quality::{QualityAssessor, QualityIssue, QualityReport, QualityThresholds};

pub use seeta::SeetaFaceDetector;

pub use store::{
    identity_store_path, load_enrolled_encodings, EnrolledEncoding, EnrollmentStore,
    EnvStoreDirResolver, FilesystemEnrollmentStore, IdentityLock, LockMode, StoreDirResolver,
};
