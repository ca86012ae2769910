//! Face verification core: detection, quality gating, encoding, matching,
//! enrollment storage and AI liveness checks.

pub mod codec;
pub mod errors;
pub mod faces;
pub mod liveness;
pub mod pipeline;

pub use errors::{AppError, AppResult};
pub use pipeline::{
    AuthenticationOutcome, EncodedFace, FacePipeline, FailureReason, PipelineConfig,
};
