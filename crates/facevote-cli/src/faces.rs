use std::fs;
use std::path::{Path, PathBuf};

use facevote_core::codec::load_image;
use facevote_core::faces::detector::{FaceBox, RegionDetector};
use facevote_core::faces::encoding::{EncodingStrategy, FaceEncoding};
use facevote_core::faces::enrollment::{
    run_face_enrollment_with, run_face_removal_with, EnrollmentCandidate, FaceEnrollmentConfig,
    FaceEnrollmentOutcome, FaceRemovalConfig, FaceRemovalOutcome,
};
use facevote_core::faces::quality::QualityReport;
use facevote_core::faces::store::{
    load_enrolled_encodings, EnrollmentStore, EnvStoreDirResolver, FilesystemEnrollmentStore,
    StoreDirResolver,
};
use facevote_core::faces::VerificationResult;
use facevote_core::liveness::{BlinkHeuristic, BlinkOutcome, LivenessDetector, LivenessResult};
use facevote_core::pipeline::{AuthenticationOutcome, FacePipeline};
use serde::Serialize;

use crate::cli::{BlinkArgs, DetectArgs, EncodeArgs, EnrollArgs, ImageArgs, RemoveArgs, VerifyArgs};
use crate::config::{load_settings, resolve_store_dir};
use crate::errors::AppResult;
use crate::runtime::{build_pipeline, eye_detector, face_detector, liveness_detector};

#[derive(Debug, Serialize)]
pub struct EncodeOutcome {
    pub image: String,
    pub strategy: EncodingStrategy,
    pub dimension: usize,
    pub face: FaceBox,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityReport>,
    pub encoding: FaceEncoding,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip)]
    pub logs: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct QualityOutcome {
    pub image: String,
    pub report: QualityReport,
}

#[derive(Debug, Serialize)]
pub struct DetectOutcome {
    pub image: String,
    pub target: &'static str,
    pub regions: Vec<FaceBox>,
}

#[derive(Debug, Serialize)]
pub struct VerifyOutcome {
    pub identity: String,
    pub image: String,
    pub strategy: EncodingStrategy,
    pub threshold: f64,
    pub enrolled: usize,
    pub result: VerificationResult,
    #[serde(skip)]
    pub logs: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthenticateOutcome {
    pub identity: String,
    pub image: String,
    pub enrolled: usize,
    #[serde(flatten)]
    pub outcome: AuthenticationOutcome,
}

#[derive(Debug, Serialize)]
pub struct LivenessOutcome {
    pub image: String,
    pub providers: Vec<String>,
    pub result: LivenessResult,
}

#[derive(Debug, Serialize)]
pub struct BlinkReport {
    pub first: String,
    pub second: String,
    #[serde(flatten)]
    pub outcome: BlinkOutcome,
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

pub fn run_encode_with(pipeline: &FacePipeline, image: &Path, output: Option<&Path>) -> AppResult<EncodeOutcome> {
    let capture = load_image(image)?;
    let encoded = pipeline.encode(&capture)?;

    let mut logs = vec![format!(
        "Encoded face at ({}, {}) size {}x{} with {} strategy",
        encoded.face.x,
        encoded.face.y,
        encoded.face.width,
        encoded.face.height,
        encoded.encoding.strategy
    )];
    if let Some(report) = &encoded.quality {
        logs.push(format!("Quality score {:.2}: {}", report.score, report.reason));
    }

    let output_path = match output {
        Some(path) => {
            fs::write(path, serde_json::to_vec_pretty(&encoded.encoding)?)?;
            logs.push(format!("Encoding written to {}", path.display()));
            Some(display(path))
        }
        None => None,
    };

    Ok(EncodeOutcome {
        image: display(image),
        strategy: encoded.encoding.strategy,
        dimension: encoded.encoding.dimension(),
        face: encoded.face,
        quality: encoded.quality,
        encoding: encoded.encoding,
        output_path,
        logs,
    })
}

pub fn run_encode(args: &EncodeArgs) -> AppResult<EncodeOutcome> {
    let config = load_settings(&args.models)?;
    let pipeline = build_pipeline(&config)?;
    run_encode_with(&pipeline, &args.image, args.output.as_deref())
}

pub fn run_quality_with(pipeline: &FacePipeline, image: &Path) -> AppResult<QualityOutcome> {
    let capture = load_image(image)?;
    Ok(QualityOutcome {
        image: display(image),
        report: pipeline.assess_quality(&capture),
    })
}

pub fn run_quality(args: &ImageArgs) -> AppResult<QualityOutcome> {
    let config = load_settings(&args.models)?;
    let pipeline = build_pipeline(&config)?;
    run_quality_with(&pipeline, &args.image)
}

pub fn run_detect_with<D: RegionDetector + ?Sized>(
    detector: &D,
    image: &Path,
    target: &'static str,
) -> AppResult<DetectOutcome> {
    let capture = load_image(image)?;
    Ok(DetectOutcome {
        image: display(image),
        target,
        regions: detector.detect_rgb(&capture),
    })
}

pub fn run_detect(args: &DetectArgs) -> AppResult<DetectOutcome> {
    let config = load_settings(&args.models)?;
    if args.eyes {
        let detector = eye_detector(&config, args.eye_cascade.clone())?;
        run_detect_with(&detector, &args.image, "eye")
    } else {
        let detector = face_detector(&config)?;
        run_detect_with(&detector, &args.image, "face")
    }
}

pub fn run_verify_with<S, R>(
    pipeline: &FacePipeline,
    store: &S,
    resolver: &R,
    identity: &str,
    image: &Path,
    store_dir: Option<&Path>,
) -> AppResult<VerifyOutcome>
where
    S: EnrollmentStore,
    R: StoreDirResolver,
{
    let enrolled = load_enrolled_encodings(store, resolver, store_dir, identity)?;
    let capture = load_image(image)?;
    let probe = pipeline.encode(&capture)?;
    let result = pipeline.verify(&enrolled, Some(&probe.encoding));

    let threshold = pipeline.config().threshold_for(probe.encoding.strategy);
    let mut logs = vec![format!(
        "Compared against {} of {} enrolled encoding(s)",
        result.compared,
        enrolled.len()
    )];
    if result.skipped > 0 {
        logs.push(format!(
            "Skipped {} encoding(s) with a different strategy or dimension",
            result.skipped
        ));
    }

    Ok(VerifyOutcome {
        identity: identity.to_string(),
        image: display(image),
        strategy: probe.encoding.strategy,
        threshold,
        enrolled: enrolled.len(),
        result,
        logs,
    })
}

pub fn run_verify(args: &VerifyArgs) -> AppResult<VerifyOutcome> {
    let config = load_settings(&args.models)?;
    let pipeline = build_pipeline(&config)?;
    let store_dir = resolve_store_dir(args.store_dir.clone(), &config);
    run_verify_with(
        &pipeline,
        &FilesystemEnrollmentStore,
        &EnvStoreDirResolver,
        &args.identity,
        &args.image,
        store_dir.as_deref(),
    )
}

pub fn run_authenticate_with<S, R>(
    pipeline: &FacePipeline,
    store: &S,
    resolver: &R,
    identity: &str,
    image: &Path,
    store_dir: Option<&Path>,
) -> AppResult<AuthenticateOutcome>
where
    S: EnrollmentStore,
    R: StoreDirResolver,
{
    let enrolled = load_enrolled_encodings(store, resolver, store_dir, identity)?;
    let capture = load_image(image)?;
    let outcome = pipeline.authenticate(&capture, &enrolled)?;
    Ok(AuthenticateOutcome {
        identity: identity.to_string(),
        image: display(image),
        enrolled: enrolled.len(),
        outcome,
    })
}

pub fn run_authenticate(args: &VerifyArgs) -> AppResult<AuthenticateOutcome> {
    let config = load_settings(&args.models)?;
    let pipeline = build_pipeline(&config)?;
    let store_dir = resolve_store_dir(args.store_dir.clone(), &config);
    run_authenticate_with(
        &pipeline,
        &FilesystemEnrollmentStore,
        &EnvStoreDirResolver,
        &args.identity,
        &args.image,
        store_dir.as_deref(),
    )
}

pub fn run_enroll_with<S, R>(
    pipeline: &FacePipeline,
    store: &S,
    resolver: &R,
    identity: &str,
    images: &[PathBuf],
    store_dir: Option<PathBuf>,
) -> AppResult<FaceEnrollmentOutcome>
where
    S: EnrollmentStore,
    R: StoreDirResolver,
{
    let mut candidates = Vec::with_capacity(images.len());
    for image in images {
        let capture = load_image(image)?;
        let encoded = pipeline.encode(&capture)?;
        candidates.push(EnrollmentCandidate {
            encoding: encoded.encoding,
            face: Some(encoded.face),
            source: display(image),
        });
    }

    let config = FaceEnrollmentConfig {
        identity: identity.to_string(),
        candidates,
        store_dir,
    };
    Ok(run_face_enrollment_with(&config, store, resolver)?)
}

pub fn run_enroll(args: &EnrollArgs) -> AppResult<FaceEnrollmentOutcome> {
    let config = load_settings(&args.models)?;
    let pipeline = build_pipeline(&config)?;
    run_enroll_with(
        &pipeline,
        &FilesystemEnrollmentStore,
        &EnvStoreDirResolver,
        &args.identity,
        &args.images,
        resolve_store_dir(args.store_dir.clone(), &config),
    )
}

pub fn build_removal_config(args: &RemoveArgs, store_dir: Option<PathBuf>) -> FaceRemovalConfig {
    FaceRemovalConfig {
        identity: args.identity.clone(),
        encoding_ids: args.encoding_id.clone(),
        remove_all: args.all,
        store_dir,
    }
}

pub fn run_remove(args: &RemoveArgs) -> AppResult<FaceRemovalOutcome> {
    let config = load_settings(&Default::default())?;
    let removal = build_removal_config(args, resolve_store_dir(args.store_dir.clone(), &config));
    Ok(run_face_removal_with(
        &removal,
        &FilesystemEnrollmentStore,
        &EnvStoreDirResolver,
    )?)
}

pub fn run_liveness_with(detector: &LivenessDetector, image: &Path) -> AppResult<LivenessOutcome> {
    let capture = load_image(image)?;
    Ok(LivenessOutcome {
        image: display(image),
        providers: detector
            .provider_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
        result: detector.check(&capture),
    })
}

pub fn run_liveness(args: &ImageArgs) -> AppResult<LivenessOutcome> {
    let config = load_settings(&args.models)?;
    run_liveness_with(&liveness_detector(&config), &args.image)
}

pub fn run_blink_with<D: RegionDetector>(
    heuristic: &BlinkHeuristic<D>,
    first: &Path,
    second: &Path,
) -> AppResult<BlinkReport> {
    let first_frame = load_image(first)?;
    let second_frame = load_image(second)?;
    Ok(BlinkReport {
        first: display(first),
        second: display(second),
        outcome: heuristic.compare(&first_frame, &second_frame),
    })
}

pub fn run_blink(args: &BlinkArgs) -> AppResult<BlinkReport> {
    let config = load_settings(&Default::default())?;
    let heuristic = BlinkHeuristic::new(eye_detector(&config, args.eye_cascade.clone())?);
    run_blink_with(&heuristic, &args.first, &args.second)
}
