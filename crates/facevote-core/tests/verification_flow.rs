use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use facevote_core::errors::AppResult;
use facevote_core::faces::detector::{FaceBox, RegionDetector};
use facevote_core::faces::encoding::{EncodingStrategy, FaceEncoding, FeatureEncoder};
use facevote_core::faces::handcrafted::HandcraftedEncoder;
use facevote_core::faces::quality::QualityAssessor;
use facevote_core::faces::verify;
use facevote_core::liveness::{
    counts_indicate_blink, LivenessDetector, LivenessProvider, LivenessRequest, ProviderError,
};
use facevote_core::{FacePipeline, FailureReason, PipelineConfig};
use image::{GrayImage, Rgb, RgbImage};

struct FixedDetector {
    faces: Vec<FaceBox>,
    calls: AtomicUsize,
}

impl FixedDetector {
    fn new(faces: Vec<FaceBox>) -> Self {
        Self {
            faces,
            calls: AtomicUsize::new(0),
        }
    }
}

impl RegionDetector for FixedDetector {
    fn detect(&self, _gray: &GrayImage) -> Vec<FaceBox> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.faces.clone()
    }
}

/// Encodes every capture to the same vector.
struct ConstantEncoder(Vec<f64>);

impl FeatureEncoder for ConstantEncoder {
    fn strategy(&self) -> EncodingStrategy {
        EncodingStrategy::Handcrafted
    }

    fn expected_dimension(&self) -> Option<usize> {
        Some(self.0.len())
    }

    fn requires_quality_gate(&self) -> bool {
        false
    }

    fn encode(&self, _image: &RgbImage, _face: FaceBox) -> AppResult<FaceEncoding> {
        Ok(handcrafted(self.0.clone()))
    }
}

struct CannedProvider {
    answer: Result<&'static str, ()>,
}

impl LivenessProvider for CannedProvider {
    fn name(&self) -> &str {
        "canned"
    }

    fn ask(&self, _request: &LivenessRequest<'_>) -> Result<String, ProviderError> {
        self.answer
            .map(str::to_string)
            .map_err(|_| ProviderError::Transport("connection refused".into()))
    }
}

fn handcrafted(vector: Vec<f64>) -> FaceEncoding {
    FaceEncoding::new(vector, EncodingStrategy::Handcrafted)
}

/// Unit vector whose scaled Euclidean distance from `[1, 0]` is `distance`.
fn at_distance(distance: f64) -> FaceEncoding {
    let angle = 2.0 * (distance * std::f64::consts::SQRT_2 / 2.0).asin();
    handcrafted(vec![angle.cos(), angle.sin()])
}

fn textured_capture() -> RgbImage {
    RgbImage::from_fn(320, 320, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            Rgb([60, 60, 60])
        } else {
            Rgb([200, 200, 200])
        }
    })
}

fn pipeline_with(liveness: LivenessDetector, probe: Vec<f64>) -> FacePipeline {
    FacePipeline::new(
        Arc::new(FixedDetector::new(vec![FaceBox::new(20, 20, 260, 260)])),
        Box::new(ConstantEncoder(probe)),
        liveness,
        PipelineConfig::default(),
    )
}

#[test]
fn empty_enrollment_never_matches() {
    let probe = handcrafted(vec![1.0, 0.0]);
    let result = verify(&[], Some(&probe), 0.6);
    assert!(!result.is_match);
    assert_eq!(result.distance, 1.0);

    let result = verify(&[probe.clone()], None, 0.6);
    assert!(!result.is_match);
    assert_eq!(result.distance, 1.0);
}

#[test]
fn identical_encoding_matches_at_zero_distance() {
    let encoding = handcrafted(vec![0.3, 0.4, 0.5]);
    let result = verify(&[encoding.clone()], Some(&encoding), 0.6);
    assert!(result.is_match);
    assert!(result.distance.abs() < 1e-12);
    assert_eq!(result.matched_index, Some(0));
}

#[test]
fn dimension_mismatch_is_skipped_not_compared() {
    let enrolled = [handcrafted(vec![1.0, 0.0, 0.0])];
    let probe = handcrafted(vec![1.0, 0.0]);
    let result = verify(&enrolled, Some(&probe), 0.6);
    assert!(!result.is_match);
    assert_eq!(result.distance, 1.0);
    assert_eq!(result.skipped, 1);
}

#[test]
fn near_duplicate_matches_and_stranger_does_not() {
    let enrolled = [handcrafted(vec![1.0, 0.0])];

    let near = verify(&enrolled, Some(&at_distance(0.05)), 0.6);
    assert!(near.is_match);
    assert!((near.distance - 0.05).abs() < 1e-9);

    let far = verify(&enrolled, Some(&at_distance(0.9)), 0.6);
    assert!(!far.is_match);
    assert!((far.distance - 0.9).abs() < 1e-9);
}

#[test]
fn dark_capture_rejected_before_detection() {
    let detector = FixedDetector::new(vec![FaceBox::new(0, 0, 200, 200)]);
    let assessor = QualityAssessor::new(&detector);
    let report = assessor.assess(&RgbImage::from_pixel(100, 100, Rgb([10, 10, 10])));
    assert!(!report.passed);
    assert!(report.reason.contains("dark"));
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn blink_rule_requires_two_eye_change() {
    assert!(counts_indicate_blink(2, 0));
    assert!(!counts_indicate_blink(2, 1));
}

#[test]
fn handcrafted_vector_is_unit_length_with_fixed_dimension() {
    let encoding = HandcraftedEncoder::new()
        .encode(&textured_capture(), FaceBox::new(10, 10, 200, 200))
        .expect("encodes");
    assert_eq!(encoding.dimension(), 128);
    assert!((encoding.norm() - 1.0).abs() < 1e-9);
}

#[test]
fn unconfigured_liveness_defers_to_matching() {
    let pipeline = pipeline_with(LivenessDetector::disabled(), vec![1.0, 0.0]);
    let outcome = pipeline
        .authenticate(&textured_capture(), &[handcrafted(vec![1.0, 0.0])])
        .expect("authenticates");
    assert!(outcome.liveness.is_unknown());
    assert!(outcome.accepted, "{}", outcome.message);
    assert_eq!(outcome.message, "Authentication successful! Face verified.");
}

#[test]
fn spoof_verdict_rejects_even_a_perfect_match() {
    let liveness = LivenessDetector::new(
        vec![Box::new(CannedProvider {
            answer: Ok("FAKE - screen reflection visible"),
        })],
        Duration::from_secs(1),
    );
    let pipeline = pipeline_with(liveness, vec![1.0, 0.0]);
    let outcome = pipeline
        .authenticate(&textured_capture(), &[handcrafted(vec![1.0, 0.0])])
        .expect("authenticates");
    assert!(!outcome.accepted);
    assert_eq!(outcome.failure, Some(FailureReason::SpoofDetected));
    assert!(outcome.message.starts_with("Fake face detected!"));
    assert!(outcome.verification.is_none());
}

#[test]
fn failing_provider_falls_through_to_next() {
    let liveness = LivenessDetector::new(
        vec![
            Box::new(CannedProvider { answer: Err(()) }),
            Box::new(CannedProvider {
                answer: Ok("REAL natural skin texture"),
            }),
        ],
        Duration::from_secs(1),
    );
    let pipeline = pipeline_with(liveness, vec![1.0, 0.0]);
    let outcome = pipeline
        .authenticate(&textured_capture(), &[handcrafted(vec![1.0, 0.0])])
        .expect("authenticates");
    assert_eq!(outcome.liveness.is_live, Some(true));
    assert!(outcome.accepted);
}

#[test]
fn distant_probe_reports_distance() {
    let pipeline = pipeline_with(LivenessDetector::disabled(), vec![0.0, 1.0]);
    let outcome = pipeline
        .authenticate(&textured_capture(), &[handcrafted(vec![1.0, 0.0])])
        .expect("authenticates");
    assert!(!outcome.accepted);
    assert_eq!(outcome.failure, Some(FailureReason::ThresholdNotReached));
    assert!(outcome.message.ends_with("Distance: 1.00"), "{}", outcome.message);
}
