use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use facevote_cli::cli::{ModelArgs, OutputMode, VerifyArgs};
use facevote_cli::commands::{self, CommandHandler};
use facevote_cli::errors::{AppError, CoreError};
use facevote_cli::faces::{AuthenticateOutcome, VerifyOutcome};
use facevote_core::faces::encoding::EncodingStrategy;
use facevote_core::faces::VerificationResult;
use facevote_core::liveness::LivenessResult;
use facevote_core::pipeline::AuthenticationOutcome;

fn args() -> VerifyArgs {
    VerifyArgs {
        identity: "voter-7".into(),
        image: PathBuf::from("capture.jpg"),
        store_dir: Some(PathBuf::from("/tmp/facevote-test")),
        models: ModelArgs::default(),
    }
}

fn verify_outcome(is_match: bool) -> VerifyOutcome {
    VerifyOutcome {
        identity: "voter-7".into(),
        image: "capture.jpg".into(),
        strategy: EncodingStrategy::Handcrafted,
        threshold: 0.6,
        enrolled: 2,
        result: VerificationResult {
            is_match,
            distance: if is_match { 0.12 } else { 0.81 },
            matched_index: is_match.then_some(1),
            compared: 2,
            skipped: 0,
        },
        logs: vec![],
    }
}

#[test]
fn verify_match_exits_successfully() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = commands::verify(args())
        .with_runner({
            let seen = Arc::clone(&seen);
            move |args: &VerifyArgs| {
                seen.lock().unwrap().push(args.identity.clone());
                Ok(verify_outcome(true))
            }
        })
        .with_renderer(|outcome, _mode| {
            assert_eq!(outcome.result.matched_index, Some(1));
            Ok(())
        });

    let code = handler.execute(OutputMode::Human, false).unwrap();
    assert_eq!(code, ExitCode::SUCCESS);
    assert_eq!(seen.lock().unwrap().as_slice(), ["voter-7".to_string()]);
}

#[test]
fn verify_mismatch_exits_with_one() {
    let handler = commands::verify(args())
        .with_runner(|_args: &VerifyArgs| Ok(verify_outcome(false)))
        .with_renderer(|_outcome, _mode| Ok(()));

    let code = handler.execute(OutputMode::Json, false).unwrap();
    assert_eq!(code, ExitCode::from(1));
}

#[test]
fn verify_errors_skip_rendering() {
    let rendered = Arc::new(Mutex::new(false));
    let handler = commands::verify(args())
        .with_runner(|_args: &VerifyArgs| Err(AppError::Core(CoreError::NoFaceDetected)))
        .with_renderer({
            let rendered = Arc::clone(&rendered);
            move |_outcome, _mode| {
                *rendered.lock().unwrap() = true;
                Ok(())
            }
        });

    let err = handler.execute(OutputMode::Human, false).unwrap_err();
    assert!(matches!(err, AppError::Core(CoreError::NoFaceDetected)));
    assert!(!*rendered.lock().unwrap());
}

#[test]
fn rejected_authentication_exits_with_one() {
    let handler = commands::authenticate(args())
        .with_runner(|args: &VerifyArgs| {
            Ok(AuthenticateOutcome {
                identity: args.identity.clone(),
                image: "capture.jpg".into(),
                enrolled: 0,
                outcome: AuthenticationOutcome {
                    accepted: false,
                    failure: None,
                    verification: None,
                    liveness: LivenessResult::unknown("not evaluated"),
                    message: "No face data enrolled for this identity".into(),
                },
            })
        })
        .with_renderer(|_outcome, _mode| Ok(()));

    assert_eq!(handler.args().identity, "voter-7");
    let code = handler.execute(OutputMode::Human, false).unwrap();
    assert_eq!(code, ExitCode::from(1));
}
