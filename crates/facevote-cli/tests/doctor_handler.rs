use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use facevote_cli::cli::OutputMode;
use facevote_cli::commands::{self, CommandHandler};
use facevote_cli::doctor::{CheckStatus, DoctorCheck, DoctorOutcome};
use facevote_cli::errors::AppError;

fn sample_outcome(status: CheckStatus) -> DoctorOutcome {
    DoctorOutcome {
        ok: status != CheckStatus::Fail,
        checks: vec![DoctorCheck {
            name: "check".into(),
            status,
            message: "msg".into(),
            path: None,
        }],
    }
}

#[test]
fn doctor_handler_uses_render_and_exit_code() {
    let renders = Arc::new(Mutex::new(0));
    let handler = commands::doctor()
        .with_runner(|_| Ok(sample_outcome(CheckStatus::Fail)))
        .with_renderer({
            let renders = Arc::clone(&renders);
            move |_outcome, _mode| {
                *renders.lock().unwrap() += 1;
                Ok(())
            }
        });

    let code = handler.execute(OutputMode::Human, false).unwrap();
    assert_eq!(code, ExitCode::from(1));
    assert_eq!(*renders.lock().unwrap(), 1);
}

#[test]
fn doctor_warnings_still_succeed() {
    let handler = commands::doctor()
        .with_runner(|_| Ok(sample_outcome(CheckStatus::Warn)))
        .with_renderer(|outcome, mode| {
            assert_eq!(mode, OutputMode::Json);
            assert!(outcome.ok);
            Ok(())
        });

    let code = handler.execute(OutputMode::Json, false).unwrap();
    assert_eq!(code, ExitCode::SUCCESS);
}

#[test]
fn doctor_handler_propagates_errors() {
    let handler = commands::doctor()
        .with_runner(|_| Err(AppError::InvalidArgument("boom".into())))
        .with_renderer(|_outcome, _mode| Ok(()));

    let err = handler.execute(OutputMode::Json, false).unwrap_err();
    match err {
        AppError::InvalidArgument(message) => assert_eq!(message, "boom"),
        other => panic!("unexpected error: {other}"),
    }
}
