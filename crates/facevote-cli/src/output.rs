use std::error::Error;
use std::io::{self, Write};

use facevote_core::faces::enrollment::{FaceEnrollmentOutcome, FaceRemovalOutcome};
use serde::Serialize;
use serde_json::{json, Value};

use crate::cli::OutputMode;
use crate::doctor::{CheckStatus, DoctorOutcome};
use crate::errors::{AppError, AppResult};
use crate::faces::{
    AuthenticateOutcome, BlinkReport, DetectOutcome, EncodeOutcome, LivenessOutcome,
    QualityOutcome, VerifyOutcome,
};

fn write_json<T: Serialize + ?Sized>(payload: &T) -> AppResult<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let payload = serde_json::to_string(payload)?;
    handle.write_all(payload.as_bytes())?;
    handle.write_all(b"\n")?;
    Ok(())
}

pub fn render_encode(outcome: &EncodeOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for line in &outcome.logs {
                println!("{line}");
            }
            println!(
                "Encoding successful: {} ({}-dimensional {} vector)",
                outcome.image, outcome.dimension, outcome.strategy
            );
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

pub fn render_quality(outcome: &QualityOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            let verdict = if outcome.report.passed { "passed" } else { "rejected" };
            println!(
                "Quality {verdict} for {} (score {:.2}): {}",
                outcome.image, outcome.report.score, outcome.report.reason
            );
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

pub fn render_detect(outcome: &DetectOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!(
                "Detected {} {} region(s) in {}",
                outcome.regions.len(),
                outcome.target,
                outcome.image
            );
            for region in &outcome.regions {
                println!(
                    "  x={} y={} width={} height={}",
                    region.x, region.y, region.width, region.height
                );
            }
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

pub fn render_verify(outcome: &VerifyOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for line in &outcome.logs {
                println!("{line}");
            }
            let verdict = if outcome.result.is_match {
                "Match"
            } else {
                "No match"
            };
            println!(
                "{verdict} for identity {}: distance {:.4} (threshold {:.2}, {})",
                outcome.identity, outcome.result.distance, outcome.threshold, outcome.strategy
            );
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

pub fn render_authenticate(outcome: &AuthenticateOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            let liveness = &outcome.outcome.liveness;
            match liveness.is_live {
                Some(live) => println!(
                    "Liveness ({}): {} - {}",
                    liveness.provider,
                    if live { "live" } else { "spoof" },
                    liveness.reason
                ),
                None => println!("Liveness unknown: {}", liveness.reason),
            }
            println!("{}", outcome.outcome.message);
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

pub fn render_enroll(outcome: &FaceEnrollmentOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for line in &outcome.logs {
                println!("{line}");
            }
            println!(
                "Enrollment successful: {} encoding(s) added to {}",
                outcome.added.len(),
                outcome.store_path.display()
            );
        }
        OutputMode::Json => write_json(&enroll_json_payload(outcome))?,
    }
    Ok(())
}

fn enroll_json_payload(outcome: &FaceEnrollmentOutcome) -> Value {
    json!({
        "identity": outcome.identity,
        "store_path": outcome.store_path.display().to_string(),
        "added": outcome.added,
        "total": outcome.total,
    })
}

pub fn render_remove(outcome: &FaceRemovalOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for line in &outcome.logs {
                println!("{line}");
            }
            println!(
                "Removal successful: removed {} encoding(s); remaining {}",
                outcome.removed_ids.len(),
                outcome.remaining
            );
        }
        OutputMode::Json => write_json(&json!({
            "identity": outcome.identity,
            "store_path": outcome.store_path.display().to_string(),
            "removed_ids": outcome.removed_ids,
            "remaining": outcome.remaining,
            "cleared": outcome.cleared,
        }))?,
    }
    Ok(())
}

pub fn render_liveness(outcome: &LivenessOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            let verdict = match outcome.result.is_live {
                Some(true) => "live",
                Some(false) => "spoof",
                None => "unknown",
            };
            println!(
                "Liveness {verdict} (confidence {:.1}, provider {}): {}",
                outcome.result.confidence, outcome.result.provider, outcome.result.reason
            );
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

pub fn render_blink(report: &BlinkReport, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!(
                "Eyes detected: {} then {}; blink {}",
                report.outcome.first_eyes,
                report.outcome.second_eyes,
                if report.outcome.state_changed {
                    "likely"
                } else {
                    "not detected"
                }
            );
        }
        OutputMode::Json => write_json(report)?,
    }
    Ok(())
}

pub fn render_doctor(outcome: &DoctorOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for check in &outcome.checks {
                let marker = match check.status {
                    CheckStatus::Pass => "ok",
                    CheckStatus::Warn => "warn",
                    CheckStatus::Fail => "FAIL",
                };
                println!("[{marker:>4}] {}: {}", check.name, check.message);
            }
            println!(
                "{}",
                if outcome.ok {
                    "All checks passed"
                } else {
                    "Some checks failed"
                }
            );
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

pub fn render_error(err: &AppError, mode: OutputMode) {
    match mode {
        OutputMode::Human => {
            eprintln!("error: {}", err.human_message());
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "success": false,
                "error": err.human_message(),
            });
            if let Ok(json) = serde_json::to_string(&payload) {
                println!("{json}");
            }
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
    }
}
