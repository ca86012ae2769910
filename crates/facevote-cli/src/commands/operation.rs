use std::any::Any;
use std::process::ExitCode;

use facevote_core::faces::enrollment::{FaceEnrollmentOutcome, FaceRemovalOutcome};

use crate::cli::{
    BlinkArgs, DetectArgs, EncodeArgs, EnrollArgs, ImageArgs, OutputMode, RemoveArgs, VerifyArgs,
};
use crate::commands::CommandHandler;
use crate::doctor::{self, DoctorOutcome};
use crate::errors::AppResult;
use crate::faces::{
    self, AuthenticateOutcome, BlinkReport, DetectOutcome, EncodeOutcome, LivenessOutcome,
    QualityOutcome, VerifyOutcome,
};
use crate::output;

type Runner<A, O> = Box<dyn Fn(&A) -> AppResult<O> + Send + Sync>;
type Renderer<O> = Box<dyn Fn(&O, OutputMode) -> AppResult<()> + Send + Sync>;

/// Runs one operation on its arguments, renders the outcome and maps it to
/// an exit status. Run and render are injectable for tests.
pub struct OperationHandler<A, O> {
    args: A,
    run: Runner<A, O>,
    render: Renderer<O>,
    exit_code: fn(&O) -> ExitCode,
}

impl<A, O> OperationHandler<A, O> {
    pub fn with_dependencies(
        args: A,
        run: impl Fn(&A) -> AppResult<O> + Send + Sync + 'static,
        render: impl Fn(&O, OutputMode) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
            exit_code: |_| ExitCode::SUCCESS,
        }
    }

    pub fn with_exit_code(mut self, exit_code: fn(&O) -> ExitCode) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// Swaps the operation while keeping the exit-status mapping.
    pub fn with_runner(mut self, run: impl Fn(&A) -> AppResult<O> + Send + Sync + 'static) -> Self {
        self.run = Box::new(run);
        self
    }

    pub fn with_renderer(
        mut self,
        render: impl Fn(&O, OutputMode) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.render = Box::new(render);
        self
    }

    pub fn args(&self) -> &A {
        &self.args
    }
}

impl<A, O> CommandHandler for OperationHandler<A, O>
where
    A: Send + Sync + 'static,
    O: 'static,
{
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args)?;
        (self.render)(&outcome, mode)?;
        Ok((self.exit_code)(&outcome))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub type EncodeHandler = OperationHandler<EncodeArgs, EncodeOutcome>;
pub type QualityHandler = OperationHandler<ImageArgs, QualityOutcome>;
pub type DetectHandler = OperationHandler<DetectArgs, DetectOutcome>;
pub type VerifyHandler = OperationHandler<VerifyArgs, VerifyOutcome>;
pub type AuthenticateHandler = OperationHandler<VerifyArgs, AuthenticateOutcome>;
pub type EnrollHandler = OperationHandler<EnrollArgs, FaceEnrollmentOutcome>;
pub type RemoveHandler = OperationHandler<RemoveArgs, FaceRemovalOutcome>;
pub type LivenessHandler = OperationHandler<ImageArgs, LivenessOutcome>;
pub type BlinkHandler = OperationHandler<BlinkArgs, BlinkReport>;
pub type DoctorHandler = OperationHandler<(), DoctorOutcome>;

fn status(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

pub fn encode(args: EncodeArgs) -> EncodeHandler {
    OperationHandler::with_dependencies(args, faces::run_encode, output::render_encode)
}

pub fn quality(args: ImageArgs) -> QualityHandler {
    OperationHandler::with_dependencies(args, faces::run_quality, output::render_quality)
        .with_exit_code(|outcome| status(outcome.report.passed))
}

pub fn detect(args: DetectArgs) -> DetectHandler {
    OperationHandler::with_dependencies(args, faces::run_detect, output::render_detect)
}

pub fn verify(args: VerifyArgs) -> VerifyHandler {
    OperationHandler::with_dependencies(args, faces::run_verify, output::render_verify)
        .with_exit_code(|outcome| status(outcome.result.is_match))
}

pub fn authenticate(args: VerifyArgs) -> AuthenticateHandler {
    OperationHandler::with_dependencies(args, faces::run_authenticate, output::render_authenticate)
        .with_exit_code(|outcome| status(outcome.outcome.accepted))
}

pub fn enroll(args: EnrollArgs) -> EnrollHandler {
    OperationHandler::with_dependencies(args, faces::run_enroll, output::render_enroll)
}

pub fn remove(args: RemoveArgs) -> RemoveHandler {
    OperationHandler::with_dependencies(args, faces::run_remove, output::render_remove)
}

pub fn liveness(args: ImageArgs) -> LivenessHandler {
    OperationHandler::with_dependencies(args, faces::run_liveness, output::render_liveness)
        .with_exit_code(|outcome| status(!outcome.result.is_spoof()))
}

pub fn blink(args: BlinkArgs) -> BlinkHandler {
    OperationHandler::with_dependencies(args, faces::run_blink, output::render_blink)
}

/// Warnings still exit 0; only failed checks turn the status to 1.
pub fn doctor() -> DoctorHandler {
    OperationHandler::with_dependencies((), |_| doctor::run_doctor(), output::render_doctor)
        .with_exit_code(|outcome| status(outcome.ok))
}
