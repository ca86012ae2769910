use std::any::Any;
use std::process::ExitCode;

use crate::cli::{Commands, OutputMode};
use crate::errors::AppResult;

pub trait CommandHandler: Send + Sync {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode>;
    fn as_any(&self) -> &dyn Any;
}

mod operation;

pub use operation::{
    authenticate, blink, detect, doctor, encode, enroll, liveness, quality, remove, verify,
    AuthenticateHandler, BlinkHandler, DetectHandler, DoctorHandler, EncodeHandler,
    EnrollHandler, LivenessHandler, OperationHandler, QualityHandler, RemoveHandler,
    VerifyHandler,
};

impl From<Commands> for Box<dyn CommandHandler> {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Encode(args) => Box::new(encode(args)),
            Commands::Quality(args) => Box::new(quality(args)),
            Commands::Detect(args) => Box::new(detect(args)),
            Commands::Verify(args) => Box::new(verify(args)),
            Commands::Enroll(args) => Box::new(enroll(args)),
            Commands::Remove(args) => Box::new(remove(args)),
            Commands::Liveness(args) => Box::new(liveness(args)),
            Commands::Blink(args) => Box::new(blink(args)),
            Commands::Authenticate(args) => Box::new(authenticate(args)),
            Commands::Doctor => Box::new(doctor()),
        }
    }
}
