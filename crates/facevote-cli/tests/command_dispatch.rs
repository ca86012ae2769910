use std::path::PathBuf;

use facevote_cli::cli::{
    BlinkArgs, Commands, DetectArgs, EncodeArgs, EnrollArgs, ImageArgs, ModelArgs, RemoveArgs,
    VerifyArgs,
};
use facevote_cli::commands::{
    AuthenticateHandler, BlinkHandler, CommandHandler, DetectHandler, DoctorHandler,
    EncodeHandler, EnrollHandler, LivenessHandler, QualityHandler, RemoveHandler, VerifyHandler,
};

fn image_args() -> ImageArgs {
    ImageArgs {
        image: PathBuf::from("capture.jpg"),
        models: ModelArgs::default(),
    }
}

fn verify_args() -> VerifyArgs {
    VerifyArgs {
        identity: "voter-1".into(),
        image: PathBuf::from("capture.jpg"),
        store_dir: None,
        models: ModelArgs::default(),
    }
}

fn dispatch(command: Commands) -> Box<dyn CommandHandler> {
    command.into()
}

#[test]
fn analysis_commands_map_to_their_handlers() {
    let encode = dispatch(Commands::Encode(EncodeArgs {
        image: PathBuf::from("capture.jpg"),
        output: None,
        models: ModelArgs::default(),
    }));
    assert!(encode.as_any().is::<EncodeHandler>());

    let quality = dispatch(Commands::Quality(image_args()));
    assert!(quality.as_any().is::<QualityHandler>());

    let detect = dispatch(Commands::Detect(DetectArgs {
        image: PathBuf::from("capture.jpg"),
        eyes: true,
        eye_cascade: None,
        models: ModelArgs::default(),
    }));
    assert!(detect.as_any().is::<DetectHandler>());
}

#[test]
fn verification_commands_map_to_their_handlers() {
    let verify = dispatch(Commands::Verify(verify_args()));
    assert!(verify.as_any().is::<VerifyHandler>());

    let authenticate = dispatch(Commands::Authenticate(verify_args()));
    assert!(authenticate.as_any().is::<AuthenticateHandler>());
    assert!(!authenticate.as_any().is::<VerifyHandler>());
}

#[test]
fn enrollment_commands_map_to_their_handlers() {
    let enroll = dispatch(Commands::Enroll(EnrollArgs {
        identity: "voter-1".into(),
        images: vec![PathBuf::from("a.jpg"), PathBuf::from("b.jpg")],
        store_dir: None,
        models: ModelArgs::default(),
    }));
    assert!(enroll.as_any().is::<EnrollHandler>());

    let remove = dispatch(Commands::Remove(RemoveArgs {
        identity: "voter-1".into(),
        encoding_id: vec![],
        all: true,
        store_dir: None,
    }));
    assert!(remove.as_any().is::<RemoveHandler>());
}

#[test]
fn liveness_and_doctor_commands_map_to_their_handlers() {
    let liveness = dispatch(Commands::Liveness(image_args()));
    assert!(liveness.as_any().is::<LivenessHandler>());

    let blink = dispatch(Commands::Blink(BlinkArgs {
        first: PathBuf::from("open.jpg"),
        second: PathBuf::from("closed.jpg"),
        eye_cascade: None,
    }));
    assert!(blink.as_any().is::<BlinkHandler>());

    let doctor = dispatch(Commands::Doctor);
    assert!(doctor.as_any().is::<DoctorHandler>());
}
