use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "facevote",
    about = "Face verification with quality gating and AI liveness checks",
    version
)]
pub struct Cli {
    /// Emit structured JSON to stdout instead of human-readable logs
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase verbosity (may be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Detect, quality-check and encode the largest face in an image
    Encode(EncodeArgs),
    /// Report the capture quality assessment for an image
    Quality(ImageArgs),
    /// List face (or eye) regions found by the detector
    Detect(DetectArgs),
    /// Compare a capture against an identity's enrolled encodings
    Verify(VerifyArgs),
    /// Encode one or more captures and add them to an identity
    Enroll(EnrollArgs),
    /// Remove enrolled encodings from an identity
    Remove(RemoveArgs),
    /// Ask the configured AI providers whether a capture shows a live face
    Liveness(ImageArgs),
    /// Compare eye counts between two frames
    Blink(BlinkArgs),
    /// Liveness check plus verification, as used for sign-in
    Authenticate(VerifyArgs),
    /// Validate configuration, models, store and liveness credentials
    Doctor,
}

/// Model overrides shared by every command that runs the pipeline. Unset
/// flags fall back to the config file, then the environment.
#[derive(Debug, Clone, Default, Args)]
pub struct ModelArgs {
    /// Encoding strategy: `handcrafted` or `deep`
    #[arg(long)]
    pub encoder: Option<String>,

    /// Haar cascade XML for frontal faces, OpenCV builds only (falls back to
    /// $FACEVOTE_FACE_CASCADE)
    #[arg(long)]
    pub face_cascade: Option<PathBuf>,

    /// SeetaFace detector model, used without OpenCV (falls back to
    /// $FACEVOTE_FACE_MODEL)
    #[arg(long)]
    pub face_model: Option<PathBuf>,

    /// Deep embedding model (falls back to $FACEVOTE_EMBEDDING_MODEL)
    #[arg(long)]
    pub embedding_model: Option<PathBuf>,

    /// dlib shape predictor (falls back to $FACEVOTE_LANDMARK_MODEL)
    #[arg(long)]
    pub landmark_model: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct ImageArgs {
    /// Image file, or a .b64/.txt file holding a base64 or data-URL payload
    pub image: PathBuf,

    #[command(flatten)]
    pub models: ModelArgs,
}

#[derive(Debug, Clone, Args)]
pub struct EncodeArgs {
    pub image: PathBuf,

    /// Write the encoding JSON to this file as well as stdout
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub models: ModelArgs,
}

#[derive(Debug, Clone, Args)]
pub struct DetectArgs {
    pub image: PathBuf,

    /// Detect eyes instead of faces
    #[arg(long)]
    pub eyes: bool,

    /// Haar cascade XML for eyes, OpenCV builds only (falls back to $FACEVOTE_EYE_CASCADE)
    #[arg(long)]
    pub eye_cascade: Option<PathBuf>,

    #[command(flatten)]
    pub models: ModelArgs,
}

#[derive(Debug, Clone, Args)]
pub struct VerifyArgs {
    /// Identity whose enrolled encodings are compared
    #[arg(long)]
    pub identity: String,

    pub image: PathBuf,

    /// Override the enrollment store directory
    #[arg(long)]
    pub store_dir: Option<PathBuf>,

    #[command(flatten)]
    pub models: ModelArgs,
}

#[derive(Debug, Clone, Args)]
pub struct EnrollArgs {
    #[arg(long)]
    pub identity: String,

    /// Capture(s) to encode and enroll
    #[arg(required = true)]
    pub images: Vec<PathBuf>,

    #[arg(long)]
    pub store_dir: Option<PathBuf>,

    #[command(flatten)]
    pub models: ModelArgs,
}

#[derive(Debug, Clone, Args)]
pub struct RemoveArgs {
    #[arg(long)]
    pub identity: String,

    /// Encoding id to remove (repeatable)
    #[arg(long = "encoding-id", conflicts_with = "all")]
    pub encoding_id: Vec<String>,

    /// Remove every encoding of the identity
    #[arg(long)]
    pub all: bool,

    #[arg(long)]
    pub store_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct BlinkArgs {
    pub first: PathBuf,
    pub second: PathBuf,

    #[arg(long)]
    pub eye_cascade: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl From<bool> for OutputMode {
    fn from(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from(self.json)
    }
}
