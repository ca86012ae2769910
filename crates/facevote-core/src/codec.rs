//! Transport decoding for captured stills.
//!
//! Browsers post captures as base64 text, usually with a `data:<mime>;base64,`
//! header in front. Everything downstream works on [`RgbImage`], so channel
//! order is always R, G, B.

use std::io::Cursor;
use std::path::Path;

use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};

use crate::errors::{AppError, AppResult};

const DATA_URL_SCHEME: &str = "data:";
const LIVENESS_JPEG_QUALITY: u8 = 90;

/// A transport payload with its header stripped but not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime: Option<String>,
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    /// Container format announced by the data-URL header, if any.
    pub fn announced_format(&self) -> Option<ImageFormat> {
        self.mime.as_deref().and_then(ImageFormat::from_mime_type)
    }
}

/// Strip the optional data-URL header and base64-decode the remainder.
pub fn parse_payload(payload: &str) -> AppResult<ImagePayload> {
    let trimmed = payload.trim();
    let (mime, body) = split_header(trimmed);
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(AppError::Decode("payload is empty".into()));
    }

    let bytes = general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|err| AppError::Decode(format!("invalid base64: {err}")))?;

    Ok(ImagePayload { mime, bytes })
}

fn split_header(payload: &str) -> (Option<String>, &str) {
    match payload.split_once(',') {
        Some((header, body)) => {
            let mime = header
                .strip_prefix(DATA_URL_SCHEME)
                .and_then(|rest| rest.split(';').next())
                .filter(|mime| !mime.is_empty())
                .map(str::to_string);
            (mime, body)
        }
        None => (None, payload),
    }
}

/// Decode a transport payload into an RGB image.
///
/// With `expected` set the bytes must be a valid image of that container
/// format; otherwise the data-URL header or the magic bytes decide.
pub fn decode_payload(payload: &str, expected: Option<ImageFormat>) -> AppResult<RgbImage> {
    let parsed = parse_payload(payload)?;
    let format = expected.or_else(|| parsed.announced_format());
    decode_bytes(&parsed.bytes, format)
}

pub fn decode_bytes(bytes: &[u8], format: Option<ImageFormat>) -> AppResult<RgbImage> {
    let decoded = match format {
        Some(format) => image::load_from_memory_with_format(bytes, format),
        None => image::load_from_memory(bytes),
    }
    .map_err(|err| AppError::Decode(err.to_string()))?;

    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(AppError::Decode("image dimensions are zero".into()));
    }
    Ok(decoded.to_rgb8())
}

/// Load a capture from disk; `.b64`/`.txt` files are treated as transport payloads.
pub fn load_image(path: &Path) -> AppResult<RgbImage> {
    if !path.exists() {
        return Err(AppError::MissingInput {
            path: path.to_path_buf(),
        });
    }

    let is_text_payload = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("b64") | Some("txt")
    );
    if is_text_payload {
        let text = std::fs::read_to_string(path).map_err(|err| AppError::ImageRead {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        return decode_payload(&text, None);
    }

    let bytes = std::fs::read(path).map_err(|err| AppError::ImageRead {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    decode_bytes(&bytes, ImageFormat::from_path(path).ok())
}

/// Re-encode an image as base64 JPEG for the external liveness providers.
pub fn encode_jpeg_base64(image: &RgbImage) -> AppResult<String> {
    let mut buffer = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buffer, LIVENESS_JPEG_QUALITY)
        .encode_image(image)
        .map_err(|err| AppError::EncodingFailed(format!("jpeg encode failed: {err}")))?;
    Ok(general_purpose::STANDARD.encode(buffer.into_inner()))
}
