use serde::Deserialize;
use serde_json::{json, Value};

use super::{post_json, LivenessProvider, LivenessRequest, ProviderError};

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini `generateContent` with the capture as inline data.
pub struct GeminiProvider {
    api_key: String,
    model: String,
    endpoint: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: Option<String>, endpoint: Option<String>) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            endpoint: endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    fn request_body(request: &LivenessRequest<'_>) -> Value {
        json!({
            "contents": [{
                "parts": [
                    { "text": request.prompt },
                    { "inline_data": { "mime_type": request.mime, "data": request.image_base64 } }
                ]
            }]
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

fn extract_answer(response: GenerateResponse) -> Result<String, ProviderError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(ProviderError::Malformed(
            "response contained no candidate text".into(),
        ));
    }
    Ok(text.to_string())
}

impl LivenessProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn ask(&self, request: &LivenessRequest<'_>) -> Result<String, ProviderError> {
        let response: GenerateResponse = post_json(
            &self.url(),
            &[("x-goog-api-key", self.api_key.as_str())],
            Self::request_body(request),
            request.timeout,
        )?;
        extract_answer(response)
    }
}
