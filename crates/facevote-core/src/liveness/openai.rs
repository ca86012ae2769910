use serde::Deserialize;
use serde_json::{json, Value};

use super::{post_json, LivenessProvider, LivenessRequest, ProviderError};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const MAX_TOKENS: u32 = 100;

/// OpenAI chat-completions vision request.
pub struct OpenAiProvider {
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: Option<String>, endpoint: Option<String>) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
        }
    }

    fn request_body(&self, request: &LivenessRequest<'_>) -> Value {
        json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": request.prompt },
                    {
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:{};base64,{}", request.mime, request.image_base64)
                        }
                    }
                ]
            }]
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

fn extract_answer(response: ChatResponse) -> Result<String, ProviderError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| ProviderError::Malformed("response contained no message content".into()))
}

impl LivenessProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn ask(&self, request: &LivenessRequest<'_>) -> Result<String, ProviderError> {
        let authorization = format!("Bearer {}", self.api_key);
        let response: ChatResponse = post_json(
            &self.endpoint,
            &[("Authorization", authorization.as_str())],
            self.request_body(request),
            request.timeout,
        )?;
        extract_answer(response)
    }
}
