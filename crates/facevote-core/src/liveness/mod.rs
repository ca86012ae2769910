//! Anti-spoofing through external vision models.
//!
//! Providers are asked one closed question about the capture and tried in
//! priority order. Any provider failure (transport, HTTP status, timeout,
//! unparseable answer) falls through to the next one; when nobody answers the
//! result is `unknown` and the face match decides alone.

pub mod blink;
pub mod gemini;
pub mod openai;

use std::time::{Duration, Instant};

use image::RgbImage;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codec::encode_jpeg_base64;

pub use blink::{counts_indicate_blink, BlinkHeuristic, BlinkOutcome};
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

pub const LIVENESS_PROMPT: &str = "Analyze this image carefully. Is this a real human face (live person) or a fake/spoofed image (photo, screen, printed image, mask)? Answer with ONLY 'REAL' or 'FAKE' followed by a brief reason.";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const LIVE_CONFIDENCE: f64 = 0.9;
const SPOOF_CONFIDENCE: f64 = 0.1;
const UNKNOWN_CONFIDENCE: f64 = 0.5;
const NO_PROVIDER: &str = "none";

/// Tri-state liveness answer; `is_live == None` defers to face matching.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivenessResult {
    pub is_live: Option<bool>,
    pub confidence: f64,
    pub reason: String,
    pub provider: String,
}

impl LivenessResult {
    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            is_live: None,
            confidence: UNKNOWN_CONFIDENCE,
            reason: reason.into(),
            provider: NO_PROVIDER.into(),
        }
    }

    fn from_verdict(verdict: Verdict, reason: String, provider: &str) -> Self {
        let is_live = verdict == Verdict::Live;
        Self {
            is_live: Some(is_live),
            confidence: if is_live {
                LIVE_CONFIDENCE
            } else {
                SPOOF_CONFIDENCE
            },
            reason,
            provider: provider.to_string(),
        }
    }

    /// Explicit spoof verdict; the only liveness outcome that blocks a match.
    pub fn is_spoof(&self) -> bool {
        self.is_live == Some(false)
    }

    pub fn is_unknown(&self) -> bool {
        self.is_live.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Live,
    Spoof,
}

/// Classify a free-text answer by its first alphabetic token.
pub fn parse_verdict(answer: &str) -> Option<Verdict> {
    let token = answer
        .split(|ch: char| !ch.is_ascii_alphabetic())
        .find(|word| !word.is_empty())?;
    match token.to_ascii_uppercase().as_str() {
        "REAL" | "LIVE" => Some(Verdict::Live),
        "FAKE" | "SPOOF" => Some(Verdict::Spoof),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("unrecognised answer: {0}")]
    UnrecognizedAnswer(String),
}

/// A single question put to a provider.
#[derive(Debug, Clone, Copy)]
pub struct LivenessRequest<'a> {
    pub image_base64: &'a str,
    pub mime: &'a str,
    pub prompt: &'a str,
    pub timeout: Duration,
}

pub trait LivenessProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Raw answer text from the model.
    fn ask(&self, request: &LivenessRequest<'_>) -> Result<String, ProviderError>;
}

/// Provider entry as resolved from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSpec {
    pub name: String,
    pub credential: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
}

/// Instantiate providers in priority order. Entries without a credential or
/// with an unknown name are skipped.
pub fn build_providers(specs: &[ProviderSpec]) -> Vec<Box<dyn LivenessProvider>> {
    let mut providers: Vec<Box<dyn LivenessProvider>> = Vec::new();
    for spec in specs {
        let Some(credential) = spec.credential.clone().filter(|c| !c.trim().is_empty()) else {
            info!(
                target: "facevote::liveness",
                provider = %spec.name,
                "liveness provider has no credential; skipping"
            );
            continue;
        };
        match spec.name.to_ascii_lowercase().as_str() {
            "openai" => providers.push(Box::new(OpenAiProvider::new(
                credential,
                spec.model.clone(),
                spec.endpoint.clone(),
            ))),
            "gemini" => providers.push(Box::new(GeminiProvider::new(
                credential,
                spec.model.clone(),
                spec.endpoint.clone(),
            ))),
            other => warn!(
                target: "facevote::liveness",
                provider = other,
                "unknown liveness provider; skipping"
            ),
        }
    }
    providers
}

pub struct LivenessDetector {
    providers: Vec<Box<dyn LivenessProvider>>,
    timeout: Duration,
}

impl LivenessDetector {
    /// `timeout` bounds the whole check across every provider tried.
    pub fn new(providers: Vec<Box<dyn LivenessProvider>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    pub fn from_specs(specs: &[ProviderSpec], timeout: Duration) -> Self {
        Self::new(build_providers(specs), timeout)
    }

    pub fn disabled() -> Self {
        Self::new(Vec::new(), DEFAULT_TIMEOUT)
    }

    pub fn is_configured(&self) -> bool {
        !self.providers.is_empty()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn check(&self, image: &RgbImage) -> LivenessResult {
        if self.providers.is_empty() {
            return self.unknown("no provider configured");
        }

        let payload = match encode_jpeg_base64(image) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(target: "facevote::liveness", error = %err, "could not encode capture for liveness");
                return self.unknown("capture could not be encoded for liveness providers");
            }
        };
        self.check_encoded(&payload, "image/jpeg")
    }

    /// Run the provider chain on an already-encoded capture.
    pub fn check_encoded(&self, image_base64: &str, mime: &str) -> LivenessResult {
        if self.providers.is_empty() {
            return self.unknown("no provider configured");
        }

        let deadline = Instant::now() + self.timeout;
        for provider in &self.providers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    target: "facevote::liveness",
                    provider = provider.name(),
                    "liveness budget exhausted before provider could be asked"
                );
                break;
            }

            let request = LivenessRequest {
                image_base64,
                mime,
                prompt: LIVENESS_PROMPT,
                timeout: remaining,
            };
            let answer = provider.ask(&request).and_then(|answer| {
                let verdict = parse_verdict(&answer)
                    .ok_or_else(|| ProviderError::UnrecognizedAnswer(answer.clone()))?;
                Ok((verdict, answer))
            });

            match answer {
                Ok((verdict, answer)) => {
                    debug!(
                        target: "facevote::liveness",
                        provider = provider.name(),
                        ?verdict,
                        "liveness verdict received"
                    );
                    return LivenessResult::from_verdict(verdict, answer.trim().to_string(), provider.name());
                }
                Err(err) => warn!(
                    target: "facevote::liveness",
                    provider = provider.name(),
                    error = %err,
                    "liveness provider failed; trying next"
                ),
            }
        }

        self.unknown("no liveness provider available")
    }

    fn unknown(&self, reason: &str) -> LivenessResult {
        warn!(
            target: "facevote::liveness",
            reason,
            "liveness unknown; relying on face matching only"
        );
        LivenessResult::unknown(reason)
    }
}

/// POST a JSON body and decode a JSON reply, classifying every failure.
pub(crate) fn post_json<T: DeserializeOwned>(
    url: &str,
    headers: &[(&str, &str)],
    body: serde_json::Value,
    timeout: Duration,
) -> Result<T, ProviderError> {
    let agent = ureq::AgentBuilder::new().timeout(timeout).build();
    let mut request = agent.post(url);
    for (name, value) in headers {
        request = request.set(name, value);
    }

    match request.send_json(body) {
        Ok(response) => response
            .into_json::<T>()
            .map_err(|err| ProviderError::Malformed(err.to_string())),
        Err(ureq::Error::Status(status, response)) => Err(ProviderError::Status {
            status,
            body: response.into_string().unwrap_or_default(),
        }),
        Err(ureq::Error::Transport(transport)) => Err(classify_transport(&transport)),
    }
}

fn classify_transport(transport: &ureq::Transport) -> ProviderError {
    let timed_out = std::error::Error::source(transport)
        .and_then(|source| source.downcast_ref::<std::io::Error>())
        .is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        });
    if timed_out {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(transport.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    struct ScriptedProvider {
        name: &'static str,
        reply: Result<&'static str, fn() -> ProviderError>,
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl ScriptedProvider {
        fn answering(name: &'static str, answer: &'static str) -> Self {
            Self {
                name,
                reply: Ok(answer),
                calls: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
            }
        }

        fn failing(name: &'static str, error: fn() -> ProviderError) -> Self {
            Self {
                name,
                reply: Err(error),
                calls: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
            }
        }
    }

    impl LivenessProvider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn ask(&self, request: &LivenessRequest<'_>) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.prompt, LIVENESS_PROMPT);
            thread::sleep(self.delay);
            match &self.reply {
                Ok(answer) => Ok(answer.to_string()),
                Err(make) => Err(make()),
            }
        }
    }

    fn capture() -> RgbImage {
        RgbImage::from_pixel(16, 16, Rgb([120, 100, 90]))
    }

    #[test]
    fn verdict_uses_first_alphabetic_token() {
        assert_eq!(parse_verdict("REAL - natural skin texture"), Some(Verdict::Live));
        assert_eq!(parse_verdict("**Fake**: screen moire visible"), Some(Verdict::Spoof));
        assert_eq!(parse_verdict("'live' person"), Some(Verdict::Live));
        assert_eq!(parse_verdict("Not a real face"), None);
        assert_eq!(parse_verdict(""), None);
    }

    #[test]
    fn no_provider_yields_unknown() {
        let result = LivenessDetector::disabled().check(&capture());
        assert_eq!(result.is_live, None);
        assert_eq!(result.confidence, 0.5);
        assert_eq!(result.reason, "no provider configured");
    }

    #[test]
    fn primary_answer_wins() {
        let detector = LivenessDetector::new(
            vec![
                Box::new(ScriptedProvider::answering("openai", "FAKE printed photo")),
                Box::new(ScriptedProvider::answering("gemini", "REAL")),
            ],
            DEFAULT_TIMEOUT,
        );
        let result = detector.check(&capture());
        assert!(result.is_spoof());
        assert_eq!(result.confidence, 0.1);
        assert_eq!(result.provider, "openai");
        assert_eq!(result.reason, "FAKE printed photo");
    }

    #[test]
    fn failures_fall_through_to_next_provider() {
        let primary = ScriptedProvider::failing("openai", || ProviderError::Status {
            status: 500,
            body: "boom".into(),
        });
        let primary_calls = Arc::clone(&primary.calls);
        let detector = LivenessDetector::new(
            vec![
                Box::new(primary),
                Box::new(ScriptedProvider::answering("gemini", "REAL, natural lighting")),
            ],
            DEFAULT_TIMEOUT,
        );

        let result = detector.check(&capture());
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.is_live, Some(true));
        assert_eq!(result.confidence, 0.9);
        assert_eq!(result.provider, "gemini");
    }

    #[test]
    fn unparseable_answers_degrade_to_unknown() {
        let detector = LivenessDetector::new(
            vec![
                Box::new(ScriptedProvider::answering("openai", "I cannot tell")),
                Box::new(ScriptedProvider::failing("gemini", || ProviderError::Timeout)),
            ],
            DEFAULT_TIMEOUT,
        );
        let result = detector.check(&capture());
        assert!(result.is_unknown());
        assert!(!result.is_spoof());
    }

    #[test]
    fn exhausted_budget_skips_remaining_providers() {
        let mut slow = ScriptedProvider::failing("openai", || ProviderError::Timeout);
        slow.delay = Duration::from_millis(40);
        let fallback = ScriptedProvider::answering("gemini", "REAL");
        let fallback_calls = Arc::clone(&fallback.calls);

        let detector = LivenessDetector::new(
            vec![Box::new(slow), Box::new(fallback)],
            Duration::from_millis(20),
        );
        let result = detector.check(&capture());
        assert!(result.is_unknown());
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn providers_without_credentials_are_skipped() {
        let specs = vec![
            ProviderSpec {
                name: "openai".into(),
                credential: None,
                ..ProviderSpec::default()
            },
            ProviderSpec {
                name: "gemini".into(),
                credential: Some("key".into()),
                ..ProviderSpec::default()
            },
            ProviderSpec {
                name: "mystery".into(),
                credential: Some("key".into()),
                ..ProviderSpec::default()
            },
        ];
        let detector = LivenessDetector::from_specs(&specs, DEFAULT_TIMEOUT);
        assert_eq!(detector.provider_names(), vec!["gemini"]);
    }
}
