//! Thin adapter over the generative-AI provider.
//!
//! Wraps caller prompts with a fixed supportive-tutor persona, adds a
//! learning-context block for content-page requests, and classifies
//! provider failures into the five kinds the client distinguishes.
//! Classification prefers the provider's structured status codes and falls
//! back to message-text heuristics only when no structured code is present.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const BASE_TONE: &str = "\
You are a gentle educational assistant supporting children who are unable to \
attend school. Always respond with warmth and understanding, support learning \
without applying pressure, respect each child's own pace, and praise even \
small steps of progress.";

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Invalid API key: {0}")]
    InvalidApiKey(String),

    #[error("Provider quota exhausted: {0}")]
    QuotaExceeded(String),

    #[error("Content rejected by the safety filter: {0}")]
    SafetyRejected(String),

    #[error("API key lacks the required permission: {0}")]
    PermissionDenied(String),

    #[error("Empty response from the AI provider")]
    EmptyResponse,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("AI generation failed: {0}")]
    Unknown(String),
}

/// Learning context interpolated into content-page prompts.
#[derive(Deserialize, Default, Clone, Debug)]
pub struct PromptContext {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub grade: String,
    #[serde(default)]
    pub learning_objective: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub beginner_goals: Vec<String>,
    #[serde(default)]
    pub intermediate_goals: Vec<String>,
    #[serde(default)]
    pub advanced_goals: Vec<String>,
}

pub fn build_prompt(prompt: &str, content_type: &str, context: Option<&PromptContext>) -> String {
    match context {
        Some(ctx) => format!(
            "{BASE_TONE}\n\n\
             [Current learning material]\n\
             - Subject: {}\n\
             - Grade: {}\n\
             - Learning objective: {}\n\
             - Keywords: {}\n\n\
             [Learning goals]\n\
             Beginner: {}\n\
             Intermediate: {}\n\
             Advanced: {}\n\n\
             Content type: {content_type}\n\n\
             {prompt}\n\n\
             With the material and goals above in mind, offer kind advice: a \
             concrete approach for this topic, materials found at home, ways \
             to progress without strain, small wins to celebrate, and \
             age-appropriate fun.",
            ctx.subject,
            ctx.grade,
            ctx.learning_objective,
            ctx.keywords.join(", "),
            ctx.beginner_goals.join(", "),
            ctx.intermediate_goals.join(", "),
            ctx.advanced_goals.join(", "),
        ),
        None => format!(
            "{BASE_TONE}\n\n\
             {prompt}\n\n\
             You are a kind teacher asked for study advice. Emphasise that \
             not overdoing it matters, that small steps have value, give \
             practical suggestions, and include words of encouragement. \
             Learning is not a competition."
        ),
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
    #[serde(default)]
    finish_reason: String,
}

#[derive(Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Default)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct ErrorResponse {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url,
            model: DEFAULT_MODEL.to_string(),
            api_key,
        }
    }

    pub fn has_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Runs the prompt against the server-held credential.
    #[instrument(skip_all)]
    pub async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        self.generate_with_key(prompt, &self.api_key).await
    }

    /// Unmetered credential check: runs a trivial prompt against a
    /// caller-supplied key without touching the server credential or the
    /// usage counters.
    #[instrument(skip_all)]
    pub async fn validate_api_key(&self, api_key: &str) -> Result<(), ProviderError> {
        self.generate_with_key("Hello", api_key).await.map(|_| ())
    }

    async fn generate_with_key(&self, prompt: &str, api_key: &str) -> Result<String, ProviderError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, api_key
        );

        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_http_failure(status, &raw));
        }

        let parsed: GenerateResponse = serde_json::from_str(&raw)
            .map_err(|e| ProviderError::Unknown(format!("Malformed provider response: {e}")))?;

        let Some(candidate) = parsed.candidates.into_iter().next() else {
            return Err(ProviderError::EmptyResponse);
        };

        if candidate.finish_reason.eq_ignore_ascii_case("SAFETY") {
            warn!("Generation blocked by safety filter");
            return Err(ProviderError::SafetyRejected(
                "generation blocked".to_string(),
            ));
        }

        let text: String = candidate
            .content
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect();

        if text.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        debug!(chars = text.len(), "Generation succeeded");
        Ok(text)
    }
}

fn classify_http_failure(status: reqwest::StatusCode, raw_body: &str) -> ProviderError {
    let parsed: ErrorResponse = serde_json::from_str(raw_body).unwrap_or_default();
    let message = if parsed.error.message.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        parsed.error.message.clone()
    };

    // Structured status first
    match parsed.error.status.as_str() {
        "INVALID_ARGUMENT" if message.contains("API_KEY_INVALID") => {
            return ProviderError::InvalidApiKey(message);
        }
        "UNAUTHENTICATED" => return ProviderError::InvalidApiKey(message),
        "RESOURCE_EXHAUSTED" => return ProviderError::QuotaExceeded(message),
        "PERMISSION_DENIED" => return ProviderError::PermissionDenied(message),
        _ => {}
    }

    match status.as_u16() {
        401 => return ProviderError::InvalidApiKey(message),
        403 => return ProviderError::PermissionDenied(message),
        429 => return ProviderError::QuotaExceeded(message),
        _ => {}
    }

    classify_message(&message)
}

/// Text heuristics, used only when the provider gave no structured code.
fn classify_message(message: &str) -> ProviderError {
    let lower = message.to_lowercase();
    if message.contains("API_KEY_INVALID") || lower.contains("invalid") {
        ProviderError::InvalidApiKey(message.to_string())
    } else if message.contains("QUOTA_EXCEEDED") || lower.contains("quota") {
        ProviderError::QuotaExceeded(message.to_string())
    } else if lower.contains("safety") {
        ProviderError::SafetyRejected(message.to_string())
    } else if lower.contains("permission") || lower.contains("forbidden") {
        ProviderError::PermissionDenied(message.to_string())
    } else {
        ProviderError::Unknown(message.to_string())
    }
}
