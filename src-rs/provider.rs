//! AI backend boundary: provider configuration and the chat-completions client.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use crate::error::{AltError, AltResult};
use crate::source::ImagePayload;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const DESCRIBE_SYSTEM_PROMPT: &str = "You are an accessibility expert writing alternative text for images on web pages. \
Describe the image concisely for a screen reader user in one or two sentences. \
Do not start with \"Image of\" or \"Picture of\". Reply with the alt text only, without quotes.";

const DESCRIBE_USER_PROMPT: &str = "Write alt text for this image.";

const TRANSLATE_SYSTEM_PROMPT: &str = "You are a professional translator. \
Translate the given image alternative text into English, preserving its nuance, tone, and level of detail. \
If it is already English, return it unchanged. Reply with the translation only, without quotes.";

pub trait AltTextBackend {
    /// Suggested alt text for an image.
    fn describe(&self, image: &ImagePayload) -> AltResult<String>;

    /// English translation of existing alt text.
    fn translate(&self, alt: &str) -> AltResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Mistral,
}

impl ProviderKind {
    pub fn default_endpoint(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1/chat/completions",
            ProviderKind::Mistral => "https://api.mistral.ai/v1/chat/completions",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Mistral => "pixtral-12b-2409",
        }
    }

    fn key_env(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Mistral => "MISTRAL_API_KEY",
        }
    }

    fn image_part(self, url: String) -> Value {
        match self {
            ProviderKind::OpenAi => json!({"type": "image_url", "image_url": {"url": url}}),
            ProviderKind::Mistral => json!({"type": "image_url", "image_url": url}),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenAi => f.write_str("openai"),
            ProviderKind::Mistral => f.write_str("mistral"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = AltError;

    fn from_str(raw: &str) -> AltResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "mistral" => Ok(ProviderKind::Mistral),
            other => Err(AltError::ProviderConfig(format!(
                "unknown provider {other:?} (expected openai or mistral)"
            ))),
        }
    }
}

/// Explicit per-invocation provider settings.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Values given on the command line; unset fields fall back to the environment.
#[derive(Debug, Clone, Default)]
pub struct ProviderOverrides {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn from_env(overrides: &ProviderOverrides) -> AltResult<Self> {
        Self::resolve(overrides, |name| env::var(name).ok())
    }

    pub fn resolve(
        overrides: &ProviderOverrides,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> AltResult<Self> {
        let pick = |flag: &Option<String>, names: &[&str]| -> Option<String> {
            non_empty(flag.clone()).or_else(|| names.iter().find_map(|name| non_empty(lookup(name))))
        };

        let provider = match pick(&overrides.provider, &["IMG_ALT_PROVIDER"]) {
            Some(raw) => raw.parse()?,
            None => ProviderKind::OpenAi,
        };
        let api_key = pick(&overrides.api_key, &["IMG_ALT_API_KEY", provider.key_env()])
            .ok_or_else(|| {
                AltError::ProviderConfig(format!(
                    "no API key for {provider}; pass --api-key or set IMG_ALT_API_KEY / {}",
                    provider.key_env()
                ))
            })?;
        let endpoint = pick(&overrides.endpoint, &["IMG_ALT_ENDPOINT"])
            .unwrap_or_else(|| provider.default_endpoint().to_string());
        let model = pick(&overrides.model, &["IMG_ALT_MODEL"])
            .unwrap_or_else(|| provider.default_model().to_string());

        Ok(Self {
            provider,
            api_key,
            endpoint,
            model,
            timeout: Duration::from_secs(overrides.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS).max(1)),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub struct HttpBackend {
    config: ProviderConfig,
    client: HttpClient,
}

impl HttpBackend {
    pub fn new(config: ProviderConfig) -> AltResult<Self> {
        let client = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| AltError::ProviderRequest(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { config, client })
    }

    fn complete(&self, body: &Value) -> AltResult<String> {
        tracing::info!(
            provider = %self.config.provider,
            model = %self.config.model,
            endpoint = %self.config.endpoint,
            "sending provider request"
        );
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .map_err(|err| AltError::ProviderRequest(err.to_string()))?;

        let status = response.status();
        tracing::debug!(status = status.as_u16(), "provider responded");
        let raw = response
            .text()
            .map_err(|err| AltError::ProviderRequest(format!("failed to read response body: {err}")))?;
        if !status.is_success() {
            return Err(AltError::ProviderRequest(error_message(status.as_u16(), &raw)));
        }

        let parsed: Value = serde_json::from_str(&raw)
            .map_err(|err| AltError::ProviderRequest(format!("invalid response JSON: {err}")))?;
        extract_message_text(&parsed)
            .ok_or_else(|| AltError::ProviderRequest("response contained no text".to_string()))
    }
}

impl AltTextBackend for HttpBackend {
    fn describe(&self, image: &ImagePayload) -> AltResult<String> {
        self.complete(&describe_request(&self.config, image))
    }

    fn translate(&self, alt: &str) -> AltResult<String> {
        self.complete(&translate_request(&self.config, alt))
    }
}

pub fn describe_request(config: &ProviderConfig, image: &ImagePayload) -> Value {
    json!({
        "model": config.model,
        "messages": [
            {"role": "system", "content": DESCRIBE_SYSTEM_PROMPT},
            {
                "role": "user",
                "content": [
                    {"type": "text", "text": DESCRIBE_USER_PROMPT},
                    config.provider.image_part(image.to_url()),
                ],
            },
        ],
    })
}

pub fn translate_request(config: &ProviderConfig, alt: &str) -> Value {
    json!({
        "model": config.model,
        "messages": [
            {"role": "system", "content": TRANSLATE_SYSTEM_PROMPT},
            {"role": "user", "content": alt},
        ],
    })
}

/// `choices[0].message.content`, as a string or a list of text parts.
pub fn extract_message_text(response: &Value) -> Option<String> {
    let content = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))?;

    let text = match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => return None,
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Best-effort message from an error body; unparseable bodies get a generic one.
pub fn error_message(status: u16, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        value
            .get("error")
            .and_then(|err| err.get("message").or(Some(err)))
            .and_then(Value::as_str)
            .or_else(|| value.get("message").and_then(Value::as_str))
            .or_else(|| value.get("detail").and_then(Value::as_str))
            .map(str::to_string)
    });
    match detail {
        Some(detail) => format!("HTTP {status}: {detail}"),
        None => format!("HTTP {status}: request was not successful"),
    }
}
