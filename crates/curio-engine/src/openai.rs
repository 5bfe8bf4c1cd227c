use std::env;
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;

use crate::gateway::{GatewayError, InferenceGateway, Prompt};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
const PLACEHOLDER_API_KEY: &str = "your-openai-api-key-here";

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("OpenAI API key is not configured; set OPENAI_API_KEY")]
    MissingApiKey,
    #[error("OpenAI API key is still the placeholder value; set a real OPENAI_API_KEY")]
    PlaceholderApiKey,
    #[error("invalid {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
    #[error("failed to build HTTP client")]
    HttpClient(#[source] reqwest::Error),
}

#[derive(Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GatewayConfig {
    /// Reads the credential and endpoint settings once at startup.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigurationError> {
        let first_non_empty = |keys: &[&str]| -> Option<String> {
            keys.iter().find_map(|key| {
                lookup(key)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
        };

        let api_key = first_non_empty(&["OPENAI_API_KEY", "OPENAI_API_KEY_BACKUP"])
            .ok_or(ConfigurationError::MissingApiKey)?;
        if api_key == PLACEHOLDER_API_KEY {
            return Err(ConfigurationError::PlaceholderApiKey);
        }

        let api_base = normalize_api_base(
            &first_non_empty(&["OPENAI_API_BASE", "OPENAI_BASE_URL"])
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        )?;
        let model = first_non_empty(&["CURIO_VISION_MODEL"])
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let timeout_secs = match first_non_empty(&["CURIO_GATEWAY_TIMEOUT_SECS"]) {
            None => DEFAULT_TIMEOUT_SECS,
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| ConfigurationError::InvalidValue {
                    name: "CURIO_GATEWAY_TIMEOUT_SECS",
                    reason: format!("{raw:?} is not a positive integer"),
                })?,
        };

        Ok(Self {
            api_key,
            api_base,
            model,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn normalize_api_base(raw: &str) -> Result<String, ConfigurationError> {
    let mut base = raw.trim().trim_end_matches('/').to_string();
    let parsed = reqwest::Url::parse(&base).map_err(|err| ConfigurationError::InvalidValue {
        name: "OPENAI_API_BASE",
        reason: err.to_string(),
    })?;
    if parsed.path().trim().is_empty() || parsed.path() == "/" {
        base = format!("{base}/v1");
    }
    Ok(base.trim_end_matches('/').to_string())
}

/// Vision-capable text generation over the OpenAI Responses API.
pub struct OpenAiGateway {
    config: GatewayConfig,
    http: HttpClient,
}

impl OpenAiGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigurationError> {
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ConfigurationError::HttpClient)?;
        Ok(Self { config, http })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn request_payload(&self, prompt: &Prompt<'_>, max_output_tokens: u64) -> Value {
        let mut content = vec![json!({"type": "input_text", "text": prompt.text})];
        if let Some(image) = prompt.image {
            content.push(json!({"type": "input_image", "image_url": image.data_url()}));
        }
        json!({
            "model": self.config.model,
            "input": [{
                "role": "user",
                "content": content,
            }],
            "max_output_tokens": max_output_tokens,
        })
    }
}

impl InferenceGateway for OpenAiGateway {
    fn name(&self) -> &str {
        "openai"
    }

    fn generate(&self, prompt: &Prompt<'_>, max_output_tokens: u64) -> Result<String, GatewayError> {
        let endpoint = format!("{}/responses", self.config.api_base);
        let payload = self.request_payload(prompt, max_output_tokens);
        debug!(
            stage = %prompt.stage,
            model = %self.config.model,
            with_image = prompt.image.is_some(),
            "sending inference request"
        );

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.config.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .map_err(|err| transport_error(&err, self.config.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| transport_error(&err, self.config.timeout))?;
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GatewayError::unauthorized(format!(
                "OpenAI rejected the credential ({}): {}",
                status.as_u16(),
                truncate_text(&body, 256)
            )));
        }
        if !status.is_success() {
            return Err(GatewayError::unavailable(format!(
                "OpenAI request failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            )));
        }

        let parsed: Value = serde_json::from_str(&body).map_err(|err| {
            GatewayError::unavailable(format!("OpenAI returned invalid JSON payload: {err}"))
        })?;
        let text = extract_output_text(&parsed);
        if text.is_empty() {
            return Err(GatewayError::empty_response(
                "OpenAI response contained no output text",
            ));
        }
        Ok(text)
    }
}

fn transport_error(err: &reqwest::Error, timeout: Duration) -> GatewayError {
    if err.is_timeout() {
        return GatewayError::unavailable(format!(
            "OpenAI request timed out after {}s",
            timeout.as_secs()
        ));
    }
    GatewayError::unavailable(format!("OpenAI transport error: {err}"))
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

/// Joins every `output_text` chunk of a Responses API payload.
fn extract_output_text(response: &Value) -> String {
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return text.trim().to_string();
        }
    }

    let mut parts: Vec<String> = Vec::new();
    let rows = response
        .get("output")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for row in rows {
        let Some(obj) = row.as_object() else {
            continue;
        };
        if let Some(kind) = obj.get("type").and_then(Value::as_str) {
            if matches!(kind, "output_text" | "text") {
                push_text(&mut parts, obj.get("text"));
                continue;
            }
            if kind != "message" {
                continue;
            }
        }
        let chunks = obj
            .get("content")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for chunk in chunks {
            let kind = chunk.get("type").and_then(Value::as_str).unwrap_or_default();
            if matches!(kind, "output_text" | "text") {
                push_text(&mut parts, chunk.get("text"));
            }
        }
    }

    parts.join("\n").trim().to_string()
}

fn push_text(parts: &mut Vec<String>, value: Option<&Value>) {
    if let Some(text) = value.and_then(Value::as_str) {
        if !text.trim().is_empty() {
            parts.push(text.trim().to_string());
        }
    }
}
