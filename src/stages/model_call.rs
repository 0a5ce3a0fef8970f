//! The call-model, parse-JSON, clamp protocol shared by every AI-backed stage.
//!
//! A model reply is untrusted text. [`ModelCall::ask`] never fails: it either
//! yields the parsed JSON object or the reason the caller must run its
//! deterministic fallback.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api_connection::connection::ApiConnectionError;
use crate::api_connection::{ReplyFormat, TextGenerator};
use crate::config::StageConfig;
use crate::error::StageKind;

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    /// No credential, network failure, API error or empty reply.
    Unavailable(String),
    NoJsonObject,
    InvalidJson(String),
    /// Parsed, but a required part of the reply is missing.
    Incomplete(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::Unavailable(cause) => write!(f, "model unavailable: {}", cause),
            FallbackReason::NoJsonObject => write!(f, "reply contained no JSON object"),
            FallbackReason::InvalidJson(cause) => write!(f, "reply was not valid JSON: {}", cause),
            FallbackReason::Incomplete(what) => write!(f, "reply was incomplete: {}", what),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Parsed(Map<String, Value>),
    Unusable(FallbackReason),
}

#[derive(Debug, Clone)]
pub struct ModelCall {
    kind: StageKind,
    generator: Arc<dyn TextGenerator>,
    config: StageConfig,
}

impl ModelCall {
    pub fn new(kind: StageKind, generator: Arc<dyn TextGenerator>, config: StageConfig) -> Self {
        Self {
            kind,
            generator,
            config,
        }
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub async fn ask(&self, prompt: &str) -> ModelReply {
        let reply = match self
            .generator
            .generate_text(prompt, &self.config, ReplyFormat::Json)
            .await
        {
            Ok(text) => parse_reply(&text),
            Err(err) => ModelReply::Unusable(FallbackReason::Unavailable(err.to_string())),
        };
        match &reply {
            ModelReply::Parsed(_) => debug!(
                stage = %self.kind,
                provider = self.generator.provider_name(),
                "Model reply parsed"
            ),
            ModelReply::Unusable(reason) => self.note_fallback(reason),
        }
        reply
    }

    /// Free-text call for secondary prompts; errors are left to the caller.
    pub async fn ask_text(&self, prompt: &str) -> Result<String, ApiConnectionError> {
        self.generator
            .generate_text(prompt, &self.config, ReplyFormat::PlainText)
            .await
    }

    pub fn note_fallback(&self, reason: &FallbackReason) {
        warn!(stage = %self.kind, reason = %reason, "Using deterministic fallback");
    }
}

/// Slice from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_reply(text: &str) -> ModelReply {
    let Some(candidate) = extract_json_object(text) else {
        return ModelReply::Unusable(FallbackReason::NoJsonObject);
    };
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) => ModelReply::Parsed(object),
        Ok(_) => ModelReply::Unusable(FallbackReason::InvalidJson(
            "top-level value is not an object".to_string(),
        )),
        Err(err) => ModelReply::Unusable(FallbackReason::InvalidJson(err.to_string())),
    }
}

// --- Lenient field access ---

/// Numbers, or numeric strings such as `"30"`.
pub fn as_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

pub fn field_f64(object: &Map<String, Value>, key: &str, default: f64, min: f64, max: f64) -> f64 {
    object
        .get(key)
        .and_then(as_f64)
        .unwrap_or(default)
        .clamp(min, max)
}

pub fn field_u32(object: &Map<String, Value>, key: &str, default: u32, min: u32, max: u32) -> u32 {
    object
        .get(key)
        .and_then(as_f64)
        .map(|v| v.round().clamp(f64::from(min), f64::from(max)) as u32)
        .unwrap_or(default)
        .clamp(min, max)
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn field_str(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(value_to_text)
}

/// A list of strings; a lone string becomes a one-element list, anything
/// else an empty list.
pub fn field_str_list(object: &Map<String, Value>, key: &str) -> Vec<String> {
    match object.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(value_to_text).collect(),
        Some(value @ Value::String(_)) => value_to_text(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

pub fn field_object<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    object.get(key).and_then(Value::as_object)
}

pub fn field_bool(object: &Map<String, Value>, key: &str) -> Option<bool> {
    match object.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
