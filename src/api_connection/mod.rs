//! Generative model access: text and image traits, the OpenRouter provider,
//! and a scripted fake used by tests.

pub mod connection;
pub mod endpoints;
pub mod fake;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt::Debug;

use crate::config::StageConfig;
use connection::ApiConnectionError;

/// How the model is asked to shape its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyFormat {
    Json,
    PlainText,
}

/// Prompt in, untrusted completion text out.
#[async_trait]
pub trait TextGenerator: Send + Sync + Debug {
    async fn generate_text(
        &self,
        prompt: &str,
        config: &StageConfig,
        format: ReplyFormat,
    ) -> Result<String, ApiConnectionError>;

    fn provider_name(&self) -> &str;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync + Debug {
    async fn generate_image(
        &self,
        prompt: &str,
        config: &StageConfig,
    ) -> Result<GeneratedImage, ApiConnectionError>;
}

/// A usable image reference: an http(s) URL or a base64 data URL.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub url: String,
    /// Decoded size for inline data URLs.
    pub byte_len: Option<usize>,
}

impl GeneratedImage {
    pub fn from_url(url: String) -> Result<Self, ApiConnectionError> {
        if let Some(rest) = url.strip_prefix("data:") {
            let (_, payload) = rest.split_once(";base64,").ok_or_else(|| {
                ApiConnectionError::InvalidImageData("data URL is not base64 encoded".to_string())
            })?;
            let bytes = STANDARD
                .decode(payload.trim())
                .map_err(|e| ApiConnectionError::InvalidImageData(e.to_string()))?;
            if bytes.is_empty() {
                return Err(ApiConnectionError::InvalidImageData("empty image payload".to_string()));
            }
            return Ok(Self {
                url,
                byte_len: Some(bytes.len()),
            });
        }

        if url.starts_with("https://") || url.starts_with("http://") {
            Ok(Self { url, byte_len: None })
        } else {
            Err(ApiConnectionError::InvalidImageData(format!(
                "unsupported image reference: {}",
                url.chars().take(40).collect::<String>()
            )))
        }
    }
}
