//! Scripted model for tests.
//!
//! Replies are picked by checking whether the prompt contains a registered
//! substring (case-insensitive, first registered rule wins), so pipeline
//! runs are deterministic and need no network access.

use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};

use super::connection::ApiConnectionError;
use super::{GeneratedImage, ImageGenerator, ReplyFormat, TextGenerator};
use crate::config::StageConfig;

#[derive(Debug, Clone)]
pub enum FakeReply {
    Text(String),
    Image(String),
    Fail(String),
}

#[derive(Debug, Default)]
pub struct FakeModel {
    rules: Mutex<Vec<(String, FakeReply)>>,
    default_reply: Option<FakeReply>,
    prompts: Mutex<Vec<String>>,
}

impl FakeModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A model whose every call fails, as if the API were down.
    pub fn unavailable() -> Self {
        Self::new().with_default_reply(FakeReply::Fail("model unavailable".to_string()))
    }

    pub fn with_default_reply(mut self, reply: FakeReply) -> Self {
        self.default_reply = Some(reply);
        self
    }

    pub fn with_reply(self, prompt_contains: &str, reply: FakeReply) -> Self {
        self.add_reply(prompt_contains, reply);
        self
    }

    pub fn add_reply(&self, prompt_contains: &str, reply: FakeReply) {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((prompt_contains.to_lowercase(), reply));
    }

    /// Every prompt received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn reply_for(&self, prompt: &str) -> Option<FakeReply> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());

        let prompt_lower = prompt.to_lowercase();
        let rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        rules
            .iter()
            .find(|(pattern, _)| prompt_lower.contains(pattern))
            .map(|(_, reply)| reply.clone())
            .or_else(|| self.default_reply.clone())
    }
}

fn scripted_failure(message: String) -> ApiConnectionError {
    ApiConnectionError::ApiError {
        status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        error_body: message,
    }
}

#[async_trait]
impl TextGenerator for FakeModel {
    async fn generate_text(
        &self,
        prompt: &str,
        _config: &StageConfig,
        _format: ReplyFormat,
    ) -> Result<String, ApiConnectionError> {
        match self.reply_for(prompt) {
            Some(FakeReply::Text(text)) => Ok(text),
            Some(FakeReply::Image(_)) => Err(ApiConnectionError::EmptyResponse("text content")),
            Some(FakeReply::Fail(message)) => Err(scripted_failure(message)),
            None => Err(ApiConnectionError::EmptyResponse("scripted reply")),
        }
    }

    fn provider_name(&self) -> &str {
        "fake"
    }
}

#[async_trait]
impl ImageGenerator for FakeModel {
    async fn generate_image(
        &self,
        prompt: &str,
        _config: &StageConfig,
    ) -> Result<GeneratedImage, ApiConnectionError> {
        match self.reply_for(prompt) {
            Some(FakeReply::Image(url)) => GeneratedImage::from_url(url),
            Some(FakeReply::Text(_)) => Err(ApiConnectionError::EmptyResponse("image")),
            Some(FakeReply::Fail(message)) => Err(scripted_failure(message)),
            None => Err(ApiConnectionError::EmptyResponse("scripted reply")),
        }
    }
}
