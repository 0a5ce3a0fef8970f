use async_trait::async_trait;
use dotenv::dotenv;
use reqwest::Client;
use std::env;
use thiserror::Error;
use tracing::debug;

use super::endpoints::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Provider, ResponseFormat};
use super::{GeneratedImage, ImageGenerator, ReplyFormat, TextGenerator};
use crate::config::{StageConfig, DEFAULT_BASE_URL};

const JSON_SYSTEM_PROMPT: &str = "/no_thinking
You are a cooking assistant for a meal-planning service. Answer with a single JSON object and nothing else. Do not wrap it in markdown fences.";

#[derive(Debug, Error)]
pub enum ApiConnectionError {
    #[error("API key not found in environment: {0}")]
    MissingApiKey(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("API error {status}: {error_body}")]
    ApiError {
        status: reqwest::StatusCode,
        error_body: String,
    },
    #[error("API response contained no {0}")]
    EmptyResponse(&'static str),
    #[error("Invalid image data: {0}")]
    InvalidImageData(String),
}

impl Provider {
    pub fn openrouter(api_key_env_var_name: &str) -> Self {
        Self::openrouter_with_base_url(api_key_env_var_name, DEFAULT_BASE_URL)
    }

    pub fn openrouter_with_base_url(api_key_env_var_name: &str, base_url: &str) -> Self {
        dotenv().ok();
        Self::OpenRouter {
            api_key: api_key_env_var_name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub async fn call_chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ApiConnectionError> {
        match self {
            Provider::OpenRouter {
                api_key: api_key_env_var_name,
                base_url,
                client,
                ..
            } => {
                let actual_api_key = env::var(api_key_env_var_name)
                    .map_err(|_| ApiConnectionError::MissingApiKey(api_key_env_var_name.clone()))?;

                let url = format!("{}/chat/completions", base_url);
                let site_url = env::var("SITE_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
                let app_name = env::var("APP_NAME").unwrap_or_else(|_| "MealPlanner".to_string());

                debug!(model = %request.model, "Sending chat completion request");
                let response = client
                    .post(&url)
                    .bearer_auth(actual_api_key)
                    .header("Content-Type", "application/json")
                    .header("HTTP-Referer", site_url)
                    .header("X-Title", app_name)
                    .json(&request)
                    .send()
                    .await?;

                if response.status().is_success() {
                    let chat_response = response.json::<ChatCompletionResponse>().await?;
                    Ok(chat_response)
                } else {
                    let status = response.status();
                    let error_body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Failed to read error body".to_string());
                    Err(ApiConnectionError::ApiError { status, error_body })
                }
            }
        }
    }
}

#[async_trait]
impl TextGenerator for Provider {
    async fn generate_text(
        &self,
        prompt: &str,
        config: &StageConfig,
        format: ReplyFormat,
    ) -> Result<String, ApiConnectionError> {
        let (messages, response_format) = match format {
            ReplyFormat::Json => (
                vec![ChatMessage::system(JSON_SYSTEM_PROMPT), ChatMessage::user(prompt)],
                Some(ResponseFormat::json_object()),
            ),
            ReplyFormat::PlainText => (vec![ChatMessage::user(prompt)], None),
        };
        let request = ChatCompletionRequest {
            model: config.model.clone(),
            messages,
            response_format,
            modalities: None,
            temperature: Some(config.temperature),
            max_tokens: Some(config.max_tokens),
        };

        let response = self.call_chat_completion(request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ApiConnectionError::EmptyResponse("text content"))
    }

    fn provider_name(&self) -> &str {
        match self {
            Provider::OpenRouter { .. } => "openrouter",
        }
    }
}

#[async_trait]
impl ImageGenerator for Provider {
    async fn generate_image(
        &self,
        prompt: &str,
        config: &StageConfig,
    ) -> Result<GeneratedImage, ApiConnectionError> {
        let request = ChatCompletionRequest {
            model: config.model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            response_format: None,
            modalities: Some(vec!["image".to_string(), "text".to_string()]),
            temperature: Some(config.temperature),
            max_tokens: Some(config.max_tokens),
        };

        let response = self.call_chat_completion(request).await?;
        let url = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.images.into_iter().next())
            .map(|image| image.image_url.url)
            .ok_or(ApiConnectionError::EmptyResponse("image"))?;
        GeneratedImage::from_url(url)
    }
}
