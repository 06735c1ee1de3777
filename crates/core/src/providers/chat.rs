use crate::config::{missing_chat_api_key, ServiceSettings};
use crate::error::{ErrorKind, PipelineError};
use crate::traits::LanguageModel;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const BACKEND: &str = "chat completions";

/// OpenAI-compatible chat-completions client (xAI, OpenAI, local gateways).
pub struct ChatCompletionsClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl ChatCompletionsClient {
    /// A missing key is reported on the first completion, so ingestion-only
    /// callers can construct the client without one.
    pub fn new(
        base_url: &Url,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/chat/completions",
                base_url.as_str().trim_end_matches('/')
            ),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model: model.into(),
        })
    }

    pub fn from_settings(settings: &ServiceSettings) -> Result<Self, PipelineError> {
        let api_key = settings.require_chat_api_key().ok().map(str::to_string);
        Self::new(&settings.chat_url()?, api_key, settings.chat_model())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

fn first_answer(parsed: ChatResponse) -> Result<String, PipelineError> {
    parsed
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| {
            PipelineError::new(ErrorKind::ProviderResponse, "completion contained no answer")
        })
}

#[async_trait]
impl LanguageModel for ChatCompletionsClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String, PipelineError> {
        let api_key = self.api_key.as_deref().ok_or_else(missing_chat_api_key)?;

        let body = ChatRequest {
            model: &self.model,
            temperature,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key.trim())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::from_status(BACKEND, status, &text));
        }

        first_answer(response.json().await?)
    }
}
