//! 视觉模型客户端
//!
//! OpenAI 兼容的 chat/completions：一条 user 消息，包含问题文本与 `image_url` 形式的 base64 data URI。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::VisionSection;
use crate::core::AgentError;

/// 视觉模型：图片 + 问题 -> 描述
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn describe(&self, image: &[u8], mime_type: &str, question: &str)
        -> Result<String, AgentError>;
}

/// OpenAI 兼容视觉客户端（默认 DashScope qwen-vl-max）
pub struct OpenAiVisionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiVisionClient {
    /// base_url 为 OpenAI 兼容端点前缀（如 `.../compatible-mode/v1`）
    ///
    /// # Errors
    ///
    /// API Key 为空或 HTTP 客户端无法构建时返回 ConfigError
    pub fn new(
        section: &VisionSection,
        base_url: &str,
        api_key: impl Into<String>,
    ) -> Result<Self, AgentError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(AgentError::ConfigError(
                "API key required for vision".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs))
            .build()
            .map_err(|e| AgentError::ConfigError(format!("vision http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: section.model.clone(),
            max_tokens: section.max_tokens,
            temperature: section.temperature,
        })
    }
}

/// `data:<mime>;base64,<...>`
pub fn data_uri(image: &[u8], mime_type: &str) -> String {
    format!(
        "data:{mime_type};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(image)
    )
}

#[async_trait]
impl VisionClient for OpenAiVisionClient {
    async fn describe(
        &self,
        image: &[u8],
        mime_type: &str,
        question: &str,
    ) -> Result<String, AgentError> {
        let url = data_uri(image, mime_type);
        tracing::debug!(image_kb = url.len() / 1024, model = %self.model, "vision request");

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: question },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url },
                    },
                ],
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::VisionError(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();
            return Err(AgentError::VisionError(format!("API error {status}: {body}")));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::VisionError(format!("Parse error: {e}")))?;

        let description = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        if description.is_empty() {
            return Err(AgentError::VisionError(
                "Empty response from vision API".to_string(),
            ));
        }
        tracing::debug!(description = %description, "screen described");
        Ok(description)
    }
}

/// 本地运行 / 测试用：返回固定描述或失败
#[derive(Debug, Default)]
pub struct MockVisionClient {
    reply: Option<String>,
    calls: AtomicUsize,
    last_question: Mutex<Option<String>>,
}

impl MockVisionClient {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            ..Self::default()
        }
    }

    /// 每次调用都失败
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_question(&self) -> Option<String> {
        self.last_question.lock().ok().and_then(|q| q.clone())
    }
}

#[async_trait]
impl VisionClient for MockVisionClient {
    async fn describe(
        &self,
        image: &[u8],
        _mime_type: &str,
        question: &str,
    ) -> Result<String, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut q) = self.last_question.lock() {
            *q = Some(question.to_string());
        }
        match &self.reply {
            Some(reply) => Ok(reply.clone()),
            None => Err(AgentError::VisionError(format!(
                "mock vision unavailable ({} bytes)",
                image.len()
            ))),
        }
    }
}
