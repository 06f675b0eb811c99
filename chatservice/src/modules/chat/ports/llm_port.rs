use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

use super::super::domain::{Chat, Message};

/// LLM 错误类型
#[derive(Debug, Error)]
pub enum LLMError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error: {code} - {message}")]
    ApiError { code: String, message: String },

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitError { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// 响应数据无法解析或无法组装成消息
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// 聊天消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LLMChatMessage {
    pub role: String,
    pub content: String,
}

impl From<&Message> for LLMChatMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role().to_openai_role().to_string(),
            content: message.content().to_string(),
        }
    }
}

/// 补全请求
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// 消息历史
    pub messages: Vec<LLMChatMessage>,
    /// 模型 ID
    pub model: String,
    /// 最大生成 token 数
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// 候选回复数量
    pub n: Option<u32>,
    /// 停止序列
    pub stop_sequences: Option<Vec<String>>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    /// 终端用户标识
    pub user: Option<String>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<LLMChatMessage>, model: impl Into<String>) -> Self {
        Self {
            messages,
            model: model.into(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            n: None,
            stop_sequences: None,
            presence_penalty: None,
            frequency_penalty: None,
            user: None,
        }
    }

    /// 根据对话的完整历史和生成参数构建请求
    pub fn from_chat(chat: &Chat) -> Self {
        let config = chat.config();
        let mut request = Self::new(
            chat.messages().iter().map(LLMChatMessage::from).collect(),
            config.model.name(),
        );

        // max_tokens 为 0 表示不限制回复长度
        if config.max_tokens > 0 {
            request.max_tokens = Some(config.max_tokens);
        }
        request.temperature = Some(config.temperature);
        request.top_p = Some(config.top_p);
        request.n = Some(config.n);
        if !config.stop.is_empty() {
            request.stop_sequences = Some(config.stop.clone());
        }
        request.presence_penalty = Some(config.presence_penalty);
        request.frequency_penalty = Some(config.frequency_penalty);
        request.user = Some(chat.user_id().to_string());
        request
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }
}

/// 流式响应块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    /// 内容块
    pub content: String,
    /// 结束原因（最后一个块才有）
    pub finish_reason: Option<FinishReason>,
    /// Token 使用情况（最后一个块才有）
    pub usage: Option<TokenUsage>,
}

impl StreamChunk {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: None,
            usage: None,
        }
    }
}

/// 结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    FunctionCall,
}

impl FinishReason {
    pub fn parse(reason: &str) -> Option<Self> {
        match reason {
            "stop" => Some(FinishReason::Stop),
            "length" => Some(FinishReason::Length),
            "content_filter" => Some(FinishReason::ContentFilter),
            "function_call" | "tool_calls" => Some(FinishReason::FunctionCall),
            _ => None,
        }
    }
}

/// Token 使用统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// 流式补全的内容块序列：有限、惰性、不可重启
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LLMError>> + Send>>;

/// LLM 服务端口 - 核心抽象接口
///
/// 所有补全提供商适配器都必须实现此 trait
#[async_trait]
pub trait LLMPort: Send + Sync {
    /// 获取提供商 ID
    fn provider_id(&self) -> &str;

    /// 流式补全请求
    async fn complete_stream(&self, request: CompletionRequest) -> Result<ChunkStream, LLMError>;
}

/// LLM 提供商配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LLMProviderConfig {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for LLMProviderConfig {
    fn default() -> Self {
        Self {
            id: "openai".to_string(),
            name: "OpenAI".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            timeout_secs: 60,
        }
    }
}
