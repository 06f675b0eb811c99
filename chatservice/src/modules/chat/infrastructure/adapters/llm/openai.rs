use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use crate::modules::chat::ports::{
    ChunkStream, CompletionRequest, FinishReason, LLMError, LLMPort, LLMProviderConfig,
    StreamChunk, TokenUsage,
};

/// 限流时未返回 Retry-After 头的默认等待秒数
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// OpenAI API 适配器
///
/// 兼容所有实现 `/chat/completions` 流式接口的服务
pub struct OpenAIAdapter {
    client: Client,
    config: LLMProviderConfig,
}

impl OpenAIAdapter {
    /// 创建新的 OpenAI 适配器
    pub fn new(config: LLMProviderConfig) -> Result<Self, LLMError> {
        // 流式回复可能持续很久，只限制建立连接和两次读取之间的间隔
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| LLMError::NetworkError(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// 获取 API URL
    fn api_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint
        )
    }

    /// 转换为 OpenAI 请求格式
    fn to_openai_request(request: &CompletionRequest) -> OpenAIRequest {
        OpenAIRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| OpenAIMessage {
                    role: m.role.clone(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            n: request.n,
            stop: request.stop_sequences.clone(),
            presence_penalty: request.presence_penalty,
            frequency_penalty: request.frequency_penalty,
            user: request.user.clone(),
            stream: true,
        }
    }

    /// 将非 2xx 响应映射为 LLMError
    async fn error_from_response(&self, response: Response) -> LLMError {
        let status = response.status();
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        let error_text = response.text().await.unwrap_or_default();
        error!(
            "{} API error: {} - {}",
            self.config.name, status, error_text
        );

        match status {
            StatusCode::UNAUTHORIZED => LLMError::AuthenticationError(error_text),
            StatusCode::TOO_MANY_REQUESTS => LLMError::RateLimitError { retry_after_secs },
            _ => LLMError::ApiError {
                code: status.as_str().to_string(),
                message: error_text,
            },
        }
    }

    /// 解析 SSE 行
    ///
    /// 空行、注释和非 data 字段返回 None
    fn parse_sse_line(line: &str) -> Result<Option<SseEvent>, LLMError> {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };

        let data = data.trim_start();
        if data == "[DONE]" {
            return Ok(Some(SseEvent::Done));
        }

        serde_json::from_str(data)
            .map(|response| Some(SseEvent::Data(response)))
            .map_err(|e| LLMError::InvalidResponse(format!("{}: {}", e, data)))
    }

    /// 取第一个候选回复的增量
    fn to_chunk(response: OpenAIStreamResponse) -> Result<Option<StreamChunk>, LLMError> {
        if let Some(error) = response.error {
            return Err(LLMError::ApiError {
                code: error.code.unwrap_or_else(|| "stream_error".to_string()),
                message: error.message,
            });
        }

        let usage = response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        let Some(choice) = response.choices.into_iter().find(|c| c.index == 0) else {
            return Ok(usage.map(|usage| StreamChunk {
                content: String::new(),
                finish_reason: None,
                usage: Some(usage),
            }));
        };

        let finish_reason = choice.finish_reason.as_deref().and_then(FinishReason::parse);
        if choice.delta.content.is_none() && finish_reason.is_none() && usage.is_none() {
            // 只包含 role 的首个增量
            return Ok(None);
        }

        Ok(Some(StreamChunk {
            content: choice.delta.content.unwrap_or_default(),
            finish_reason,
            usage,
        }))
    }

    /// 将字节流解码为内容块流
    ///
    /// 按换行切分（字节级别，避免截断多字节字符），遇到 `[DONE]` 结束
    fn decode_sse(bytes: BoxStream<'static, Result<Vec<u8>, LLMError>>) -> ChunkStream {
        let state = SseState {
            bytes,
            buffer: Vec::new(),
            eof: false,
            finished: false,
            saw_finish: false,
        };

        Box::pin(stream::unfold(state, |mut state| async move {
            loop {
                if state.finished {
                    return None;
                }

                // 处理缓冲区中所有完整的行
                if let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);

                    match OpenAIAdapter::parse_sse_line(&line) {
                        Ok(None) => continue,
                        Ok(Some(SseEvent::Done)) => {
                            state.finished = true;
                            return None;
                        }
                        Ok(Some(SseEvent::Data(response))) => {
                            match OpenAIAdapter::to_chunk(response) {
                                Ok(None) => continue,
                                Ok(Some(chunk)) => {
                                    state.saw_finish |= chunk.finish_reason.is_some();
                                    return Some((Ok(chunk), state));
                                }
                                Err(e) => {
                                    state.finished = true;
                                    return Some((Err(e), state));
                                }
                            }
                        }
                        Err(e) => {
                            state.finished = true;
                            return Some((Err(e), state));
                        }
                    }
                }

                if state.eof {
                    state.finished = true;
                    if state.saw_finish {
                        return None;
                    }
                    return Some((
                        Err(LLMError::NetworkError(
                            "stream closed before completion finished".to_string(),
                        )),
                        state,
                    ));
                }

                match state.bytes.next().await {
                    Some(Ok(bytes)) => state.buffer.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                    None => {
                        state.eof = true;
                        // 末尾没有换行的残余数据
                        if !state.buffer.is_empty() {
                            state.buffer.push(b'\n');
                        }
                    }
                }
            }
        }))
    }
}

#[async_trait]
impl LLMPort for OpenAIAdapter {
    fn provider_id(&self) -> &str {
        &self.config.id
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<ChunkStream, LLMError> {
        let openai_request = Self::to_openai_request(&request);

        debug!(
            "Sending streaming request to {}: model={}, messages={}",
            self.config.name,
            openai_request.model,
            openai_request.messages.len()
        );

        let response = self
            .client
            .post(self.api_url("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&openai_request)
            .send()
            .await
            .map_err(|e| LLMError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.error_from_response(response).await);
        }

        let bytes = response
            .bytes_stream()
            .map(|result| {
                result
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| LLMError::NetworkError(e.to_string()))
            })
            .boxed();

        Ok(Self::decode_sse(bytes))
    }
}

/// SSE 解码状态
struct SseState {
    bytes: BoxStream<'static, Result<Vec<u8>, LLMError>>,
    buffer: Vec<u8>,
    eof: bool,
    finished: bool,
    saw_finish: bool,
}

enum SseEvent {
    Data(OpenAIStreamResponse),
    Done,
}

// OpenAI API 类型定义

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
    #[serde(default)]
    error: Option<OpenAIErrorBody>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    delta: OpenAIDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorBody {
    message: String,
    #[serde(default)]
    code: Option<String>,
}
