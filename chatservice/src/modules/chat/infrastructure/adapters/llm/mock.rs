use async_trait::async_trait;
use futures::stream;

use crate::modules::chat::ports::{
    ChunkStream, CompletionRequest, FinishReason, LLMError, LLMPort, StreamChunk,
};

/// 模拟回复时每个内容块的字符数
const MOCK_CHUNK_CHARS: usize = 5;

/// 模拟 LLM 适配器
///
/// 未配置 API Key 时使用。默认回显最后一条消息，也可以指定固定的增量序列
#[derive(Debug, Clone, Default)]
pub struct MockLLMAdapter {
    script: Option<Vec<String>>,
    failure: Option<String>,
}

impl MockLLMAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按顺序返回给定的增量
    pub fn scripted<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Some(deltas.into_iter().map(Into::into).collect()),
            failure: None,
        }
    }

    /// 输出全部增量后以提供商错误结束
    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    fn echo(request: &CompletionRequest) -> Vec<String> {
        let user_content = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let response_content = format!(
            "你好！我收到了你的消息：「{}」\n\n这是一个模拟的回复。要使用真正的 LLM，请配置 API Key。",
            user_content
        );

        response_content
            .chars()
            .collect::<Vec<_>>()
            .chunks(MOCK_CHUNK_CHARS)
            .map(|c| c.iter().collect::<String>())
            .collect()
    }
}

#[async_trait]
impl LLMPort for MockLLMAdapter {
    fn provider_id(&self) -> &str {
        "mock"
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<ChunkStream, LLMError> {
        let deltas = match &self.script {
            Some(script) => script.clone(),
            None => Self::echo(&request),
        };

        let last = deltas.len().saturating_sub(1);
        let finishes = self.failure.is_none();
        let mut items: Vec<Result<StreamChunk, LLMError>> = deltas
            .into_iter()
            .enumerate()
            .map(|(i, content)| {
                Ok(StreamChunk {
                    content,
                    finish_reason: (finishes && i == last).then_some(FinishReason::Stop),
                    usage: None,
                })
            })
            .collect();

        if let Some(message) = &self.failure {
            items.push(Err(LLMError::Unknown(message.clone())));
        }

        Ok(Box::pin(stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::chat::ports::LLMChatMessage;
    use futures::StreamExt;

    fn request(content: &str) -> CompletionRequest {
        CompletionRequest::new(
            vec![LLMChatMessage {
                role: "user".to_string(),
                content: content.to_string(),
            }],
            "mock-model",
        )
    }

    #[tokio::test]
    async fn test_echoes_last_message() {
        let adapter = MockLLMAdapter::new();
        let stream = adapter.complete_stream(request("ping")).await.unwrap();
        let chunks: Vec<StreamChunk> = stream.map(|c| c.unwrap()).collect().await;

        let content: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert!(content.contains("「ping」"));
        assert_eq!(chunks.last().unwrap().finish_reason, Some(FinishReason::Stop));
        assert!(chunks.iter().all(|c| c.content.chars().count() <= MOCK_CHUNK_CHARS));
    }

    #[tokio::test]
    async fn test_scripted_then_failure() {
        let adapter = MockLLMAdapter::scripted(["a", "b"]).failing_with("boom");
        let results: Vec<_> = adapter
            .complete_stream(request("x"))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[1].as_ref().unwrap().content, "b");
        assert_eq!(results[1].as_ref().unwrap().finish_reason, None);
        assert!(matches!(&results[2], Err(LLMError::Unknown(m)) if m == "boom"));
    }
}
