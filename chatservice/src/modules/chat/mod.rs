// Chat Module - 聊天模块
//
// 实现六边形架构（Hexagonal Architecture）：
// - domain: 领域层，包含对话聚合、值对象和 token 计数服务
// - ports: 端口层，定义存储和补全提供商的抽象接口
// - infrastructure: 基础设施层，实现端口的具体适配器
// - application: 应用层，实现 CQRS 命令和查询处理器

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod ports;

// 重新导出常用类型
pub use application::{
    ApplicationError, ChatCompletionCommand, ChatCompletionConfigInput, ChatCompletionHandler,
    ChatCompletionOutput, CommandHandler, EndChatCommand, EndChatHandler, EndChatResponse,
    ErrorKind, GetChatHandler, GetChatQuery, GetChatResponse, QueryHandler, StreamEvent,
    TurnStage,
};

pub use domain::{
    Chat, ChatConfig, ChatError, ChatId, ChatStatus, Message, MessageId, MessageRole, Model,
    TokenCounter,
};

pub use infrastructure::{FileChatRepository, InMemoryChatRepository, MockLLMAdapter, OpenAIAdapter};

pub use ports::{
    ChatRepository, ChunkStream, CompletionRequest, FinishReason, LLMChatMessage, LLMError,
    LLMPort, LLMProviderConfig, RepositoryError, StreamChunk, TokenUsage,
};

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::modules::config::{AppConfig, StorageBackend};
use crate::shared::AppResult;

/// Chat 模块容器
///
/// 管理模块内的依赖注入
pub struct ChatModule {
    // Ports
    chat_repository: Arc<dyn ChatRepository>,
    llm_port: Arc<dyn LLMPort>,
    // Handlers
    completion_handler: ChatCompletionHandler,
    end_chat_handler: EndChatHandler,
    get_chat_handler: GetChatHandler,
}

impl ChatModule {
    /// 创建新的 ChatModule 实例（内存存储 + 模拟提供商，用于开发测试）
    pub fn new() -> Self {
        Self::with_dependencies(
            Arc::new(InMemoryChatRepository::new()),
            Arc::new(MockLLMAdapter::new()),
        )
    }

    /// 根据应用配置创建
    ///
    /// # Errors
    /// 文件存储无法初始化或 HTTP 客户端创建失败时返回错误
    pub async fn from_config(config: &AppConfig) -> AppResult<Self> {
        let chat_repository: Arc<dyn ChatRepository> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(InMemoryChatRepository::new()),
            StorageBackend::File => {
                Arc::new(FileChatRepository::new(config.storage.data_dir.clone()).await?)
            }
        };

        let llm_port: Arc<dyn LLMPort> = if config.llm.has_api_key() {
            Arc::new(OpenAIAdapter::new(config.llm.to_provider_config())?)
        } else {
            warn!("No API key configured, completions will be simulated");
            Arc::new(MockLLMAdapter::new())
        };

        info!(
            "Chat module initialized: storage={}, provider={}",
            config.storage.backend.as_str(),
            llm_port.provider_id()
        );

        Ok(Self::with_dependencies(chat_repository, llm_port))
    }

    /// 使用自定义仓储和提供商创建 ChatModule
    pub fn with_dependencies(
        chat_repository: Arc<dyn ChatRepository>,
        llm_port: Arc<dyn LLMPort>,
    ) -> Self {
        let completion_handler =
            ChatCompletionHandler::new(chat_repository.clone(), llm_port.clone());
        let end_chat_handler = EndChatHandler::new(chat_repository.clone());
        let get_chat_handler = GetChatHandler::new(chat_repository.clone());

        Self {
            chat_repository,
            llm_port,
            completion_handler,
            end_chat_handler,
            get_chat_handler,
        }
    }

    // Command handlers

    /// 执行一轮对话
    pub async fn complete(
        &self,
        command: ChatCompletionCommand,
        cancel: &CancellationToken,
    ) -> Result<ChatCompletionOutput, ApplicationError> {
        self.completion_handler.execute(command, cancel).await
    }

    /// 执行一轮对话（流式）
    pub fn complete_stream(
        &self,
        command: ChatCompletionCommand,
        cancel: CancellationToken,
    ) -> (
        mpsc::Receiver<StreamEvent>,
        JoinHandle<Result<ChatCompletionOutput, ApplicationError>>,
    ) {
        self.completion_handler.execute_stream(command, cancel)
    }

    /// 结束对话
    pub async fn end_chat(
        &self,
        command: EndChatCommand,
    ) -> Result<EndChatResponse, ApplicationError> {
        self.end_chat_handler.handle(command).await
    }

    // Query handlers

    /// 获取对话
    pub async fn get_chat(&self, query: GetChatQuery) -> Result<GetChatResponse, ApplicationError> {
        self.get_chat_handler.handle(query).await
    }

    // Accessors

    pub fn chat_repository(&self) -> &Arc<dyn ChatRepository> {
        &self.chat_repository
    }

    pub fn llm_port(&self) -> &Arc<dyn LLMPort> {
        &self.llm_port
    }
}

impl Default for ChatModule {
    fn default() -> Self {
        Self::new()
    }
}
