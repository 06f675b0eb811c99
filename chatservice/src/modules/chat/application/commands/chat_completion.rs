use async_trait::async_trait;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::super::{ApplicationError, CommandHandler, TurnStage};
use crate::modules::chat::domain::{Chat, ChatConfig, ChatError, ChatId, Message, Model};
use crate::modules::chat::ports::{
    ChatRepository, CompletionRequest, LLMError, LLMPort, RepositoryError,
};

/// 新建对话时使用的配置
///
/// 仅在 chat id 对应的对话不存在时生效
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletionConfigInput {
    pub model: String,
    pub model_max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub n: u32,
    pub stop: Vec<String>,
    pub max_tokens: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub initial_system_message: String,
}

impl ChatCompletionConfigInput {
    /// 构建新对话的聚合（含初始系统消息）
    fn build_chat(&self, chat_id: ChatId, user_id: &str) -> Result<Chat, ChatError> {
        let model = Model::new(&self.model, self.model_max_tokens)?;
        let config = ChatConfig {
            temperature: self.temperature,
            top_p: self.top_p,
            n: self.n,
            stop: self.stop.clone(),
            max_tokens: self.max_tokens,
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
            model,
        };
        let initial_message = Message::system(&self.initial_system_message, &config.model)?;
        Chat::with_id(chat_id, user_id, initial_message, config)
    }
}

/// 对话补全命令
#[derive(Debug, Clone)]
pub struct ChatCompletionCommand {
    pub chat_id: ChatId,
    pub user_id: String,
    /// 用户消息内容
    pub user_message: String,
    pub config: ChatCompletionConfigInput,
}

impl ChatCompletionCommand {
    pub fn new(
        chat_id: impl Into<ChatId>,
        user_id: impl Into<String>,
        user_message: impl Into<String>,
        config: ChatCompletionConfigInput,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            user_message: user_message.into(),
            config,
        }
    }
}

/// 对话补全结果
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletionOutput {
    pub chat_id: ChatId,
    pub user_id: String,
    /// 助手回复的完整内容
    pub content: String,
    /// 助手回复消耗的 token 数
    pub tokens_used: u32,
}

/// 流式响应事件
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// 内容块
    Chunk(String),
    /// 完成
    Done {
        full_content: String,
        tokens_used: u32,
    },
    /// 错误
    Error(String),
}

/// 对话补全命令处理器
///
/// 一轮对话的完整流程：加载或构建对话 -> 追加用户消息 -> 流式调用 LLM ->
/// 追加助手消息 -> 一次性保存。新对话和用户消息只在内存中存在，与助手回复一起
/// 落盘（新对话用 `create`，已有对话用 `update`），失败或取消时存储中不会留下半轮对话。
#[derive(Clone)]
pub struct ChatCompletionHandler {
    chat_repository: Arc<dyn ChatRepository>,
    llm_port: Arc<dyn LLMPort>,
}

impl ChatCompletionHandler {
    pub fn new(chat_repository: Arc<dyn ChatRepository>, llm_port: Arc<dyn LLMPort>) -> Self {
        Self {
            chat_repository,
            llm_port,
        }
    }

    /// 执行一轮对话，等待回复完成后返回
    pub async fn execute(
        &self,
        command: ChatCompletionCommand,
        cancel: &CancellationToken,
    ) -> Result<ChatCompletionOutput, ApplicationError> {
        self.run_turn(command, cancel, None).await
    }

    /// 执行一轮对话（流式）
    ///
    /// 内容块到达时立即通过通道转发，最终结果通过 JoinHandle 返回
    pub fn execute_stream(
        &self,
        command: ChatCompletionCommand,
        cancel: CancellationToken,
    ) -> (
        mpsc::Receiver<StreamEvent>,
        JoinHandle<Result<ChatCompletionOutput, ApplicationError>>,
    ) {
        let (tx, rx) = mpsc::channel::<StreamEvent>(32);
        let handler = self.clone();

        let handle = tokio::spawn(async move {
            let result = handler.run_turn(command, &cancel, Some(&tx)).await;
            let event = match &result {
                Ok(output) => StreamEvent::Done {
                    full_content: output.content.clone(),
                    tokens_used: output.tokens_used,
                },
                Err(e) => StreamEvent::Error(e.to_string()),
            };
            let _ = tx.send(event).await;
            result
        });

        (rx, handle)
    }

    async fn run_turn(
        &self,
        command: ChatCompletionCommand,
        cancel: &CancellationToken,
        events: Option<&mpsc::Sender<StreamEvent>>,
    ) -> Result<ChatCompletionOutput, ApplicationError> {
        let chat_id = command.chat_id.clone();
        if chat_id.is_empty() {
            return Err(ApplicationError::Validation {
                chat_id,
                stage: TurnStage::LoadChat,
                reason: "chat id is empty".to_string(),
            });
        }

        info!(chat_id = %chat_id, user_id = %command.user_id, "Starting chat completion turn");

        let (mut chat, is_new) = self.load_or_build(&command, cancel).await?;

        let user_message = Message::user(&command.user_message, &chat.config().model)
            .map_err(|e| ApplicationError::from_domain(&chat_id, TurnStage::AppendUserMessage, e))?;
        chat.add_message(user_message)
            .map_err(|e| ApplicationError::from_domain(&chat_id, TurnStage::AppendUserMessage, e))?;

        let request = CompletionRequest::from_chat(&chat);
        let content = self
            .stream_completion(&chat_id, request, cancel, events)
            .await?;

        if content.trim().is_empty() {
            return Err(ApplicationError::Provider {
                chat_id,
                source: LLMError::InvalidResponse("completion stream returned no content".to_string()),
            });
        }

        let assistant_message = Message::assistant(&content, &chat.config().model).map_err(|e| {
            ApplicationError::from_domain(&chat_id, TurnStage::AppendAssistantMessage, e)
        })?;
        let tokens_used = assistant_message.tokens();
        chat.add_message(assistant_message).map_err(|e| {
            ApplicationError::from_domain(&chat_id, TurnStage::AppendAssistantMessage, e)
        })?;

        // 写入开始后不再响应取消，本轮要么完整落盘，要么完全不落盘
        if cancel.is_cancelled() {
            return Err(ApplicationError::cancelled(&chat_id, TurnStage::SaveChat));
        }
        if is_new {
            self.chat_repository
                .create(&chat)
                .await
                .map_err(|e| ApplicationError::storage(&chat_id, TurnStage::CreateChat, e))?;
            info!(chat_id = %chat_id, model = %chat.config().model.name(), "Created new chat");
        } else {
            self.chat_repository
                .update(&chat)
                .await
                .map_err(|e| ApplicationError::storage(&chat_id, TurnStage::SaveChat, e))?;
        }

        info!(
            chat_id = %chat_id,
            messages = chat.messages().len(),
            token_usage = chat.token_usage(),
            "Chat completion turn finished"
        );

        Ok(ChatCompletionOutput {
            chat_id,
            user_id: chat.user_id().to_string(),
            content,
            tokens_used,
        })
    }

    /// 加载对话，不存在时在内存中构建新对话（只含系统消息）
    ///
    /// 返回值的第二项表示对话是否为本轮新建，新对话在本轮结束时才落盘
    async fn load_or_build(
        &self,
        command: &ChatCompletionCommand,
        cancel: &CancellationToken,
    ) -> Result<(Chat, bool), ApplicationError> {
        let chat_id = &command.chat_id;

        let lookup = guarded(cancel, self.chat_repository.find_by_id(chat_id))
            .await
            .ok_or_else(|| ApplicationError::cancelled(chat_id, TurnStage::LoadChat))?;

        match lookup {
            Ok(chat) => {
                debug!(
                    "Loaded chat {} with {} messages ({} tokens)",
                    chat_id,
                    chat.messages().len(),
                    chat.token_usage()
                );
                Ok((chat, false))
            }
            Err(RepositoryError::NotFound(_)) => {
                debug!("Chat {} not found, starting a new one", chat_id);

                let chat = command
                    .config
                    .build_chat(chat_id.clone(), &command.user_id)
                    .map_err(|source| ApplicationError::ChatCreationFailed {
                        chat_id: chat_id.clone(),
                        source,
                    })?;
                Ok((chat, true))
            }
            Err(e) => {
                warn!("Failed to load chat {}: {}", chat_id, e);
                Err(ApplicationError::storage(chat_id, TurnStage::LoadChat, e))
            }
        }
    }

    /// 消费补全流，拼接内容块
    ///
    /// 每个内容块之间检查一次取消信号
    async fn stream_completion(
        &self,
        chat_id: &ChatId,
        request: CompletionRequest,
        cancel: &CancellationToken,
        events: Option<&mpsc::Sender<StreamEvent>>,
    ) -> Result<String, ApplicationError> {
        debug!(
            "Requesting completion for chat {} from {} with {} messages",
            chat_id,
            self.llm_port.provider_id(),
            request.messages.len()
        );

        let mut stream = guarded(cancel, self.llm_port.complete_stream(request))
            .await
            .ok_or_else(|| ApplicationError::cancelled(chat_id, TurnStage::StreamCompletion))?
            .map_err(|source| Self::provider_error(chat_id, source))?;

        let mut content = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Chat {} cancelled after {} bytes of completion", chat_id, content.len());
                    return Err(ApplicationError::cancelled(chat_id, TurnStage::StreamCompletion));
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    if chunk.content.is_empty() {
                        continue;
                    }
                    content.push_str(&chunk.content);

                    if let Some(tx) = events {
                        guarded(cancel, tx.send(StreamEvent::Chunk(chunk.content)))
                            .await
                            .ok_or_else(|| {
                                ApplicationError::cancelled(chat_id, TurnStage::StreamCompletion)
                            })?
                            .unwrap_or_else(|_| debug!("Stream receiver for chat {} dropped", chat_id));
                    }
                }
                Some(Err(source)) => return Err(Self::provider_error(chat_id, source)),
                None => break,
            }
        }

        Ok(content)
    }

    fn provider_error(chat_id: &ChatId, source: LLMError) -> ApplicationError {
        match source {
            LLMError::Cancelled => ApplicationError::cancelled(chat_id, TurnStage::StreamCompletion),
            source => {
                warn!("Completion for chat {} failed: {}", chat_id, source);
                ApplicationError::Provider {
                    chat_id: chat_id.clone(),
                    source,
                }
            }
        }
    }
}

/// 与取消信号竞争执行，取消时返回 None
async fn guarded<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}

#[async_trait]
impl CommandHandler<ChatCompletionCommand, ChatCompletionOutput> for ChatCompletionHandler {
    async fn handle(
        &self,
        command: ChatCompletionCommand,
    ) -> Result<ChatCompletionOutput, ApplicationError> {
        self.execute(command, &CancellationToken::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::chat::application::ErrorKind;
    use crate::modules::chat::domain::MessageRole;
    use crate::modules::chat::infrastructure::InMemoryChatRepository;
    use crate::modules::chat::ports::{ChunkStream, StreamChunk};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// 记录调用次数的仓储
    #[derive(Default)]
    struct RecordingRepository {
        inner: InMemoryChatRepository,
        finds: AtomicUsize,
        created: Mutex<Vec<Chat>>,
        updated: Mutex<Vec<Chat>>,
        fail_find: bool,
        fail_create: bool,
        fail_update: bool,
        /// 写入开始时触发取消
        cancel_on_write: Option<CancellationToken>,
    }

    impl RecordingRepository {
        fn finds(&self) -> usize {
            self.finds.load(Ordering::SeqCst)
        }

        fn created(&self) -> Vec<Chat> {
            self.created.lock().unwrap().clone()
        }

        fn updated(&self) -> Vec<Chat> {
            self.updated.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatRepository for RecordingRepository {
        async fn find_by_id(&self, id: &ChatId) -> Result<Chat, RepositoryError> {
            self.finds.fetch_add(1, Ordering::SeqCst);
            if self.fail_find {
                return Err(RepositoryError::DatabaseError("connection refused".to_string()));
            }
            self.inner.find_by_id(id).await
        }

        async fn create(&self, chat: &Chat) -> Result<(), RepositoryError> {
            self.created.lock().unwrap().push(chat.clone());
            if let Some(token) = &self.cancel_on_write {
                token.cancel();
                tokio::task::yield_now().await;
            }
            if self.fail_create {
                return Err(RepositoryError::DatabaseError("disk full".to_string()));
            }
            self.inner.create(chat).await
        }

        async fn update(&self, chat: &Chat) -> Result<(), RepositoryError> {
            self.updated.lock().unwrap().push(chat.clone());
            if let Some(token) = &self.cancel_on_write {
                token.cancel();
                tokio::task::yield_now().await;
            }
            if self.fail_update {
                return Err(RepositoryError::DatabaseError("disk full".to_string()));
            }
            self.inner.update(chat).await
        }
    }

    /// 按脚本回放内容块的 LLM
    struct ScriptedLLM {
        deltas: Vec<&'static str>,
        fail_after: bool,
        /// 在第一个内容块之后触发取消
        cancel_after_first: Option<CancellationToken>,
        /// 回放完脚本后保持挂起
        hang: bool,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedLLM {
        fn new(deltas: Vec<&'static str>) -> Self {
            Self {
                deltas,
                fail_after: false,
                cancel_after_first: None,
                hang: false,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LLMPort for ScriptedLLM {
        fn provider_id(&self) -> &str {
            "scripted"
        }

        async fn complete_stream(
            &self,
            request: CompletionRequest,
        ) -> Result<ChunkStream, LLMError> {
            self.requests.lock().unwrap().push(request);

            let cancel = self.cancel_after_first.clone();
            let mut stream: ChunkStream = futures::stream::iter(self.deltas.clone())
                .enumerate()
                .map(move |(i, delta)| {
                    // 惰性执行：第一个内容块被消费时才触发取消
                    if i == 0 {
                        if let Some(token) = &cancel {
                            token.cancel();
                        }
                    }
                    Ok(StreamChunk::content(delta))
                })
                .boxed();
            if self.fail_after {
                stream = stream
                    .chain(futures::stream::once(async {
                        Err(LLMError::NetworkError("connection reset".to_string()))
                    }))
                    .boxed();
            }
            if self.hang {
                stream = stream.chain(futures::stream::pending()).boxed();
            }
            Ok(stream)
        }
    }

    fn config_input() -> ChatCompletionConfigInput {
        ChatCompletionConfigInput {
            model: "gpt-x".to_string(),
            model_max_tokens: 100,
            temperature: 0.7,
            top_p: 1.0,
            n: 1,
            stop: Vec::new(),
            max_tokens: 0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            initial_system_message: "You are helpful.".to_string(),
        }
    }

    fn command(text: &str) -> ChatCompletionCommand {
        ChatCompletionCommand::new("c1", "u1", text, config_input())
    }

    /// 预先保存一个已有对话
    async fn seed_chat(repo: &RecordingRepository, model_max_tokens: u32, max_tokens: u32) -> Chat {
        let model = Model::new("gpt-x", model_max_tokens).unwrap();
        let config = ChatConfig::new(model).with_max_tokens(max_tokens);
        let system = Message::system("You are helpful.", &config.model).unwrap();
        let chat = Chat::with_id(ChatId::new("c1"), "u1", system, config).unwrap();
        repo.inner.create(&chat).await.unwrap();
        chat
    }

    #[tokio::test]
    async fn test_new_chat_turn() {
        let repo = Arc::new(RecordingRepository::default());
        let llm = Arc::new(ScriptedLLM::new(vec!["Hi", " there"]));
        let handler = ChatCompletionHandler::new(repo.clone(), llm.clone());

        let output = handler
            .execute(command("hello"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.content, "Hi there");
        assert_eq!(output.chat_id, ChatId::new("c1"));
        assert_eq!(output.user_id, "u1");

        // 只创建一次，整轮对话随创建一起写入，没有 update
        let created = repo.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].messages().len(), 3);
        assert!(repo.updated().is_empty());

        // 提供商收到系统消息 + 用户消息
        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        let roles: Vec<&str> = requests[0].messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user"]);
        assert_eq!(requests[0].messages[1].content, "hello");
        assert_eq!(requests[0].model, "gpt-x");

        // 最终保存的对话包含 3 条消息
        let stored = repo.inner.find_by_id(&ChatId::new("c1")).await.unwrap();
        let roles: Vec<MessageRole> = stored.messages().iter().map(|m| m.role()).collect();
        assert_eq!(
            roles,
            vec![MessageRole::System, MessageRole::User, MessageRole::Assistant]
        );
        assert_eq!(stored.messages()[2].content(), "Hi there");
        assert_eq!(repo.finds(), 1);
    }

    #[tokio::test]
    async fn test_existing_chat_is_not_recreated() {
        let repo = Arc::new(RecordingRepository::default());
        seed_chat(&repo, 1000, 0).await;
        let llm = Arc::new(ScriptedLLM::new(vec!["Sure."]));
        let handler = ChatCompletionHandler::new(repo.clone(), llm);

        handler
            .execute(command("first"), &CancellationToken::new())
            .await
            .unwrap();
        handler
            .execute(command("second"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(repo.created().is_empty());
        assert_eq!(repo.finds(), 2);

        let stored = repo.inner.find_by_id(&ChatId::new("c1")).await.unwrap();
        let contents: Vec<&str> = stored.messages().iter().map(|m| m.content()).collect();
        assert_eq!(
            contents,
            vec!["You are helpful.", "first", "Sure.", "second", "Sure."]
        );
        let roles: Vec<MessageRole> = stored.messages().iter().map(|m| m.role()).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::System,
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::User,
                MessageRole::Assistant,
            ]
        );
    }

    #[tokio::test]
    async fn test_budget_exceeded_writes_nothing() {
        let repo = Arc::new(RecordingRepository::default());
        let model = Model::new("gpt-x", 100).unwrap();
        let system_tokens = model.count_tokens("You are helpful.").unwrap();
        // 历史只剩 5 个 token 的空间
        seed_chat(&repo, 100, 100 - system_tokens - 5).await;

        let text = "one two three four five six seven eight nine ten";
        assert!(model.count_tokens(text).unwrap() > 5);

        let llm = Arc::new(ScriptedLLM::new(vec!["never"]));
        let handler = ChatCompletionHandler::new(repo.clone(), llm.clone());

        let error = handler
            .execute(command(text), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::TokenBudgetExceeded);
        match error {
            ApplicationError::TokenBudgetExceeded { used, limit, .. } => {
                assert_eq!(used, system_tokens);
                assert_eq!(limit, system_tokens + 5);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(repo.created().is_empty());
        assert!(repo.updated().is_empty());
        assert!(llm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_no_half_turn() {
        let repo = Arc::new(RecordingRepository::default());
        seed_chat(&repo, 1000, 0).await;
        let mut llm = ScriptedLLM::new(vec!["partial"]);
        llm.fail_after = true;
        let handler = ChatCompletionHandler::new(repo.clone(), Arc::new(llm));

        let error = handler
            .execute(command("hello"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Provider);
        assert!(repo.updated().is_empty());
        let stored = repo.inner.find_by_id(&ChatId::new("c1")).await.unwrap();
        assert_eq!(stored.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_on_new_chat_stores_nothing() {
        let repo = Arc::new(RecordingRepository::default());
        let mut llm = ScriptedLLM::new(vec![]);
        llm.fail_after = true;
        let handler = ChatCompletionHandler::new(repo.clone(), Arc::new(llm));

        let result = handler
            .execute(command("hello"), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ApplicationError::Provider { .. })));
        assert!(repo.created().is_empty());
        let missing = repo.inner.find_by_id(&ChatId::new("c1")).await.unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn test_empty_completion_is_provider_error() {
        let repo = Arc::new(RecordingRepository::default());
        let handler =
            ChatCompletionHandler::new(repo.clone(), Arc::new(ScriptedLLM::new(vec!["", " "])));

        let error = handler
            .execute(command("hello"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            ApplicationError::Provider {
                source: LLMError::InvalidResponse(_),
                ..
            }
        ));
        assert!(repo.updated().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_mid_stream() {
        let repo = Arc::new(RecordingRepository::default());
        seed_chat(&repo, 1000, 0).await;
        let cancel = CancellationToken::new();
        let mut llm = ScriptedLLM::new(vec!["Hi", " there"]);
        llm.cancel_after_first = Some(cancel.clone());
        let handler = ChatCompletionHandler::new(repo.clone(), Arc::new(llm));

        let error = handler.execute(command("hello"), &cancel).await.unwrap_err();

        assert!(matches!(
            error,
            ApplicationError::Cancelled {
                stage: TurnStage::StreamCompletion,
                ..
            }
        ));
        assert!(repo.updated().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_touches_nothing() {
        let repo = Arc::new(RecordingRepository::default());
        let handler =
            ChatCompletionHandler::new(repo.clone(), Arc::new(ScriptedLLM::new(vec!["Hi"])));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = handler.execute(command("hello"), &cancel).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Cancelled);
        assert_eq!(repo.finds(), 0);
        assert!(repo.created().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_not_treated_as_missing() {
        let repo = Arc::new(RecordingRepository {
            fail_find: true,
            ..Default::default()
        });
        let handler =
            ChatCompletionHandler::new(repo.clone(), Arc::new(ScriptedLLM::new(vec!["Hi"])));

        let error = handler
            .execute(command("hello"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            ApplicationError::Storage {
                stage: TurnStage::LoadChat,
                ..
            }
        ));
        assert!(repo.created().is_empty());
    }

    #[tokio::test]
    async fn test_save_failure_is_storage_error() {
        let repo = Arc::new(RecordingRepository {
            fail_update: true,
            ..Default::default()
        });
        seed_chat(&repo, 1000, 0).await;
        let handler =
            ChatCompletionHandler::new(repo.clone(), Arc::new(ScriptedLLM::new(vec!["Hi"])));

        let error = handler
            .execute(command("hello"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            ApplicationError::Storage {
                stage: TurnStage::SaveChat,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_create_failure_on_new_chat_is_storage_error() {
        let repo = Arc::new(RecordingRepository {
            fail_create: true,
            ..Default::default()
        });
        let handler =
            ChatCompletionHandler::new(repo.clone(), Arc::new(ScriptedLLM::new(vec!["Hi"])));

        let error = handler
            .execute(command("hello"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            ApplicationError::Storage {
                stage: TurnStage::CreateChat,
                ..
            }
        ));
        assert!(repo.updated().is_empty());
        assert!(repo.inner.find_by_id(&ChatId::new("c1")).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_during_save_completes_the_write() {
        let cancel = CancellationToken::new();
        let repo = Arc::new(RecordingRepository {
            cancel_on_write: Some(cancel.clone()),
            ..Default::default()
        });
        seed_chat(&repo, 1000, 0).await;
        let handler =
            ChatCompletionHandler::new(repo.clone(), Arc::new(ScriptedLLM::new(vec!["Hi"])));

        let output = handler.execute(command("hello"), &cancel).await.unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(output.content, "Hi");
        let stored = repo.inner.find_by_id(&ChatId::new("c1")).await.unwrap();
        assert_eq!(stored.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_cancel_during_file_save_keeps_memory_and_disk_in_sync() {
        use crate::modules::chat::infrastructure::FileChatRepository;

        /// 写文件开始时触发取消的文件仓储
        struct CancellingFileRepository {
            inner: FileChatRepository,
            cancel: CancellationToken,
        }

        #[async_trait]
        impl ChatRepository for CancellingFileRepository {
            async fn find_by_id(&self, id: &ChatId) -> Result<Chat, RepositoryError> {
                self.inner.find_by_id(id).await
            }

            async fn create(&self, chat: &Chat) -> Result<(), RepositoryError> {
                self.inner.create(chat).await
            }

            async fn update(&self, chat: &Chat) -> Result<(), RepositoryError> {
                let mut write = Box::pin(self.inner.update(chat));
                let first = futures::poll!(write.as_mut());
                self.cancel.cancel();
                match first {
                    std::task::Poll::Ready(result) => result,
                    std::task::Poll::Pending => write.await,
                }
            }
        }

        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().to_path_buf();
        let cancel = CancellationToken::new();
        let repo = Arc::new(CancellingFileRepository {
            inner: FileChatRepository::new(path.clone()).await.unwrap(),
            cancel: cancel.clone(),
        });
        let model = Model::new("gpt-x", 1000).unwrap();
        let config = ChatConfig::new(model);
        let system = Message::system("You are helpful.", &config.model).unwrap();
        let chat = Chat::with_id(ChatId::new("c1"), "u1", system, config).unwrap();
        repo.inner.create(&chat).await.unwrap();

        let handler = ChatCompletionHandler::new(repo.clone(), Arc::new(ScriptedLLM::new(vec!["Hi"])));
        handler.execute(command("hello"), &cancel).await.unwrap();

        let in_memory = repo.inner.find_by_id(&ChatId::new("c1")).await.unwrap();
        let reloaded = FileChatRepository::new(path)
            .await
            .unwrap()
            .find_by_id(&ChatId::new("c1"))
            .await
            .unwrap();
        assert_eq!(in_memory.messages().len(), 3);
        assert_eq!(reloaded, in_memory);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_chat_creation() {
        let repo = Arc::new(RecordingRepository::default());
        let handler =
            ChatCompletionHandler::new(repo.clone(), Arc::new(ScriptedLLM::new(vec!["Hi"])));
        let mut input = config_input();
        input.model_max_tokens = 0;

        let error = handler
            .execute(
                ChatCompletionCommand::new("c1", "u1", "hello", input),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::ChatCreationFailed);
        assert!(repo.created().is_empty());
    }

    #[tokio::test]
    async fn test_empty_user_message_is_rejected() {
        let repo = Arc::new(RecordingRepository::default());
        seed_chat(&repo, 1000, 0).await;
        let handler =
            ChatCompletionHandler::new(repo.clone(), Arc::new(ScriptedLLM::new(vec!["Hi"])));

        let error = handler
            .execute(command("   "), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(repo.updated().is_empty());
    }

    #[tokio::test]
    async fn test_stream_forwards_chunks() {
        let repo = Arc::new(RecordingRepository::default());
        let handler =
            ChatCompletionHandler::new(repo, Arc::new(ScriptedLLM::new(vec!["Hi", " there"])));

        let (mut rx, handle) = handler.execute_stream(command("hello"), CancellationToken::new());

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let output = handle.await.unwrap().unwrap();

        assert_eq!(events[0], StreamEvent::Chunk("Hi".to_string()));
        assert_eq!(events[1], StreamEvent::Chunk(" there".to_string()));
        assert_eq!(
            events[2],
            StreamEvent::Done {
                full_content: "Hi there".to_string(),
                tokens_used: output.tokens_used,
            }
        );
        assert_eq!(output.content, "Hi there");
    }

    #[tokio::test]
    async fn test_stream_cancelled_after_first_chunk() {
        let repo = Arc::new(RecordingRepository::default());
        seed_chat(&repo, 1000, 0).await;
        let mut llm = ScriptedLLM::new(vec!["Hi"]);
        llm.hang = true;
        let handler = ChatCompletionHandler::new(repo.clone(), Arc::new(llm));
        let cancel = CancellationToken::new();

        let (mut rx, handle) = handler.execute_stream(command("hello"), cancel.clone());

        assert_eq!(rx.recv().await, Some(StreamEvent::Chunk("Hi".to_string())));
        cancel.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ApplicationError::Cancelled { .. })));
        assert!(matches!(rx.recv().await, Some(StreamEvent::Error(_))));
        assert!(repo.updated().is_empty());
    }

    #[tokio::test]
    async fn test_command_handler_runs_turn() {
        let repo = Arc::new(RecordingRepository::default());
        let handler =
            ChatCompletionHandler::new(repo.clone(), Arc::new(ScriptedLLM::new(vec!["Hello!"])));

        let output = handler.handle(command("hi")).await.unwrap();
        assert_eq!(output.content, "Hello!");
    }
}
