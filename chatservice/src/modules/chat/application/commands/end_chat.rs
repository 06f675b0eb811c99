use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::super::{ApplicationError, CommandHandler, TurnStage};
use crate::modules::chat::domain::{Chat, ChatId};
use crate::modules::chat::ports::ChatRepository;

/// 结束对话命令
#[derive(Debug, Clone)]
pub struct EndChatCommand {
    pub chat_id: ChatId,
}

impl EndChatCommand {
    pub fn new(chat_id: impl Into<ChatId>) -> Self {
        Self {
            chat_id: chat_id.into(),
        }
    }
}

/// 结束对话命令响应
#[derive(Debug, Clone)]
pub struct EndChatResponse {
    pub chat: Chat,
}

/// 结束对话命令处理器
///
/// 已结束的对话不再接受新消息
pub struct EndChatHandler {
    chat_repository: Arc<dyn ChatRepository>,
}

impl EndChatHandler {
    pub fn new(chat_repository: Arc<dyn ChatRepository>) -> Self {
        Self { chat_repository }
    }
}

#[async_trait]
impl CommandHandler<EndChatCommand, EndChatResponse> for EndChatHandler {
    async fn handle(&self, command: EndChatCommand) -> Result<EndChatResponse, ApplicationError> {
        let chat_id = command.chat_id;

        let mut chat = self
            .chat_repository
            .find_by_id(&chat_id)
            .await
            .map_err(|e| ApplicationError::storage(&chat_id, TurnStage::LoadChat, e))?;

        if chat.is_ended() {
            return Ok(EndChatResponse { chat });
        }

        chat.end();
        self.chat_repository
            .update(&chat)
            .await
            .map_err(|e| ApplicationError::storage(&chat_id, TurnStage::SaveChat, e))?;

        info!("Chat {} ended with {} messages", chat_id, chat.messages().len());
        Ok(EndChatResponse { chat })
    }
}
