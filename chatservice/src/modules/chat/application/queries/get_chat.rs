use async_trait::async_trait;
use std::sync::Arc;

use super::super::{ApplicationError, QueryHandler, TurnStage};
use crate::modules::chat::domain::{Chat, ChatId};
use crate::modules::chat::ports::{ChatRepository, RepositoryError};

/// 获取对话查询
#[derive(Debug, Clone)]
pub struct GetChatQuery {
    pub chat_id: ChatId,
}

impl GetChatQuery {
    pub fn new(chat_id: impl Into<ChatId>) -> Self {
        Self {
            chat_id: chat_id.into(),
        }
    }
}

/// 获取对话查询响应
#[derive(Debug, Clone)]
pub struct GetChatResponse {
    pub chat: Option<Chat>,
}

/// 获取对话查询处理器
pub struct GetChatHandler {
    chat_repository: Arc<dyn ChatRepository>,
}

impl GetChatHandler {
    pub fn new(chat_repository: Arc<dyn ChatRepository>) -> Self {
        Self { chat_repository }
    }
}

#[async_trait]
impl QueryHandler<GetChatQuery, GetChatResponse> for GetChatHandler {
    async fn handle(&self, query: GetChatQuery) -> Result<GetChatResponse, ApplicationError> {
        match self.chat_repository.find_by_id(&query.chat_id).await {
            Ok(chat) => Ok(GetChatResponse { chat: Some(chat) }),
            Err(RepositoryError::NotFound(_)) => Ok(GetChatResponse { chat: None }),
            Err(e) => Err(ApplicationError::storage(
                &query.chat_id,
                TurnStage::LoadChat,
                e,
            )),
        }
    }
}
