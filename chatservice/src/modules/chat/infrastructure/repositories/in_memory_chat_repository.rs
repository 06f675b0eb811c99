use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::modules::chat::domain::{Chat, ChatId};
use crate::modules::chat::ports::{ChatRepository, RepositoryError};

/// 内存对话仓储
///
/// 用于开发和测试
pub struct InMemoryChatRepository {
    chats: RwLock<HashMap<ChatId, Chat>>,
}

impl InMemoryChatRepository {
    pub fn new() -> Self {
        Self {
            chats: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.chats.read().await.len()
    }
}

impl Default for InMemoryChatRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatRepository for InMemoryChatRepository {
    async fn find_by_id(&self, id: &ChatId) -> Result<Chat, RepositoryError> {
        let chats = self.chats.read().await;
        chats
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("chat {}", id)))
    }

    async fn create(&self, chat: &Chat) -> Result<(), RepositoryError> {
        let mut chats = self.chats.write().await;
        if chats.contains_key(chat.id()) {
            return Err(RepositoryError::Conflict(format!(
                "chat {} already exists",
                chat.id()
            )));
        }
        chats.insert(chat.id().clone(), chat.clone());
        Ok(())
    }

    async fn update(&self, chat: &Chat) -> Result<(), RepositoryError> {
        let mut chats = self.chats.write().await;
        match chats.get_mut(chat.id()) {
            Some(stored) => {
                *stored = chat.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("chat {}", chat.id()))),
        }
    }
}
