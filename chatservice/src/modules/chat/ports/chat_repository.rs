use async_trait::async_trait;
use thiserror::Error;

use super::super::domain::{Chat, ChatId};

/// 仓储错误类型
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// 实体不存在，与其他存储故障区分开
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound(_))
    }
}

/// 对话仓储端口
///
/// 定义 Chat 聚合持久化的抽象接口。同一 chat id 的并发更新采用后写者胜出。
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// 根据 ID 加载对话，不存在时返回 `RepositoryError::NotFound`
    async fn find_by_id(&self, id: &ChatId) -> Result<Chat, RepositoryError>;

    /// 保存新对话，ID 已存在时返回 `RepositoryError::Conflict`
    async fn create(&self, chat: &Chat) -> Result<(), RepositoryError>;

    /// 覆盖已有对话，不存在时返回 `RepositoryError::NotFound`
    async fn update(&self, chat: &Chat) -> Result<(), RepositoryError>;
}
