// Chat Application Layer - 应用层
// 实现 CQRS 模式的命令和查询处理器

pub mod commands;
pub mod queries;

// 导出命令和查询
pub use commands::*;
pub use queries::*;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use super::domain::{ChatError, ChatId};
use super::ports::{LLMError, RepositoryError};

/// 一轮对话所处的阶段，用于错误上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStage {
    LoadChat,
    CreateChat,
    AppendUserMessage,
    StreamCompletion,
    AppendAssistantMessage,
    SaveChat,
}

impl fmt::Display for TurnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            TurnStage::LoadChat => "loading chat",
            TurnStage::CreateChat => "creating chat",
            TurnStage::AppendUserMessage => "appending user message",
            TurnStage::StreamCompletion => "streaming completion",
            TurnStage::AppendAssistantMessage => "appending assistant message",
            TurnStage::SaveChat => "saving chat",
        };
        f.write_str(stage)
    }
}

/// 调用方可区分的错误种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    ChatCreationFailed,
    Storage,
    TokenBudgetExceeded,
    Provider,
    Cancelled,
}

/// 应用层错误类型
///
/// 所有底层错误在靠近来源处被包装，并附带 chat id 和阶段信息
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("Invalid input for chat {chat_id} while {stage}: {reason}")]
    Validation {
        chat_id: ChatId,
        stage: TurnStage,
        reason: String,
    },

    #[error("Failed to create chat {chat_id}: {source}")]
    ChatCreationFailed {
        chat_id: ChatId,
        #[source]
        source: ChatError,
    },

    #[error("Storage error for chat {chat_id} while {stage}: {source}")]
    Storage {
        chat_id: ChatId,
        stage: TurnStage,
        #[source]
        source: RepositoryError,
    },

    #[error(
        "Token budget exceeded for chat {chat_id} while {stage}: \
         {used} used + {requested} requested > {limit} allowed"
    )]
    TokenBudgetExceeded {
        chat_id: ChatId,
        stage: TurnStage,
        used: u32,
        requested: u32,
        limit: u32,
    },

    #[error("Provider error for chat {chat_id}: {source}")]
    Provider {
        chat_id: ChatId,
        #[source]
        source: LLMError,
    },

    #[error("Turn for chat {chat_id} cancelled while {stage}")]
    Cancelled { chat_id: ChatId, stage: TurnStage },
}

impl ApplicationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApplicationError::Validation { .. } => ErrorKind::Validation,
            ApplicationError::ChatCreationFailed { .. } => ErrorKind::ChatCreationFailed,
            ApplicationError::Storage { .. } => ErrorKind::Storage,
            ApplicationError::TokenBudgetExceeded { .. } => ErrorKind::TokenBudgetExceeded,
            ApplicationError::Provider { .. } => ErrorKind::Provider,
            ApplicationError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        match self {
            ApplicationError::Validation { chat_id, .. }
            | ApplicationError::ChatCreationFailed { chat_id, .. }
            | ApplicationError::Storage { chat_id, .. }
            | ApplicationError::TokenBudgetExceeded { chat_id, .. }
            | ApplicationError::Provider { chat_id, .. }
            | ApplicationError::Cancelled { chat_id, .. } => chat_id,
        }
    }

    /// 将聚合返回的领域错误映射到调用方可见的错误
    pub(crate) fn from_domain(chat_id: &ChatId, stage: TurnStage, error: ChatError) -> Self {
        match error {
            ChatError::TokenBudgetExceeded {
                used,
                requested,
                limit,
            } => ApplicationError::TokenBudgetExceeded {
                chat_id: chat_id.clone(),
                stage,
                used,
                requested,
                limit,
            },
            other => ApplicationError::Validation {
                chat_id: chat_id.clone(),
                stage,
                reason: other.to_string(),
            },
        }
    }

    pub(crate) fn storage(chat_id: &ChatId, stage: TurnStage, source: RepositoryError) -> Self {
        ApplicationError::Storage {
            chat_id: chat_id.clone(),
            stage,
            source,
        }
    }

    pub(crate) fn cancelled(chat_id: &ChatId, stage: TurnStage) -> Self {
        ApplicationError::Cancelled {
            chat_id: chat_id.clone(),
            stage,
        }
    }
}

/// 命令处理器 trait
///
/// 遵循 CQRS 模式，命令处理器负责执行有副作用的操作
#[async_trait]
pub trait CommandHandler<C, R>: Send + Sync
where
    C: Send + Sync,
{
    /// 执行命令
    async fn handle(&self, command: C) -> Result<R, ApplicationError>;
}

/// 查询处理器 trait
///
/// 遵循 CQRS 模式，查询处理器负责只读操作
#[async_trait]
pub trait QueryHandler<Q, R>: Send + Sync
where
    Q: Send + Sync,
{
    /// 执行查询
    async fn handle(&self, query: Q) -> Result<R, ApplicationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_error_keeps_usage_detail() {
        let chat_id = ChatId::new("c1");
        let error = ApplicationError::from_domain(
            &chat_id,
            TurnStage::AppendUserMessage,
            ChatError::TokenBudgetExceeded {
                used: 95,
                requested: 10,
                limit: 100,
            },
        );

        assert_eq!(error.kind(), ErrorKind::TokenBudgetExceeded);
        assert_eq!(error.chat_id(), &chat_id);
        assert!(error.to_string().contains("95 used + 10 requested > 100 allowed"));
    }

    #[test]
    fn test_other_domain_errors_are_validation() {
        let error = ApplicationError::from_domain(
            &ChatId::new("c1"),
            TurnStage::AppendUserMessage,
            ChatError::Validation("user message content is empty".to_string()),
        );
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_storage_error_mentions_stage() {
        let error = ApplicationError::storage(
            &ChatId::new("c1"),
            TurnStage::LoadChat,
            RepositoryError::DatabaseError("disk full".to_string()),
        );
        assert_eq!(
            error.to_string(),
            "Storage error for chat c1 while loading chat: Database error: disk full"
        );
    }
}
