use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::super::errors::ChatError;
use super::super::value_objects::{ChatConfig, ChatId};
use super::{Message, MessageRole};

/// 对话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    Active,
    Ended,
}

/// 对话实体 - 聚合根
///
/// Chat 拥有有序的消息历史，并负责维护 token 预算：
/// 历史消息的 token 总数不能超过 `model.max_tokens - config.max_tokens`，
/// 剩余部分留给下一次回复。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ChatRecord")]
pub struct Chat {
    id: ChatId,
    user_id: String,
    status: ChatStatus,
    config: ChatConfig,
    messages: Vec<Message>,
    token_usage: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// 反序列化的中间结构，转换为 Chat 时重新校验不变量
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRecord {
    id: ChatId,
    user_id: String,
    status: ChatStatus,
    config: ChatConfig,
    messages: Vec<Message>,
    token_usage: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ChatRecord> for Chat {
    type Error = ChatError;

    fn try_from(record: ChatRecord) -> Result<Self, Self::Error> {
        if record.id.is_empty() {
            return Err(ChatError::Validation("chat id is empty".to_string()));
        }
        if record.user_id.trim().is_empty() {
            return Err(ChatError::Validation(format!(
                "chat {} has an empty user id",
                record.id
            )));
        }

        let roles: Vec<MessageRole> = record.messages.iter().map(|m| m.role()).collect();
        if roles.first() != Some(&MessageRole::System)
            || roles[1..].contains(&MessageRole::System)
        {
            return Err(ChatError::Validation(format!(
                "chat {} must start with exactly one system message",
                record.id
            )));
        }

        let sum = record
            .messages
            .iter()
            .try_fold(0u32, |acc, m| acc.checked_add(m.tokens()));
        if sum != Some(record.token_usage) {
            return Err(ChatError::Validation(format!(
                "chat {} token usage {} does not match its messages",
                record.id, record.token_usage
            )));
        }

        let limit = record.config.history_budget();
        if record.token_usage > limit {
            return Err(ChatError::TokenBudgetExceeded {
                used: record.token_usage,
                requested: 0,
                limit,
            });
        }

        Ok(Self {
            id: record.id,
            user_id: record.user_id,
            status: record.status,
            config: record.config,
            messages: record.messages,
            token_usage: record.token_usage,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

impl Chat {
    /// 创建新对话（自动生成 ID）
    pub fn new(
        user_id: impl Into<String>,
        initial_system_message: Message,
        config: ChatConfig,
    ) -> Result<Self, ChatError> {
        Self::with_id(ChatId::generate(), user_id, initial_system_message, config)
    }

    /// 使用指定 ID 创建新对话
    ///
    /// 新对话总是以一条系统消息开始
    pub fn with_id(
        id: ChatId,
        user_id: impl Into<String>,
        initial_system_message: Message,
        config: ChatConfig,
    ) -> Result<Self, ChatError> {
        let user_id = user_id.into();

        if id.is_empty() {
            return Err(ChatError::Validation("chat id is empty".to_string()));
        }
        if user_id.trim().is_empty() {
            return Err(ChatError::Validation("user id is empty".to_string()));
        }
        if initial_system_message.role() != MessageRole::System {
            return Err(ChatError::Validation(format!(
                "initial message must be a system message, got {}",
                initial_system_message.role().to_openai_role()
            )));
        }
        if config.n == 0 {
            return Err(ChatError::Validation(
                "n must request at least one completion".to_string(),
            ));
        }
        if config.max_tokens >= config.model.max_tokens() {
            return Err(ChatError::Validation(format!(
                "response budget {} leaves no room in the {} token window of {}",
                config.max_tokens,
                config.model.max_tokens(),
                config.model.name()
            )));
        }

        let now = Utc::now();
        let mut chat = Self {
            id,
            user_id,
            status: ChatStatus::Active,
            config,
            messages: Vec::new(),
            token_usage: 0,
            created_at: now,
            updated_at: now,
        };
        chat.add_message(initial_system_message)?;

        Ok(chat)
    }

    // Getters
    pub fn id(&self) -> &ChatId {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn status(&self) -> ChatStatus {
        self.status
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 历史消息已消耗的 token 总数
    pub fn token_usage(&self) -> u32 {
        self.token_usage
    }

    /// 历史消息还能使用的 token 数
    pub fn remaining_tokens(&self) -> u32 {
        self.config.history_budget().saturating_sub(self.token_usage)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    // 业务方法

    /// 追加消息
    ///
    /// 超出预算或对话已结束时返回错误，且不修改聚合
    pub fn add_message(&mut self, message: Message) -> Result<(), ChatError> {
        if self.status == ChatStatus::Ended {
            return Err(ChatError::Validation(format!(
                "chat {} has ended, no more messages allowed",
                self.id
            )));
        }

        let limit = self.config.history_budget();
        let requested = message.tokens();
        let total = self.token_usage.saturating_add(requested);
        if total > limit {
            return Err(ChatError::TokenBudgetExceeded {
                used: self.token_usage,
                requested,
                limit,
            });
        }

        self.messages.push(message);
        self.token_usage = total;
        self.touch();
        Ok(())
    }

    /// 结束对话
    pub fn end(&mut self) {
        self.status = ChatStatus::Ended;
        self.touch();
    }

    pub fn is_ended(&self) -> bool {
        self.status == ChatStatus::Ended
    }

    /// 更新修改时间
    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
