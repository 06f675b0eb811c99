use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::super::errors::ChatError;
use super::super::value_objects::{MessageId, Model};

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// 系统提示
    System,
    /// 用户消息
    User,
    /// AI 助手消息
    Assistant,
}

impl MessageRole {
    /// 转换为 OpenAI 格式的角色名
    pub fn to_openai_role(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// 消息实体
///
/// 属于 Chat 聚合，创建后不可变；token 数在创建时根据所属模型计算
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    id: MessageId,
    role: MessageRole,
    content: String,
    tokens: u32,
    created_at: DateTime<Utc>,
}

impl Message {
    /// 创建消息并计算 token 数
    pub fn new(
        role: MessageRole,
        content: impl Into<String>,
        model: &Model,
    ) -> Result<Self, ChatError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(ChatError::Validation(format!(
                "{} message content is empty",
                role.to_openai_role()
            )));
        }

        let tokens = model.count_tokens(&content)?;

        Ok(Self {
            id: MessageId::new(),
            role,
            content,
            tokens,
            created_at: Utc::now(),
        })
    }

    pub fn system(content: impl Into<String>, model: &Model) -> Result<Self, ChatError> {
        Self::new(MessageRole::System, content, model)
    }

    pub fn user(content: impl Into<String>, model: &Model) -> Result<Self, ChatError> {
        Self::new(MessageRole::User, content, model)
    }

    pub fn assistant(content: impl Into<String>, model: &Model) -> Result<Self, ChatError> {
        Self::new(MessageRole::Assistant, content, model)
    }

    // Getters
    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
