use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 对话唯一标识符
///
/// 值对象：调用方可以指定任意非空字符串作为 ID（如 "c1"），
/// 未指定时使用 UUID v4 生成
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    /// 生成新的对话 ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// 使用调用方提供的字符串
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ChatId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<Uuid> for ChatId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}
