use serde::{Deserialize, Serialize};

use super::super::errors::ChatError;
use super::super::services::TokenCounter;

/// 模型描述
///
/// 值对象：模型名称 + 上下文 token 上限，创建后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    name: String,
    max_tokens: u32,
}

impl Model {
    pub fn new(name: impl Into<String>, max_tokens: u32) -> Result<Self, ChatError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ChatError::Validation("model name is empty".to_string()));
        }
        if max_tokens == 0 {
            return Err(ChatError::Validation(format!(
                "model {} must have a token budget greater than zero",
                name
            )));
        }
        Ok(Self { name, max_tokens })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// 使用该模型对应的分词器计算 token 数
    pub fn count_tokens(&self, text: &str) -> Result<u32, ChatError> {
        TokenCounter::count(&self.name, text)
    }
}
