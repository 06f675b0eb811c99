use thiserror::Error;

/// 领域层错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// 追加消息后会超出历史 token 上限
    #[error("Token budget exceeded: {used} used + {requested} requested > {limit} allowed")]
    TokenBudgetExceeded { used: u32, requested: u32, limit: u32 },

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
}
