use thiserror::Error;

use crate::modules::chat::{ApplicationError, LLMError, RepositoryError};
use crate::modules::config::ConfigError;

/// 模块装配和启动阶段的错误
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Storage error: {0}")]
    StorageError(#[from] RepositoryError),

    #[error("LLM error: {0}")]
    LLMError(#[from] LLMError),

    #[error(transparent)]
    Application(#[from] ApplicationError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
