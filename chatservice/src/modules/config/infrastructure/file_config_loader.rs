// File Config Loader
//
// 基于 JSON 文件的配置仓储实现，加载时叠加环境变量覆盖

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::modules::config::domain::{AppConfig, LogLevel, StorageBackend};
use crate::modules::config::ports::{ConfigError, ConfigRepository};

const CONFIG_FILE_NAME: &str = "config.json";

pub const ENV_API_KEY: &str = "CHATSERVICE_API_KEY";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_BASE_URL: &str = "CHATSERVICE_BASE_URL";
pub const ENV_MODEL: &str = "CHATSERVICE_MODEL";
pub const ENV_DATA_DIR: &str = "CHATSERVICE_DATA_DIR";
pub const ENV_STORAGE: &str = "CHATSERVICE_STORAGE";
pub const ENV_LOG_LEVEL: &str = "CHATSERVICE_LOG_LEVEL";

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// 文件配置加载器
///
/// 读取目录下的 `config.json`（不存在时使用默认值），再应用环境变量覆盖
pub struct FileConfigLoader {
    config_path: PathBuf,
    env: EnvLookup,
}

impl FileConfigLoader {
    /// 使用进程环境变量创建
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self::with_env(config_dir, |key| std::env::var(key).ok())
    }

    /// 使用自定义环境变量来源创建
    pub fn with_env<F>(config_dir: impl AsRef<Path>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            config_path: config_dir.as_ref().join(CONFIG_FILE_NAME),
            env: Arc::new(env),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// 从文件加载配置，文件不存在时返回 None
    async fn load_from_file(&self) -> Result<Option<AppConfig>, ConfigError> {
        let content = match tokio::fs::read_to_string(&self.config_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConfigError::StorageError(e.to_string())),
        };

        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(Some(config))
    }

    /// 读取非空的环境变量
    fn var(&self, key: &str) -> Option<String> {
        (self.env)(key).filter(|v| !v.trim().is_empty())
    }

    /// 应用环境变量覆盖，返回无法解析的值
    fn apply_env_overrides(&self, config: &mut AppConfig) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(api_key) = self
            .var(ENV_API_KEY)
            .or_else(|| self.var(ENV_OPENAI_API_KEY))
        {
            config.llm.api_key = api_key;
        }
        if let Some(base_url) = self.var(ENV_BASE_URL) {
            config.llm.base_url = base_url;
        }
        if let Some(model) = self.var(ENV_MODEL) {
            config.chat_defaults.model = model;
        }
        if let Some(data_dir) = self.var(ENV_DATA_DIR) {
            config.storage.data_dir = PathBuf::from(data_dir);
        }
        if let Some(storage) = self.var(ENV_STORAGE) {
            match storage.parse::<StorageBackend>() {
                Ok(backend) => config.storage.backend = backend,
                Err(e) => errors.push(format!("{}: {}", ENV_STORAGE, e)),
            }
        }
        if let Some(level) = self.var(ENV_LOG_LEVEL) {
            match level.parse::<LogLevel>() {
                Ok(level) => config.log_level = level,
                Err(e) => errors.push(format!("{}: {}", ENV_LOG_LEVEL, e)),
            }
        }

        errors
    }
}

#[async_trait]
impl ConfigRepository for FileConfigLoader {
    async fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match self.load_from_file().await? {
            Some(config) => config,
            None => {
                debug!(
                    "No config file at {}, using defaults",
                    self.config_path.display()
                );
                AppConfig::default()
            }
        };

        let mut errors = self.apply_env_overrides(&mut config);
        errors.extend(config.validate());
        if !errors.is_empty() {
            return Err(ConfigError::ValidationError { errors });
        }

        info!(
            "Configuration loaded: storage={}, model={}",
            config.storage.backend.as_str(),
            config.chat_defaults.model
        );
        Ok(config)
    }

    async fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(ConfigError::ValidationError { errors });
        }

        // 确保目录存在
        if let Some(parent) = self.config_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConfigError::StorageError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(config)?;

        tokio::fs::write(&self.config_path, content)
            .await
            .map_err(|e| ConfigError::StorageError(e.to_string()))?;

        Ok(())
    }

    async fn exists(&self) -> Result<bool, ConfigError> {
        tokio::fs::try_exists(&self.config_path)
            .await
            .map_err(|e| ConfigError::StorageError(e.to_string()))
    }
}
