// Config Domain Entities
//
// 配置领域实体定义

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::value_objects::{LogLevel, StorageBackend};
use crate::modules::chat::application::ChatCompletionConfigInput;
use crate::modules::chat::ports::LLMProviderConfig;

/// 补全服务配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LLMSettings {
    pub provider_id: String,
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for LLMSettings {
    fn default() -> Self {
        let provider = LLMProviderConfig::default();
        Self {
            provider_id: provider.id,
            base_url: provider.base_url,
            api_key: provider.api_key,
            timeout_secs: provider.timeout_secs,
        }
    }
}

impl LLMSettings {
    /// 未配置 API Key 时使用模拟适配器
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn to_provider_config(&self) -> LLMProviderConfig {
        LLMProviderConfig {
            id: self.provider_id.clone(),
            name: self.provider_id.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// 存储配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// 新建对话的默认参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatDefaults {
    pub model: String,
    pub model_max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub n: u32,
    pub stop: Vec<String>,
    /// 回复的最大 token 数，0 表示不限制
    pub max_tokens: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub system_message: String,
}

impl Default for ChatDefaults {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            model_max_tokens: 16_384,
            temperature: 1.0,
            top_p: 1.0,
            n: 1,
            stop: Vec::new(),
            max_tokens: 1_024,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            system_message: "You are a helpful assistant.".to_string(),
        }
    }
}

impl ChatDefaults {
    pub fn to_config_input(&self) -> ChatCompletionConfigInput {
        ChatCompletionConfigInput {
            model: self.model.clone(),
            model_max_tokens: self.model_max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            n: self.n,
            stop: self.stop.clone(),
            max_tokens: self.max_tokens,
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
            initial_system_message: self.system_message.clone(),
        }
    }
}

/// 应用配置聚合根
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub llm: LLMSettings,
    pub storage: StorageSettings,
    pub chat_defaults: ChatDefaults,
    pub log_level: LogLevel,
}

impl AppConfig {
    /// 校验配置，返回所有问题
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let base_url = self.llm.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            errors.push(format!("llm.baseUrl must be an http(s) URL, got {:?}", base_url));
        }
        if self.llm.timeout_secs == 0 {
            errors.push("llm.timeoutSecs must be greater than 0".to_string());
        }

        if self.storage.backend == StorageBackend::File
            && self.storage.data_dir.as_os_str().is_empty()
        {
            errors.push("storage.dataDir is required for the file backend".to_string());
        }

        let defaults = &self.chat_defaults;
        if defaults.model.trim().is_empty() {
            errors.push("chatDefaults.model must not be empty".to_string());
        }
        if defaults.model_max_tokens == 0 {
            errors.push("chatDefaults.modelMaxTokens must be greater than 0".to_string());
        } else if defaults.max_tokens >= defaults.model_max_tokens {
            errors.push(format!(
                "chatDefaults.maxTokens ({}) must be below modelMaxTokens ({})",
                defaults.max_tokens, defaults.model_max_tokens
            ));
        }
        if defaults.n == 0 {
            errors.push("chatDefaults.n must be at least 1".to_string());
        }
        if !(0.0..=2.0).contains(&defaults.temperature) {
            errors.push("chatDefaults.temperature must be within [0, 2]".to_string());
        }
        if !(0.0..=1.0).contains(&defaults.top_p) {
            errors.push("chatDefaults.topP must be within [0, 1]".to_string());
        }
        if defaults.system_message.trim().is_empty() {
            errors.push("chatDefaults.systemMessage must not be empty".to_string());
        }

        errors
    }
}
