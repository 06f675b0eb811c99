use serde::{Deserialize, Serialize};

use super::Model;

/// 生成参数配置
///
/// temperature / top_p / penalty 等取值范围由提供商在调用时校验，这里不做截断
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    pub temperature: f32,
    pub top_p: f32,
    /// 请求的候选回复数量（>= 1）
    pub n: u32,
    pub stop: Vec<String>,
    /// 为回复预留的 token 数
    pub max_tokens: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub model: Model,
}

impl ChatConfig {
    /// 使用默认生成参数创建配置
    pub fn new(model: Model) -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            n: 1,
            stop: Vec::new(),
            max_tokens: 0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            model,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = stop;
        self
    }

    /// 历史消息可用的 token 上限（模型上限减去回复预留）
    pub fn history_budget(&self) -> u32 {
        self.model.max_tokens().saturating_sub(self.max_tokens)
    }
}
