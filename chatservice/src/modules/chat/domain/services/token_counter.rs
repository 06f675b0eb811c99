use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use tiktoken_rs::CoreBPE;
use tracing::debug;

use super::super::errors::ChatError;

/// 按模型名缓存的 BPE 编码器
static ENCODERS: LazyLock<Mutex<HashMap<String, Arc<CoreBPE>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Token 计数器
///
/// 领域服务：根据模型名选择 tiktoken 编码，未知模型回退到 cl100k_base
pub struct TokenCounter;

impl TokenCounter {
    /// 计算文本在指定模型下的 token 数
    pub fn count(model: &str, text: &str) -> Result<u32, ChatError> {
        if text.is_empty() {
            return Ok(0);
        }

        let encoder = Self::encoder_for(model)?;
        let tokens = encoder.encode_with_special_tokens(text).len();
        u32::try_from(tokens)
            .map_err(|_| ChatError::Tokenizer(format!("token count overflow: {}", tokens)))
    }

    fn encoder_for(model: &str) -> Result<Arc<CoreBPE>, ChatError> {
        if let Some(encoder) = Self::cached(model)? {
            return Ok(encoder);
        }

        // 编码器在锁外构建，并发的首次构建以先写入者为准
        let encoder = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(_) => {
                debug!("No tokenizer registered for model {}, using cl100k_base", model);
                tiktoken_rs::cl100k_base().map_err(|e| ChatError::Tokenizer(e.to_string()))?
            }
        };

        let mut encoders = ENCODERS
            .lock()
            .map_err(|e| ChatError::Tokenizer(e.to_string()))?;
        Ok(encoders
            .entry(model.to_string())
            .or_insert_with(|| Arc::new(encoder))
            .clone())
    }

    fn cached(model: &str) -> Result<Option<Arc<CoreBPE>>, ChatError> {
        let encoders = ENCODERS
            .lock()
            .map_err(|e| ChatError::Tokenizer(e.to_string()))?;
        Ok(encoders.get(model).cloned())
    }
}
