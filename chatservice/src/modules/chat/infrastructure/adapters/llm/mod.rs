// LLM Adapters
// 补全提供商的适配器实现

mod mock;
mod openai;

pub use mock::*;
pub use openai::*;
