// Chat Domain Layer
// 领域层包含聚合、值对象、领域服务和领域错误

pub mod entities;
pub mod errors;
pub mod services;
pub mod value_objects;

// 重导出常用类型
pub use entities::{Chat, ChatStatus, Message, MessageRole};
pub use errors::ChatError;
pub use services::TokenCounter;
pub use value_objects::{ChatConfig, ChatId, MessageId, Model};
