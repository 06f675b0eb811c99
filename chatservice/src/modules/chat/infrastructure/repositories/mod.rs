// Chat Infrastructure - Repositories
//
// 仓储实现：
// - InMemoryChatRepository: 内存仓储，用于开发和测试
// - FileChatRepository: 文件持久化仓储

mod file_chat_repository;
mod in_memory_chat_repository;

pub use file_chat_repository::*;
pub use in_memory_chat_repository::*;
