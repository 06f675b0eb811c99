// Chat Queries - 查询定义和处理器

mod get_chat;

pub use get_chat::*;
