// Chat Commands - 命令定义和处理器

mod chat_completion;
mod end_chat;

pub use chat_completion::*;
pub use end_chat::*;
