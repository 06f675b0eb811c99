// Chat Domain - Value Objects
// 值对象是不可变的，通过值而非标识来比较

mod chat_config;
mod chat_id;
mod message_id;
mod model;

pub use chat_config::*;
pub use chat_id::*;
pub use message_id::*;
pub use model::*;
