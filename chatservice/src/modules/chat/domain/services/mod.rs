// Chat Domain - Services
// 领域服务处理不属于任何实体的业务逻辑

mod token_counter;

pub use token_counter::*;
