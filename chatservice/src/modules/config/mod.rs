// Config Module
//
// 配置管理模块
//
// 层次结构:
// - domain: 领域层，包含配置实体、值对象和校验规则
// - ports: 端口层，定义配置读写的抽象接口
// - infrastructure: 基础设施层，实现基于文件和环境变量的配置加载

pub mod domain;
pub mod infrastructure;
pub mod ports;

// 重新导出常用类型
pub use domain::{AppConfig, ChatDefaults, LLMSettings, LogLevel, StorageBackend, StorageSettings};
pub use infrastructure::FileConfigLoader;
pub use ports::{ConfigError, ConfigRepository};
