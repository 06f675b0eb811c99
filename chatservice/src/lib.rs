pub mod modules;
pub mod shared;

use tracing_subscriber::EnvFilter;

pub use modules::chat::{
    ApplicationError, ChatCompletionCommand, ChatCompletionOutput, ErrorKind, StreamEvent,
};
pub use modules::config::LogLevel;
pub use modules::{AppConfig, ChatModule, FileConfigLoader};
pub use shared::{AppError, AppResult};

/// 初始化日志
///
/// 设置了 `RUST_LOG` 时优先使用，否则使用给定级别。重复调用不会生效
pub fn init_logging(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
