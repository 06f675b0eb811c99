// Config Infrastructure Layer

pub mod file_config_loader;

pub use file_config_loader::*;
