//! Infrastructure layer for the rollcall node: config file persistence.

pub mod storage;

pub use storage::{default_config_path, load_config, save_config};
