// aria2 引擎进程管理

pub mod config;
pub mod error;
pub mod process;

pub use config::EngineConfig;
pub use error::StartError;
pub use process::EngineProcess;
