pub mod common;
pub mod downloader;
pub mod engine;
pub mod rpc;

pub use downloader::{DownloadError, DownloadService, PollConfig};
pub use engine::{EngineConfig, EngineProcess, StartError};
pub use rpc::{Aria2Client, RpcError, RpcInvoke, RpcTransport};
