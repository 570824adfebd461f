use thiserror::Error;

use crate::engine::StartError;
use crate::rpc::RpcError;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("RPC 错误: {0}")]
    Rpc(#[from] RpcError),

    #[error("引擎启动失败: {0}")]
    Start(#[from] StartError),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} 没有返回任务 ID")]
    EmptyTaskId(&'static str),
}

impl DownloadError {
    pub fn is_engine(&self) -> bool {
        matches!(self, DownloadError::Rpc(e) if e.is_engine())
    }
}
