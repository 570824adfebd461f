use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 引擎启动失败，对初始化来说是致命错误
#[derive(Debug, Error)]
pub enum StartError {
    #[error("未找到 aria2 可执行文件: {0}")]
    BinaryNotFound(PathBuf),

    #[error("准备引擎运行环境失败 {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("启动 aria2 进程失败 {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("aria2 在 {waited:?} 内未就绪")]
    NotReady { waited: Duration },

    #[error("创建 RPC 客户端失败: {0}")]
    Client(#[from] crate::rpc::RpcError),
}
