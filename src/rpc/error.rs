use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("RPC 网络请求失败: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("RPC 请求返回非成功状态码 {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("aria2 返回错误 {code}: {message}")]
    Engine { code: i64, message: String },

    #[error("不支持的 RPC 参数类型: {0}")]
    UnsupportedArgument(String),

    #[error("不支持的 RPC 结果类型: {0}")]
    UnsupportedResultType(String),

    #[error("响应解析失败: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// 网络层失败（连接、超时、非 2xx），下一轮轮询会自然重试
    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::Transport(_) | RpcError::HttpStatus { .. })
    }

    /// 引擎拒绝了本次调用
    pub fn is_engine(&self) -> bool {
        matches!(self, RpcError::Engine { .. })
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}
