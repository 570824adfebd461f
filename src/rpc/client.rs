use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use tracing::debug;

use super::error::RpcError;
use super::models::{JsonRpcRequest, JsonRpcResponse, ResultShape, RpcArg, RpcReply, RpcResult};

/// 与下载引擎通信的最小接口：发送一次调用并返回原始 `result`
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(
        &self,
        method: &str,
        args: Vec<RpcArg>,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError>;
}

/// 在 [`RpcTransport`] 之上的类型化调用
#[async_trait]
pub trait RpcInvoke: RpcTransport {
    async fn invoke<R: RpcResult>(&self, method: &str, args: Vec<RpcArg>) -> Result<R, RpcError> {
        let value = self.call(method, args, None).await?;
        R::decode(value)
    }

    async fn invoke_with_timeout<R: RpcResult>(
        &self,
        method: &str,
        args: Vec<RpcArg>,
        timeout: Duration,
    ) -> Result<R, RpcError> {
        let value = self.call(method, args, Some(timeout)).await?;
        R::decode(value)
    }

    /// 结果形状在运行时才确定的调用（命令行调试用）
    async fn invoke_shape(
        &self,
        method: &str,
        args: Vec<RpcArg>,
        shape: ResultShape,
    ) -> Result<RpcReply, RpcError> {
        let value = self.call(method, args, None).await?;
        shape.decode(value)
    }
}

impl<T: RpcTransport + ?Sized> RpcInvoke for T {}

// aria2 的 JSON-RPC 客户端
#[derive(Debug, Clone)]
pub struct Aria2Client {
    inner: Client,
    endpoint: String,
    secret: Option<String>,
}

impl Aria2Client {
    pub fn new(
        endpoint: impl Into<String>,
        secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RpcError> {
        // 本地回环地址，不走系统代理
        let inner = ClientBuilder::new().timeout(timeout).no_proxy().build()?;

        Ok(Self {
            inner,
            endpoint: endpoint.into(),
            secret: secret.filter(|s| !s.is_empty()),
        })
    }

    pub fn local(port: u16, secret: Option<String>, timeout: Duration) -> Result<Self, RpcError> {
        Self::new(format!("http://127.0.0.1:{}/jsonrpc", port), secret, timeout)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    // 未带命名空间的方法默认属于 aria2
    fn method_name(method: &str) -> String {
        if method.contains('.') {
            method.to_string()
        } else {
            format!("aria2.{}", method)
        }
    }

    pub(crate) fn build_request(&self, method: &str, args: Vec<RpcArg>) -> JsonRpcRequest {
        let mut params = Vec::with_capacity(args.len() + 1);
        if let Some(secret) = &self.secret {
            params.push(RpcArg::Text(format!("token:{}", secret)));
        }
        params.extend(args);

        JsonRpcRequest {
            jsonrpc: "2.0",
            id: uuid::Uuid::new_v4().to_string(),
            method: Self::method_name(method),
            params,
        }
    }
}

#[async_trait]
impl RpcTransport for Aria2Client {
    async fn call(
        &self,
        method: &str,
        args: Vec<RpcArg>,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError> {
        let request = self.build_request(method, args);
        debug!("RPC 调用: {} (id={})", request.method, request.id);

        let mut builder = self.inner.post(&self.endpoint).json(&request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let resp = builder.send().await.map_err(|e| {
            debug!("RPC 调用失败: {} - {}", request.method, e);
            RpcError::Transport(e)
        })?;

        let status = resp.status();
        let raw_body = resp.bytes().await?;
        let parsed = serde_json::from_slice::<JsonRpcResponse>(&raw_body);

        if !status.is_success() {
            // aria2 拒绝调用时返回 4xx/5xx，响应体仍是错误信封
            if let Ok(JsonRpcResponse {
                error: Some(error), ..
            }) = parsed
            {
                debug!("RPC 被拒绝: {} - {} {}", request.method, status, error.message);
                return Err(RpcError::Engine {
                    code: error.code,
                    message: error.message,
                });
            }
            debug!("RPC 非成功状态码: {} - {}", request.method, status);
            return Err(RpcError::HttpStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&raw_body).into_owned(),
            });
        }

        let body = parsed?;
        if let Some(error) = body.error {
            return Err(RpcError::Engine {
                code: error.code,
                message: error.message,
            });
        }

        Ok(body.result.unwrap_or(Value::Null))
    }
}
