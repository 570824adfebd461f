use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::client::RpcTransport;
use super::error::RpcError;
use super::models::RpcArg;

type Handler = Box<dyn Fn(&str, &[RpcArg]) -> Result<Value, RpcError> + Send + Sync>;

/// 单元测试用的内存传输层，记录每次调用
pub(crate) struct MockTransport {
    calls: Mutex<Vec<(String, Vec<RpcArg>)>>,
    handler: Handler,
}

impl MockTransport {
    pub(crate) fn new(
        handler: impl Fn(&str, &[RpcArg]) -> Result<Value, RpcError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        }
    }

    pub(crate) fn calls(&self) -> Vec<(String, Vec<RpcArg>)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    async fn call(
        &self,
        method: &str,
        args: Vec<RpcArg>,
        _timeout: Option<Duration>,
    ) -> Result<Value, RpcError> {
        let result = (self.handler)(method, &args);
        self.calls.lock().unwrap().push((method.to_string(), args));
        result
    }
}
