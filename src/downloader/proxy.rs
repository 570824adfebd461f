use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::models::ProxySettings;
use crate::rpc::{RpcArg, RpcError, RpcInvoke, RpcTransport};

pub const PROXY_KEY: &str = "all-proxy";
pub const PROXY_USER_KEY: &str = "all-proxy-user";
pub const PROXY_PASSWORD_KEY: &str = "all-proxy-passwd";

/// 代理设置对应的全局选项。地址为空或端口无效时三项都显式置空
pub fn proxy_options(settings: &ProxySettings) -> BTreeMap<String, String> {
    let address = settings.address.trim();

    let (proxy, user, password) = if address.is_empty() || settings.port == 0 {
        (String::new(), String::new(), String::new())
    } else {
        (
            format!("{}://{}:{}", settings.kind.scheme(), address, settings.port),
            settings.username.trim().to_string(),
            settings.password.clone(),
        )
    };

    BTreeMap::from([
        (PROXY_KEY.to_string(), proxy),
        (PROXY_USER_KEY.to_string(), user),
        (PROXY_PASSWORD_KEY.to_string(), password),
    ])
}

pub struct ProxyConfigurator {
    rpc: Arc<dyn RpcTransport>,
}

impl ProxyConfigurator {
    pub fn new(rpc: Arc<dyn RpcTransport>) -> Self {
        Self { rpc }
    }

    pub async fn apply(&self, settings: &ProxySettings) -> Result<(), RpcError> {
        let options = proxy_options(settings);
        let enabled = !options[PROXY_KEY].is_empty();

        match self
            .rpc
            .invoke::<String>("changeGlobalOption", vec![RpcArg::Map(options)])
            .await
        {
            Ok(_) if enabled => {
                info!("已设置代理: {}://{}:{}", settings.kind.scheme(), settings.address.trim(), settings.port);
                Ok(())
            }
            Ok(_) => {
                info!("已清除代理设置");
                Ok(())
            }
            Err(e) => {
                warn!("设置代理失败: {}", e);
                Err(e)
            }
        }
    }
}
