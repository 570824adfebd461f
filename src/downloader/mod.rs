use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{EngineConfig, EngineProcess};
use crate::rpc::{RpcArg, RpcInvoke, RpcTransport};

pub mod error;
pub mod mapper;
pub mod models;
pub mod proxy;
pub mod reconciler;
pub mod split_cache;

pub use error::DownloadError;
pub use models::{ProxyKind, ProxySettings, Task, TaskDiff, TaskNotification, TaskStatus};
pub use reconciler::{PollConfig, Reconciler};

use proxy::ProxyConfigurator;
use split_cache::SplitCache;

const MAX_CONNECTION_PER_SERVER: &str = "16";
const MIN_SPLIT_SIZE: &str = "1M";
const CONTROL_FILE_SUFFIX: &str = ".aria2";

/// 任务管理的对外入口：持有引擎、RPC 客户端和任务列表
pub struct DownloadService {
    rpc: Arc<dyn RpcTransport>,
    splits: Arc<SplitCache>,
    reconciler: Arc<Reconciler>,
    proxy: ProxyConfigurator,
    engine: Option<EngineProcess>,
    cancel: CancellationToken,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl DownloadService {
    /// 启动本地引擎，完成第一次刷新并开始轮询
    pub async fn start(engine: &EngineConfig, poll: PollConfig) -> Result<Self, DownloadError> {
        let process = EngineProcess::start(engine).await?;
        let rpc: Arc<dyn RpcTransport> = process.client();

        let service = Self::build(rpc, Some(process), poll);
        if let Err(e) = service.refresh().await {
            warn!("首次刷新任务列表失败: {}", e);
        }
        service.start_polling();
        Ok(service)
    }

    /// 连接一个已经在运行的引擎，不负责其生命周期，也不自动轮询
    pub fn attach(rpc: Arc<dyn RpcTransport>, poll: PollConfig) -> Self {
        Self::build(rpc, None, poll)
    }

    fn build(rpc: Arc<dyn RpcTransport>, engine: Option<EngineProcess>, poll: PollConfig) -> Self {
        let splits = Arc::new(SplitCache::new());
        Self {
            reconciler: Arc::new(Reconciler::new(Arc::clone(&rpc), Arc::clone(&splits), poll)),
            proxy: ProxyConfigurator::new(Arc::clone(&rpc)),
            rpc,
            splits,
            engine,
            cancel: CancellationToken::new(),
            poller: Mutex::new(None),
        }
    }

    pub fn start_polling(&self) {
        let mut poller = self.poller.lock().unwrap_or_else(|e| e.into_inner());
        if poller.is_some() || self.cancel.is_cancelled() {
            return;
        }
        let reconciler = Arc::clone(&self.reconciler);
        *poller = Some(tokio::spawn(reconciler.run(self.cancel.clone())));
    }

    pub fn rpc(&self) -> Arc<dyn RpcTransport> {
        Arc::clone(&self.rpc)
    }

    pub fn engine(&self) -> Option<&EngineProcess> {
        self.engine.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskDiff> {
        self.reconciler.subscribe()
    }

    pub async fn get_tasks(&self) -> Vec<Task> {
        self.reconciler.snapshot().await
    }

    pub async fn get_task(&self, id: &str) -> Option<Task> {
        self.reconciler.task(id).await
    }

    pub async fn refresh(&self) -> Result<TaskDiff, DownloadError> {
        Ok(self.reconciler.refresh().await?)
    }

    pub async fn global_stat(&self) -> Result<HashMap<String, String>, DownloadError> {
        Ok(self.rpc.invoke("getGlobalStat", vec![]).await?)
    }

    // ----------------------------------------------------------------

    pub async fn add_uri(
        &self,
        url: &str,
        name: &str,
        save_path: &str,
        split: u32,
        extra_options: &HashMap<String, String>,
    ) -> Result<String, DownloadError> {
        let split = split.max(1);
        let options = add_uri_options(save_path, name, split, extra_options);

        let _pause = self.reconciler.suspend();
        let id = self
            .rpc
            .invoke::<String>(
                "addUri",
                vec![RpcArg::List(vec![url.to_string()]), RpcArg::Map(options)],
            )
            .await
            .inspect_err(|e| warn!("添加下载失败 {}: {}", url, e))?;
        if id.trim().is_empty() {
            return Err(DownloadError::EmptyTaskId("addUri"));
        }
        info!("已添加下载: {} -> {}", url, id);

        self.splits.set(&id, split);
        let file_path = if name.is_empty() {
            String::new()
        } else {
            Path::new(save_path).join(name).to_string_lossy().into_owned()
        };
        let placeholder = Task::placeholder(&id, name, url, file_path, split);
        self.reconciler.mutate(|board| board.insert(placeholder)).await;

        self.reconciler
            .settle(self.reconciler.config().add_settle_delay)
            .await;
        Ok(id)
    }

    pub async fn add_torrent(
        &self,
        torrent: &Path,
        save_path: &str,
        extra_options: &HashMap<String, String>,
    ) -> Result<String, DownloadError> {
        let content = tokio::fs::read(torrent).await?;
        let encoded = STANDARD.encode(content);

        let mut options = BTreeMap::from([("dir".to_string(), save_path.to_string())]);
        merge_extra_options(&mut options, extra_options);

        let _pause = self.reconciler.suspend();
        let id = self
            .rpc
            .invoke::<String>(
                "addTorrent",
                vec![
                    RpcArg::Text(encoded),
                    RpcArg::List(Vec::new()),
                    RpcArg::Map(options),
                ],
            )
            .await
            .inspect_err(|e| warn!("添加种子失败 {}: {}", torrent.display(), e))?;
        if id.trim().is_empty() {
            return Err(DownloadError::EmptyTaskId("addTorrent"));
        }
        info!("已添加种子: {} -> {}", torrent.display(), id);

        let name = torrent
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let placeholder = Task::placeholder(&id, name, "", "", split_cache::DEFAULT_SPLIT);
        self.reconciler.mutate(|board| board.insert(placeholder)).await;

        self.reconciler
            .settle(self.reconciler.config().add_settle_delay)
            .await;
        Ok(id)
    }

    pub async fn pause(&self, id: &str) -> Result<(), DownloadError> {
        let _pause = self.reconciler.suspend();
        self.reconciler
            .mutate(|board| board.mark_paused(Some(id)))
            .await;
        self.command("pause", vec![RpcArg::from(id)]).await
    }

    pub async fn pause_all(&self) -> Result<(), DownloadError> {
        let _pause = self.reconciler.suspend();
        self.reconciler.mutate(|board| board.mark_paused(None)).await;
        self.command("pauseAll", vec![]).await
    }

    pub async fn resume(&self, id: &str) -> Result<(), DownloadError> {
        let _pause = self.reconciler.suspend();
        self.reconciler
            .mutate(|board| board.mark_resumed(Some(id)))
            .await;
        self.command("unpause", vec![RpcArg::from(id)]).await
    }

    pub async fn resume_all(&self) -> Result<(), DownloadError> {
        let _pause = self.reconciler.suspend();
        self.reconciler.mutate(|board| board.mark_resumed(None)).await;
        self.command("unpauseAll", vec![]).await
    }

    /// 活动任务用 `remove`，已结束的任务引擎会拒绝，再改用 `removeDownloadResult`
    pub async fn remove(&self, id: &str) -> Result<(), DownloadError> {
        let _pause = self.reconciler.suspend();
        self.reconciler.mutate(|board| board.remove(id)).await;

        match self.rpc.invoke::<String>("remove", vec![RpcArg::from(id)]).await {
            Ok(_) => {}
            Err(e) if e.is_engine() => {
                debug!("remove {} 被拒绝 ({})，改用 removeDownloadResult", id, e);
                self.rpc
                    .invoke::<String>("removeDownloadResult", vec![RpcArg::from(id)])
                    .await
                    .inspect_err(|e| warn!("删除任务 {} 失败: {}", id, e))?;
            }
            Err(e) => {
                warn!("删除任务 {} 失败: {}", id, e);
                return Err(e.into());
            }
        }

        info!("已删除任务: {}", id);
        self.reconciler
            .settle(self.reconciler.config().settle_delay)
            .await;
        Ok(())
    }

    /// 删除任务，并删除已下载的文件和控制文件
    pub async fn remove_and_delete_files(&self, id: &str) -> Result<(), DownloadError> {
        let file_path = self
            .reconciler
            .task(id)
            .await
            .map(|t| t.file_path)
            .filter(|p| !p.is_empty());

        self.remove(id).await?;

        if let Some(path) = file_path {
            delete_if_exists(Path::new(&path)).await;
            delete_if_exists(Path::new(&format!("{}{}", path, CONTROL_FILE_SUFFIX))).await;
        }
        Ok(())
    }

    pub async fn apply_proxy(&self, settings: &ProxySettings) -> Result<(), DownloadError> {
        Ok(self.proxy.apply(settings).await?)
    }

    // 调用引擎；成功后等待并纠正一次，失败不回滚，由后续轮询纠正
    async fn command(&self, method: &str, args: Vec<RpcArg>) -> Result<(), DownloadError> {
        match self.rpc.invoke::<String>(method, args).await {
            Ok(_) => {
                debug!("{} 已执行", method);
                self.reconciler
                    .settle(self.reconciler.config().settle_delay)
                    .await;
                Ok(())
            }
            Err(e) => {
                warn!("{} 失败: {}", method, e);
                Err(e.into())
            }
        }
    }

    /// 停止轮询并关闭引擎，可重复调用
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let poller = self
            .poller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut handle) = poller {
            let timeout = self.reconciler.config().stop_timeout;
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                warn!("轮询未在 {:?} 内结束，放弃等待", timeout);
                handle.abort();
            }
        }

        if let Some(engine) = &self.engine {
            engine.shutdown().await;
        }
    }
}

impl Drop for DownloadService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// `addUri` 的下载选项，额外选项最后写入，空键忽略
pub fn add_uri_options(
    save_path: &str,
    name: &str,
    split: u32,
    extra_options: &HashMap<String, String>,
) -> BTreeMap<String, String> {
    let mut options = BTreeMap::from([
        ("dir".to_string(), save_path.to_string()),
        ("split".to_string(), split.max(1).to_string()),
        (
            "max-connection-per-server".to_string(),
            MAX_CONNECTION_PER_SERVER.to_string(),
        ),
        ("min-split-size".to_string(), MIN_SPLIT_SIZE.to_string()),
    ]);
    if !name.is_empty() {
        options.insert("out".to_string(), name.to_string());
    }
    merge_extra_options(&mut options, extra_options);
    options
}

fn merge_extra_options(options: &mut BTreeMap<String, String>, extra: &HashMap<String, String>) {
    for (key, value) in extra {
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        options.insert(key.to_string(), value.clone());
    }
}

// 尽力删除，失败只记录日志
async fn delete_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("已删除文件: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("删除文件失败 {}: {}", path.display(), e),
    }
}
