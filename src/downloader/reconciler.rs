use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::mapper::map_task;
use super::models::{NotificationKind, Task, TaskDiff, TaskNotification, TaskStatus};
use super::split_cache::SplitCache;
use crate::rpc::{RawTaskStatus, RpcArg, RpcError, RpcInvoke, RpcTransport};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub waiting_page: i64,
    pub stopped_page: i64,
    /// 批量命令后等待引擎处理的时间
    pub settle_delay: Duration,
    pub add_settle_delay: Duration,
    /// 关闭时等待进行中的轮询结束的上限
    pub stop_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            waiting_page: 100,
            stopped_page: 100,
            settle_delay: Duration::from_millis(500),
            add_settle_delay: Duration::from_millis(200),
            stop_timeout: Duration::from_secs(3),
        }
    }
}

// --------------------------------------------------------------------
// 已发布的任务列表，以及上一次轮询看到的状态

#[derive(Debug, Default)]
pub struct TaskBoard {
    tasks: Vec<Task>,
    last_seen: HashMap<String, TaskStatus>,
}

impl TaskBoard {
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// 用一轮完整快照对账：先删除消失的任务，再原地更新已有任务，最后追加新任务
    pub fn reconcile(&mut self, fresh: Vec<Task>) -> TaskDiff {
        let mut diff = TaskDiff::default();

        // 同一个 id 可能在两次查询之间换了队列，保留先出现的
        let mut ids = HashSet::with_capacity(fresh.len());
        let fresh: Vec<Task> = fresh
            .into_iter()
            .filter(|t| ids.insert(t.id.clone()))
            .collect();

        // 只在状态变化时通知，第一次出现就处于终态的任务不通知
        let mut seen = HashMap::with_capacity(fresh.len());
        for task in &fresh {
            if let Some(previous) = self.last_seen.get(&task.id) {
                if *previous != task.status && task.status.is_terminal() {
                    diff.notifications.push(TaskNotification {
                        id: task.id.clone(),
                        name: task.name.clone(),
                        kind: match task.status {
                            TaskStatus::Completed => NotificationKind::Completed,
                            _ => NotificationKind::Failed,
                        },
                        message: task.error_message.clone(),
                    });
                }
            }
            seen.insert(task.id.clone(), task.status);
        }
        self.last_seen = seen;

        self.tasks.retain(|t| {
            let keep = ids.contains(&t.id);
            if !keep {
                diff.removed.push(t.id.clone());
            }
            keep
        });

        for task in fresh {
            match self.tasks.iter_mut().find(|t| t.id == task.id) {
                Some(existing) => {
                    if existing.merge_from(&task) {
                        diff.updated.push(existing.clone());
                    }
                }
                None => {
                    diff.added.push(task.clone());
                    self.tasks.push(task);
                }
            }
        }

        diff
    }

    fn update_where(
        &mut self,
        id: Option<&str>,
        matches: impl Fn(TaskStatus) -> bool,
        apply: impl Fn(&mut Task),
    ) -> TaskDiff {
        let mut diff = TaskDiff::default();
        for task in self
            .tasks
            .iter_mut()
            .filter(|t| id.is_none_or(|id| t.id == id) && matches(t.status))
        {
            apply(task);
            diff.updated.push(task.clone());
        }
        diff
    }

    /// 乐观标记为暂停，`None` 表示全部
    pub fn mark_paused(&mut self, id: Option<&str>) -> TaskDiff {
        self.update_where(
            id,
            |s| matches!(s, TaskStatus::Downloading | TaskStatus::Waiting),
            |t| {
                t.status = TaskStatus::Paused;
                t.speed_bytes_per_sec = 0;
                t.time_left.clear();
            },
        )
    }

    /// 乐观标记为等待，随后由引擎转为下载中
    pub fn mark_resumed(&mut self, id: Option<&str>) -> TaskDiff {
        self.update_where(
            id,
            |s| s == TaskStatus::Paused,
            |t| t.status = TaskStatus::Waiting,
        )
    }

    pub fn remove(&mut self, id: &str) -> TaskDiff {
        let mut diff = TaskDiff::default();
        if let Some(pos) = self.tasks.iter().position(|t| t.id == id) {
            self.tasks.remove(pos);
            diff.removed.push(id.to_string());
        }
        diff
    }

    pub fn insert(&mut self, task: Task) -> TaskDiff {
        let mut diff = TaskDiff::default();
        match self.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => {
                if existing.merge_from(&task) {
                    diff.updated.push(existing.clone());
                }
            }
            None => {
                diff.added.push(task.clone());
                self.tasks.push(task);
            }
        }
        diff
    }
}

// --------------------------------------------------------------------

/// 轮询引擎并维护任务列表，是列表的唯一写入方
pub struct Reconciler {
    rpc: Arc<dyn RpcTransport>,
    splits: Arc<SplitCache>,
    board: Mutex<TaskBoard>,
    events: broadcast::Sender<TaskDiff>,
    suspended: AtomicUsize,
    epoch: AtomicU64,
    config: PollConfig,
}

/// 持有期间定时轮询暂停，释放后恢复
pub struct PollSuspension<'a> {
    reconciler: &'a Reconciler,
}

impl Drop for PollSuspension<'_> {
    fn drop(&mut self) {
        self.reconciler.suspended.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Reconciler {
    pub fn new(rpc: Arc<dyn RpcTransport>, splits: Arc<SplitCache>, config: PollConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            rpc,
            splits,
            board: Mutex::new(TaskBoard::default()),
            events,
            suspended: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskDiff> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> Vec<Task> {
        self.board.lock().await.tasks().to_vec()
    }

    pub async fn task(&self, id: &str) -> Option<Task> {
        self.board.lock().await.get(id).cloned()
    }

    pub fn suspend(&self) -> PollSuspension<'_> {
        self.suspended.fetch_add(1, Ordering::SeqCst);
        // 让已经在途的轮询结果作废
        self.epoch.fetch_add(1, Ordering::SeqCst);
        PollSuspension { reconciler: self }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst) > 0
    }

    /// 按固定顺序拉取 active、waiting、stopped 三个队列
    pub async fn fetch(&self) -> Result<Vec<RawTaskStatus>, RpcError> {
        let mut entries: Vec<RawTaskStatus> = self.rpc.invoke("tellActive", vec![]).await?;

        let waiting: Vec<RawTaskStatus> = self
            .rpc
            .invoke(
                "tellWaiting",
                vec![RpcArg::Int(0), RpcArg::Int(self.config.waiting_page)],
            )
            .await?;
        entries.extend(waiting);

        let stopped: Vec<RawTaskStatus> = self
            .rpc
            .invoke(
                "tellStopped",
                vec![RpcArg::Int(0), RpcArg::Int(self.config.stopped_page)],
            )
            .await?;
        entries.extend(stopped);

        Ok(entries)
    }

    async fn collect(&self) -> Result<Vec<Task>, RpcError> {
        let entries = self.fetch().await?;
        self.splits
            .backfill(self.rpc.as_ref(), entries.iter().map(|e| e.gid.as_str()))
            .await;
        Ok(entries.iter().map(|e| map_task(e, &self.splits)).collect())
    }

    /// 定时器触发的一轮对账；暂停期间或结果已过期时返回 `None`
    pub async fn tick(&self) -> Result<Option<TaskDiff>, RpcError> {
        if self.is_suspended() {
            debug!("轮询已暂停，跳过本轮");
            return Ok(None);
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let fresh = self.collect().await?;

        let mut board = self.board.lock().await;
        if self.is_suspended() || self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("轮询期间有命令介入，丢弃本轮结果");
            return Ok(None);
        }
        let diff = board.reconcile(fresh);
        drop(board);

        self.publish(&diff);
        Ok(Some(diff))
    }

    /// 立即对账一次，不受暂停影响（命令结束后的纠正轮询）。
    /// 拉取期间若有其他命令改动了列表，这次结果作废，返回空变更
    pub async fn refresh(&self) -> Result<TaskDiff, RpcError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let fresh = self.collect().await?;

        let mut board = self.board.lock().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("刷新期间有其他命令介入，丢弃本次结果");
            return Ok(TaskDiff::default());
        }
        let diff = board.reconcile(fresh);
        drop(board);

        self.publish(&diff);
        Ok(diff)
    }

    /// 乐观更新
    pub async fn mutate(&self, change: impl FnOnce(&mut TaskBoard) -> TaskDiff) -> TaskDiff {
        let mut board = self.board.lock().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let diff = change(&mut board);
        drop(board);

        self.publish(&diff);
        diff
    }

    /// 等待引擎处理命令，然后纠正一次
    pub async fn settle(&self, delay: Duration) {
        // 命令已落地，在途的快照都早于它
        self.epoch.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        if let Err(e) = self.refresh().await {
            warn!("命令后的刷新失败，等待下一轮轮询: {}", e);
        }
    }

    fn publish(&self, diff: &TaskDiff) {
        if diff.is_empty() {
            return;
        }
        for n in &diff.notifications {
            info!("任务 {} ({}) 状态变为 {:?}", n.name, n.id, n.kind);
        }
        // 没有订阅者时发送失败，忽略
        let _ = self.events.send(diff.clone());
    }

    /// 定时轮询，直到取消。进行中的一轮不会被打断
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("开始轮询 aria2，间隔 {:?}", self.config.interval);

        let mut failures = 0u32;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(_) => {
                            if failures > 0 {
                                info!("刷新任务列表已恢复，此前连续失败 {} 次", failures);
                            }
                            failures = 0;
                        }
                        Err(e) => {
                            failures += 1;
                            if failures == 1 {
                                warn!("刷新任务列表失败: {}", e);
                            } else {
                                debug!("刷新任务列表失败 ({} 次): {}", failures, e);
                            }
                        }
                    }
                }
            }
        }

        info!("轮询已停止");
    }
}
