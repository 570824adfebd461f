use std::collections::HashMap;

use dashmap::{DashMap, DashSet};
use futures::StreamExt;
use tracing::debug;

use crate::rpc::{RpcArg, RpcInvoke, RpcTransport};

pub const DEFAULT_SPLIT: u32 = 1;

// 同时进行的回填查询数
const BACKFILL_CONCURRENCY: usize = 4;

/// 任务 id -> 分片数。快照里没有分片信息，只能在添加时记录或向引擎补查
#[derive(Debug, Default)]
pub struct SplitCache {
    splits: DashMap<String, u32>,
    // 查询过（或添加时已知）的 id，不再重复查询
    attempted: DashSet<String>,
}

impl SplitCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<u32> {
        self.splits.get(id).map(|v| *v).filter(|v| *v > 0)
    }

    pub fn set(&self, id: &str, split: u32) {
        self.attempted.insert(id.to_string());
        self.splits
            .insert(id.to_string(), if split > 0 { split } else { DEFAULT_SPLIT });
    }

    /// 对没有记录的 id 各查询一次 `getOption`，失败或无效值记为 1，之后不再查询
    pub async fn backfill<'a, T>(&self, rpc: &T, ids: impl IntoIterator<Item = &'a str>)
    where
        T: RpcTransport + ?Sized,
    {
        let pending: Vec<String> = ids
            .into_iter()
            .filter(|id| !id.is_empty())
            .filter(|id| self.attempted.insert(id.to_string()))
            .map(str::to_string)
            .collect();

        if pending.is_empty() {
            return;
        }
        debug!("回填 {} 个任务的分片数", pending.len());

        futures::stream::iter(pending)
            .for_each_concurrent(BACKFILL_CONCURRENCY, |id| async move {
                let split = match rpc
                    .invoke::<HashMap<String, String>>("getOption", vec![RpcArg::from(id.as_str())])
                    .await
                {
                    Ok(options) => options
                        .get("split")
                        .and_then(|v| v.trim().parse::<u32>().ok())
                        .filter(|v| *v > 0),
                    Err(e) => {
                        debug!("查询任务 {} 的分片数失败: {}", id, e);
                        None
                    }
                };
                self.splits.entry(id).or_insert(split.unwrap_or(DEFAULT_SPLIT));
            })
            .await;
    }
}
