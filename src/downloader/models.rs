use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// 对外暴露的下载任务
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub progress: f64,
    pub speed_bytes_per_sec: u64,
    pub status: TaskStatus,
    pub time_left: String,
    pub connections: u32,
    pub split: u32,
    pub file_path: String,
    pub source_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

pub const UNKNOWN_NAME: &str = "Unknown";

impl Task {
    /// 添加任务后、引擎第一次汇报前的占位记录
    pub fn placeholder(
        id: impl Into<String>,
        name: impl Into<String>,
        source_url: impl Into<String>,
        file_path: impl Into<String>,
        split: u32,
    ) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            name: if name.is_empty() {
                UNKNOWN_NAME.to_string()
            } else {
                name
            },
            total_bytes: 0,
            downloaded_bytes: 0,
            progress: 0.0,
            speed_bytes_per_sec: 0,
            status: TaskStatus::Waiting,
            time_left: String::new(),
            connections: 0,
            split: split.max(1),
            file_path: file_path.into(),
            source_url: source_url.into(),
            error_message: None,
        }
    }

    pub fn speed_text(&self) -> String {
        format_speed(self.speed_bytes_per_sec)
    }

    /// 逐字段更新，返回是否有变化。已知的名字不会被占位名覆盖
    pub fn merge_from(&mut self, fresh: &Task) -> bool {
        let mut changed = false;

        changed |= sync(&mut self.status, &fresh.status);
        changed |= sync(&mut self.progress, &fresh.progress);
        changed |= sync(&mut self.downloaded_bytes, &fresh.downloaded_bytes);
        changed |= sync(&mut self.total_bytes, &fresh.total_bytes);
        changed |= sync(&mut self.speed_bytes_per_sec, &fresh.speed_bytes_per_sec);
        changed |= sync(&mut self.time_left, &fresh.time_left);
        changed |= sync(&mut self.connections, &fresh.connections);
        changed |= sync(&mut self.split, &fresh.split);
        changed |= sync(&mut self.file_path, &fresh.file_path);
        changed |= sync(&mut self.source_url, &fresh.source_url);
        changed |= sync(&mut self.error_message, &fresh.error_message);

        if self.name != fresh.name && fresh.name != UNKNOWN_NAME {
            self.name = fresh.name.clone();
            changed = true;
        }

        changed
    }
}

fn sync<T: PartialEq + Clone>(slot: &mut T, value: &T) -> bool {
    if slot == value {
        return false;
    }
    *slot = value.clone();
    true
}

pub fn format_speed(bytes_per_sec: u64) -> String {
    if bytes_per_sec < 1024 {
        format!("{} B/s", bytes_per_sec)
    } else if bytes_per_sec < 1024 * 1024 {
        format!("{:.1} KB/s", bytes_per_sec as f64 / 1024.0)
    } else {
        format!("{:.1} MB/s", bytes_per_sec as f64 / 1024.0 / 1024.0)
    }
}

// --------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Downloading,
    Waiting,
    Paused,
    Completed,
    Error,
    Stopped,
}

impl TaskStatus {
    /// aria2 的状态文本，无法识别的一律视为已停止
    pub fn from_engine(text: &str) -> Self {
        match text {
            "active" => TaskStatus::Downloading,
            "waiting" => TaskStatus::Waiting,
            "paused" => TaskStatus::Paused,
            "complete" => TaskStatus::Completed,
            "error" => TaskStatus::Error,
            "removed" => TaskStatus::Stopped,
            _ => TaskStatus::Stopped,
        }
    }

    /// 进入这些状态时需要通知
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TaskStatus::Downloading => "下载中",
            TaskStatus::Waiting => "等待中",
            TaskStatus::Paused => "已暂停",
            TaskStatus::Completed => "已完成",
            TaskStatus::Error => "出错",
            TaskStatus::Stopped => "已停止",
        };
        f.write_str(text)
    }
}

// --------------------------------------------------------------------
// 每轮对账产生的变更

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotificationKind {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNotification {
    pub id: String,
    pub name: String,
    pub kind: NotificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskDiff {
    pub added: Vec<Task>,
    pub updated: Vec<Task>,
    pub removed: Vec<String>,
    pub notifications: Vec<TaskNotification>,
}

impl TaskDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && self.notifications.is_empty()
    }
}

// --------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProxyKind {
    #[default]
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "SOCKS5")]
    Socks5,
}

impl ProxyKind {
    pub fn scheme(self) -> &'static str {
        match self {
            ProxyKind::Http => "http",
            ProxyKind::Socks5 => "socks5",
        }
    }
}

impl FromStr for ProxyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HTTP" => Ok(ProxyKind::Http),
            "SOCKS5" => Ok(ProxyKind::Socks5),
            other => Err(format!("不支持的代理类型: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxySettings {
    #[serde(rename = "type")]
    pub kind: ProxyKind,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}
