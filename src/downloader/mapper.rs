use std::path::Path;

use super::models::{Task, TaskStatus, UNKNOWN_NAME};
use super::split_cache::{DEFAULT_SPLIT, SplitCache};
use crate::rpc::RawTaskStatus;

pub const TIME_MORE_THAN_DAY: &str = "> 1 Day";
pub const TIME_DONE: &str = "Done";
pub const TIME_UNKNOWN: &str = "--";

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

// 引擎返回的数字都是字符串，解析不了就当 0
pub fn parse_lenient(text: &str) -> u64 {
    text.trim().parse::<u64>().unwrap_or(0)
}

/// 把一条原始快照转换成任务记录
pub fn map_task(raw: &RawTaskStatus, splits: &SplitCache) -> Task {
    let total = parse_lenient(&raw.total_length);
    let completed = parse_lenient(&raw.completed_length);
    let speed = parse_lenient(&raw.download_speed);

    let progress = if total > 0 {
        (completed as f64 / total as f64).min(1.0)
    } else {
        0.0
    };

    let status = TaskStatus::from_engine(&raw.status);

    // 名称、路径、来源取第一个文件
    let (name, file_path, source_url) = match raw.files.first() {
        Some(file) => {
            let name = Path::new(&file.path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| UNKNOWN_NAME.to_string());
            let url = file.uris.first().map(|u| u.uri.clone()).unwrap_or_default();
            (name, file.path.clone(), url)
        }
        None => (UNKNOWN_NAME.to_string(), String::new(), String::new()),
    };

    let mut connections = u32::try_from(parse_lenient(&raw.connections)).unwrap_or(u32::MAX);
    // 正在传输却报告 0 个连接时按 1 显示
    if status == TaskStatus::Downloading && connections == 0 && speed > 0 {
        connections = 1;
    }

    let split = splits
        .get(&raw.gid)
        .or((connections > 0).then_some(connections))
        .unwrap_or(DEFAULT_SPLIT);

    let error_message = match status {
        TaskStatus::Error => raw.error_message.clone().filter(|m| !m.is_empty()),
        _ => None,
    };

    Task {
        id: raw.gid.clone(),
        name,
        total_bytes: total,
        downloaded_bytes: completed,
        progress,
        speed_bytes_per_sec: speed,
        status,
        time_left: format_time_left(status, total, completed, speed),
        connections,
        split,
        file_path,
        source_url,
        error_message,
    }
}

pub fn format_time_left(status: TaskStatus, total: u64, completed: u64, speed: u64) -> String {
    if matches!(
        status,
        TaskStatus::Paused | TaskStatus::Waiting | TaskStatus::Stopped | TaskStatus::Error
    ) {
        return String::new();
    }

    if speed > 0 {
        let seconds = total.saturating_sub(completed) / speed;
        if seconds >= SECONDS_PER_DAY {
            return TIME_MORE_THAN_DAY.to_string();
        }
        let (hours, minutes, seconds) = (seconds / 3600, seconds % 3600 / 60, seconds % 60);
        if hours > 0 {
            format!("{}:{:02}:{:02}", hours, minutes, seconds)
        } else {
            format!("{:02}:{:02}", minutes, seconds)
        }
    } else if completed == total && total > 0 {
        TIME_DONE.to_string()
    } else {
        TIME_UNKNOWN.to_string()
    }
}
