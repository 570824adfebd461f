use colored::*;

use crate::downloader::models::{NotificationKind, Task, TaskNotification, TaskStatus};

/// 漂亮的终端输出工具
pub struct PrettyLogger;

impl PrettyLogger {
    /// 显示成功消息
    pub fn success(message: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), message.as_ref());
    }

    /// 显示信息消息
    pub fn info(message: impl AsRef<str>) {
        println!("{} {}", "ℹ".blue().bold(), message.as_ref());
    }

    /// 显示警告消息
    pub fn warning(message: impl AsRef<str>) {
        println!("{} {}", "⚠".yellow().bold(), message.as_ref());
    }

    /// 显示错误消息
    pub fn error(message: impl AsRef<str>) {
        println!("{} {}", "✗".red().bold(), message.as_ref());
    }

    /// 显示步骤开始
    pub fn step_start(step: impl AsRef<str>) {
        println!("\n{} {}", "▶".cyan().bold(), step.as_ref().bold());
    }

    /// 显示分割线
    pub fn separator() {
        println!("{}", "─".repeat(50).bright_black());
    }

    /// 任务列表中的一行
    pub fn task_line(task: &Task) {
        println!("{}", Self::format_task(task));
    }

    pub fn format_task(task: &Task) -> String {
        let status = match task.status {
            TaskStatus::Downloading => task.status.to_string().blue(),
            TaskStatus::Waiting => task.status.to_string().cyan(),
            TaskStatus::Paused => task.status.to_string().yellow(),
            TaskStatus::Completed => task.status.to_string().green(),
            TaskStatus::Error => task.status.to_string().red(),
            TaskStatus::Stopped => task.status.to_string().bright_black(),
        };

        let mut line = format!(
            "{} {} [{}] {:>5.1}% {} {}",
            task.id.bright_black(),
            task.name.bold(),
            status,
            task.progress * 100.0,
            task.speed_text(),
            task.time_left,
        );
        if let Some(message) = &task.error_message {
            line.push_str(&format!(" ({})", message.red()));
        }
        line
    }

    /// 任务完成或失败的通知
    pub fn notification(notification: &TaskNotification) {
        println!("{}", Self::format_notification(notification));
    }

    pub fn format_notification(notification: &TaskNotification) -> String {
        match notification.kind {
            NotificationKind::Completed => format!(
                "{} {} {}",
                "🎉".green().bold(),
                "下载完成:".green().bold(),
                notification.name
            ),
            NotificationKind::Failed => format!(
                "{} {} {} ({})",
                "✗".red().bold(),
                "下载失败:".red().bold(),
                notification.name,
                notification.message.as_deref().unwrap_or("未知错误")
            ),
        }
    }
}

/// 便捷宏用于漂亮的日志输出
#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::success(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::info(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::warning(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::error(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_step {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::step_start(format!($($arg)*))
    };
}
