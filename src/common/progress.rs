use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::downloader::models::{Task, TaskDiff, TaskStatus};

const BAR_TEMPLATE: &str = "{msg:30!} [{elapsed_precise}] {wide_bar} {bytes}/{total_bytes} {prefix}";

/// 每个任务一条进度条，随任务列表的变更更新
pub struct DownloadProgress {
    multi_pb: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    style: ProgressStyle,
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadProgress {
    pub fn new() -> Self {
        let style = ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar());

        Self {
            multi_pb: MultiProgress::new(),
            bars: HashMap::new(),
            style,
        }
    }

    pub fn apply(&mut self, diff: &TaskDiff) {
        for task in diff.added.iter().chain(diff.updated.iter()) {
            self.update(task);
        }
        for id in &diff.removed {
            if let Some(pb) = self.bars.remove(id) {
                pb.finish_and_clear();
                self.multi_pb.remove(&pb);
            }
        }
    }

    pub fn update(&mut self, task: &Task) {
        let pb = self.bars.entry(task.id.clone()).or_insert_with(|| {
            let pb = self.multi_pb.add(ProgressBar::new(task.total_bytes));
            pb.set_style(self.style.clone());
            pb
        });

        pb.set_length(task.total_bytes);
        pb.set_position(task.downloaded_bytes);
        pb.set_message(task.name.clone());
        pb.set_prefix(format!("{} {} {}", task.status, task.speed_text(), task.time_left));

        if task.status == TaskStatus::Completed {
            pb.finish();
        }
    }

    /// 在进度条上方输出一行文字，不打乱进度条
    pub fn println(&self, line: impl AsRef<str>) {
        if self.multi_pb.println(line.as_ref()).is_err() {
            println!("{}", line.as_ref());
        }
    }

    pub fn clear(&mut self) {
        for (_, pb) in self.bars.drain() {
            pb.finish_and_clear();
        }
        let _ = self.multi_pb.clear();
    }
}
