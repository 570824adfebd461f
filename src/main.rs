use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::Colorize;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info};

use aria_downloader::common::logger::PrettyLogger;
use aria_downloader::common::progress::DownloadProgress;
use aria_downloader::downloader::{DownloadService, PollConfig, Task, TaskStatus};
use aria_downloader::rpc::{RpcArg, RpcInvoke};
use aria_downloader::{log_error, log_info, log_step, log_success, log_warning};

mod cli;

use cli::{Command, RemoteArgs, TaskArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = cli::Cli::parse();

    // 初始化日志
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match args.command {
        Command::Run(run) => run_engine(run).await,
        Command::Add(add) => {
            if add.task.is_empty() {
                bail!("没有需要添加的链接或种子");
            }
            let service = attach(&add.remote)?;
            let ids = add_tasks(&service, &add.task).await;
            if ids.is_empty() {
                bail!("没有添加成功的任务");
            }
            Ok(())
        }
        Command::List { remote, json } => {
            let service = attach(&remote)?;
            service.refresh().await.context("获取任务列表失败")?;
            let tasks = service.get_tasks().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                print_tasks(&tasks);
            }
            Ok(())
        }
        Command::Pause(target) => {
            let service = attach(&target.remote)?;
            match &target.id {
                Some(id) => service.pause(id).await?,
                None => service.pause_all().await?,
            }
            log_success!("已暂停");
            Ok(())
        }
        Command::Resume(target) => {
            let service = attach(&target.remote)?;
            match &target.id {
                Some(id) => service.resume(id).await?,
                None => service.resume_all().await?,
            }
            log_success!("已继续");
            Ok(())
        }
        Command::Remove {
            remote,
            id,
            delete_files,
        } => {
            let service = attach(&remote)?;
            if delete_files {
                // 需要先拿到任务的文件路径
                service.refresh().await.context("获取任务列表失败")?;
                service.remove_and_delete_files(&id).await?;
            } else {
                service.remove(&id).await?;
            }
            log_success!("已删除任务 {}", id);
            Ok(())
        }
        Command::Proxy(proxy) => {
            let service = attach(&proxy.remote)?;
            let settings = proxy.settings();
            service.apply_proxy(&settings).await?;
            if settings.address.trim().is_empty() {
                log_success!("已清除代理");
            } else {
                log_success!("已设置代理 {}:{}", settings.address, settings.port);
            }
            Ok(())
        }
        Command::Call {
            remote,
            method,
            params,
            expect,
        } => {
            let client = remote.client()?;
            let args = parse_params(params.as_deref())?;
            let reply = client.invoke_shape(&method, args, expect).await?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
            Ok(())
        }
    }
}

fn attach(remote: &RemoteArgs) -> Result<DownloadService> {
    let client = remote
        .client()
        .with_context(|| format!("无法连接 {}", remote.rpc_url))?;
    debug!("连接到 {}", client.endpoint());
    Ok(DownloadService::attach(Arc::new(client), PollConfig::default()))
}

/// 参数是 JSON 数组，单个值视为只有一个参数
fn parse_params(raw: Option<&str>) -> Result<Vec<RpcArg>> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Ok(Vec::new());
    };
    let value: Value = serde_json::from_str(raw).context("参数不是合法的 JSON")?;
    let values = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    let args = values
        .into_iter()
        .map(RpcArg::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(args)
}

async fn add_tasks(service: &DownloadService, task: &TaskArgs) -> Vec<String> {
    let save_path = task.save_path();
    let extra = task.extra_options();
    let mut ids = Vec::new();

    for url in &task.urls {
        let name = task.name_for(url);
        match service
            .add_uri(url, &name, &save_path, task.split, &extra)
            .await
        {
            Ok(id) => {
                log_success!("已添加 {} ({})", url, id);
                ids.push(id);
            }
            Err(e) => log_error!("添加 {} 失败: {}", url, e),
        }
    }

    for torrent in &task.torrent {
        match service.add_torrent(torrent, &save_path, &extra).await {
            Ok(id) => {
                log_success!("已添加种子 {} ({})", torrent.display(), id);
                ids.push(id);
            }
            Err(e) => log_error!("添加种子 {} 失败: {}", torrent.display(), e),
        }
    }

    ids
}

fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        log_info!("没有任务");
        return;
    }
    PrettyLogger::separator();
    for task in tasks {
        PrettyLogger::task_line(task);
    }
    PrettyLogger::separator();
}

fn all_finished(tasks: &[Task]) -> bool {
    !tasks.is_empty()
        && tasks.iter().all(|t| {
            matches!(
                t.status,
                TaskStatus::Completed | TaskStatus::Error | TaskStatus::Stopped
            )
        })
}

async fn run_engine(run: cli::RunArgs) -> Result<()> {
    let config = run.engine_config();

    log_step!("启动 aria2 引擎");
    let service = DownloadService::start(&config, PollConfig::default())
        .await
        .context("启动下载引擎失败")?;
    log_success!("aria2 已就绪: {}", config.rpc_endpoint());
    info!("工作目录: {}", config.work_dir.display());

    let mut events = service.subscribe();
    if !run.task.is_empty() {
        log_step!("添加下载");
        add_tasks(&service, &run.task).await;
    }

    let mut progress = DownloadProgress::new();
    for task in service.get_tasks().await {
        progress.update(&task);
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                progress.println("收到中断信号，正在退出...".yellow().to_string());
                break;
            }
            event = events.recv() => match event {
                Ok(diff) => {
                    progress.apply(&diff);
                    for notification in &diff.notifications {
                        progress.println(PrettyLogger::format_notification(notification));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("进度事件积压，跳过 {} 条", skipped);
                    for task in service.get_tasks().await {
                        progress.update(&task);
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }

        if run.exit_when_done && all_finished(&service.get_tasks().await) {
            break;
        }
    }

    progress.clear();
    let tasks = service.get_tasks().await;
    service.shutdown().await;

    let failed: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Error)
        .collect();
    if failed.is_empty() {
        log_success!("已退出");
    } else {
        for task in &failed {
            error!("任务失败: {} ({})", task.name, task.id);
        }
        log_warning!("{} 个任务失败", failed.len());
    }
    Ok(())
}
