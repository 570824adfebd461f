use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use aria_downloader::downloader::{ProxyKind, ProxySettings};
use aria_downloader::engine::config::{DEFAULT_RPC_PORT, default_work_dir};
use aria_downloader::rpc::{Aria2Client, ResultShape, RpcError};
use aria_downloader::EngineConfig;

/// 基于 aria2 的下载管理工具
#[derive(Parser, Debug)]
#[command(name = "ariadl")]
#[command(version = "0.1")]
#[command(author = "rpeng252@gmail.com")]
#[command(about = "一个基于 aria2 引擎的下载任务管理工具", long_about = None)]
pub struct Cli {
    /// 输出调试日志
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 启动引擎并下载，直到 Ctrl-C 或全部结束
    Run(RunArgs),
    /// 向运行中的引擎添加下载
    Add(AddArgs),
    /// 列出任务
    List {
        #[command(flatten)]
        remote: RemoteArgs,
        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },
    /// 暂停任务
    Pause(TargetArgs),
    /// 继续任务
    Resume(TargetArgs),
    /// 删除任务
    Remove {
        #[command(flatten)]
        remote: RemoteArgs,
        id: String,
        /// 同时删除已下载的文件
        #[arg(long)]
        delete_files: bool,
    },
    /// 设置或清除全局代理
    Proxy(ProxyArgs),
    /// 直接调用一个 RPC 方法
    Call {
        #[command(flatten)]
        remote: RemoteArgs,
        /// 方法名，如 tellActive 或 system.listMethods
        method: String,
        /// JSON 数组形式的参数
        params: Option<String>,
        #[arg(long, default_value = "text")]
        #[arg(help = "结果类型: text, tasks, options")]
        expect: ResultShape,
    },
}

/// 连接已运行引擎的参数
#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    #[arg(long, value_name = "URL")]
    #[arg(default_value_t = format!("http://127.0.0.1:{}/jsonrpc", DEFAULT_RPC_PORT))]
    #[arg(value_hint = clap::ValueHint::Url)]
    pub rpc_url: String,

    /// RPC 密钥
    #[arg(long, value_name = "SECRET")]
    pub secret: Option<String>,

    /// 单次调用超时（秒）
    #[arg(long, value_name = "SECONDS", default_value_t = 10)]
    pub timeout: u64,
}

impl RemoteArgs {
    pub fn client(&self) -> Result<Aria2Client, RpcError> {
        Aria2Client::new(
            self.rpc_url.clone(),
            self.secret.clone(),
            Duration::from_secs(self.timeout),
        )
    }
}

/// 新任务的下载参数
#[derive(Args, Debug, Clone)]
pub struct TaskArgs {
    /// 下载链接，可以有多个
    #[arg(value_name = "URL")]
    #[arg(value_hint = clap::ValueHint::Url)]
    pub urls: Vec<String>,

    /// 种子文件
    #[arg(long, value_name = "FILE")]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub torrent: Vec<PathBuf>,

    /// 保存目录
    #[arg(long, value_name = "DIR", default_value = ".")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub dir: PathBuf,

    /// 文件名，仅在只有一个链接时生效
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// 分片数
    #[arg(long, value_name = "N", default_value_t = 16)]
    pub split: u32,

    /// 额外的 aria2 选项
    #[arg(long = "option", short = 'o', value_name = "KEY=VALUE")]
    #[arg(value_parser = parse_key_value)]
    pub options: Vec<(String, String)>,
}

impl TaskArgs {
    pub fn extra_options(&self) -> HashMap<String, String> {
        self.options.iter().cloned().collect()
    }

    pub fn save_path(&self) -> String {
        self.dir.to_string_lossy().into_owned()
    }

    /// 多个链接时不指定文件名，交给引擎决定
    pub fn name_for(&self, url: &str) -> String {
        if self.urls.len() != 1 {
            return String::new();
        }
        self.name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| derive_name(url))
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty() && self.torrent.is_empty()
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub task: TaskArgs,

    /// 引擎工作目录（会话文件和日志）
    #[arg(long, value_name = "DIR")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub work_dir: Option<PathBuf>,

    /// aria2c 可执行文件路径
    #[arg(long, value_name = "FILE")]
    #[arg(value_hint = clap::ValueHint::ExecutablePath)]
    pub aria2: Option<PathBuf>,

    #[arg(long, value_name = "PORT", default_value_t = DEFAULT_RPC_PORT)]
    pub port: u16,

    /// RPC 密钥，不指定时随机生成
    #[arg(long, value_name = "SECRET")]
    pub secret: Option<String>,

    /// 最大同时下载数
    #[arg(long, value_name = "N", default_value_t = 5)]
    pub max_concurrent: u32,

    /// BT tracker
    #[arg(long, value_name = "URL")]
    pub tracker: Vec<String>,

    /// 全部任务结束后退出
    #[arg(long)]
    pub exit_when_done: bool,
}

impl RunArgs {
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig {
            work_dir: self.work_dir.clone().unwrap_or_else(default_work_dir),
            binary: self.aria2.clone(),
            rpc_port: self.port,
            max_concurrent_downloads: self.max_concurrent.max(1),
            bt_trackers: self.tracker.clone(),
            ..Default::default()
        };
        if let Some(secret) = &self.secret {
            config.rpc_secret = secret.clone();
        }
        config
    }
}

#[derive(Args, Debug)]
pub struct AddArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,

    #[command(flatten)]
    pub task: TaskArgs,
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,

    /// 任务 ID
    #[arg(required_unless_present = "all")]
    pub id: Option<String>,

    /// 作用于全部任务
    #[arg(long, conflicts_with = "id")]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct ProxyArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,

    #[arg(long = "type", value_name = "TYPE", default_value = "HTTP")]
    #[arg(help = "代理类型: HTTP, SOCKS5")]
    pub kind: ProxyKind,

    /// 代理地址，不指定时清除代理
    #[arg(long, value_name = "HOST")]
    pub address: Option<String>,

    #[arg(long, value_name = "PORT", default_value_t = 0)]
    pub port: u16,

    #[arg(long, value_name = "USER", default_value = "")]
    pub username: String,

    #[arg(long, value_name = "PASSWORD", default_value = "")]
    pub password: String,
}

impl ProxyArgs {
    pub fn settings(&self) -> ProxySettings {
        ProxySettings {
            kind: self.kind,
            address: self.address.clone().unwrap_or_default(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("选项格式应为 KEY=VALUE: {}", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("选项名不能为空: {}", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// 取链接路径的最后一段作为文件名
pub fn derive_name(raw: &str) -> String {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_name() {
        assert_eq!(derive_name("https://example.com/files/ubuntu.iso"), "ubuntu.iso");
        assert_eq!(derive_name("https://example.com/files/"), "");
        assert_eq!(derive_name("https://example.com"), "");
        assert_eq!(derive_name("not a url"), "");
    }

    #[test]
    fn test_name_only_for_single_url() {
        let cli = Cli::parse_from(["ariadl", "add", "--name", "x.bin", "http://a/1.iso", "http://a/2.iso"]);
        let Command::Add(add) = cli.command else {
            panic!("应解析为 add");
        };
        assert_eq!(add.task.name_for("http://a/1.iso"), "");

        let cli = Cli::parse_from(["ariadl", "add", "http://a/1.iso"]);
        let Command::Add(add) = cli.command else {
            panic!("应解析为 add");
        };
        assert_eq!(add.task.name_for("http://a/1.iso"), "1.iso");
    }

    #[test]
    fn test_extra_options() {
        let cli = Cli::parse_from(["ariadl", "add", "-o", "header=Referer: a=b", "--option", "seed-time=0", "http://a/1"]);
        let Command::Add(add) = cli.command else {
            panic!("应解析为 add");
        };
        let options = add.task.extra_options();
        assert_eq!(options["header"], "Referer: a=b");
        assert_eq!(options["seed-time"], "0");

        assert!(Cli::try_parse_from(["ariadl", "add", "-o", "=x", "http://a/1"]).is_err());
    }

    #[test]
    fn test_pause_requires_id_or_all() {
        assert!(Cli::try_parse_from(["ariadl", "pause"]).is_err());
        assert!(Cli::try_parse_from(["ariadl", "pause", "--all", "g1"]).is_err());
        assert!(Cli::try_parse_from(["ariadl", "pause", "--all"]).is_ok());
    }

    #[test]
    fn test_call_expect_shape() {
        let cli = Cli::parse_from(["ariadl", "call", "tellActive", "--expect", "tasks"]);
        let Command::Call { expect, .. } = cli.command else {
            panic!("应解析为 call");
        };
        assert_eq!(expect, ResultShape::Tasks);

        assert!(Cli::try_parse_from(["ariadl", "call", "tellActive", "--expect", "bytes"]).is_err());
    }

    #[test]
    fn test_run_engine_config() {
        let cli = Cli::parse_from(["ariadl", "run", "--port", "6801", "--secret", "s", "--work-dir", "/tmp/w"]);
        let Command::Run(run) = cli.command else {
            panic!("应解析为 run");
        };
        let config = run.engine_config();
        assert_eq!(config.rpc_port, 6801);
        assert_eq!(config.rpc_secret, "s");
        assert_eq!(config.work_dir, PathBuf::from("/tmp/w"));
    }
}
