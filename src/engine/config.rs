use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::StartError;

pub const DEFAULT_RPC_PORT: u16 = 16800;
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36";

const SESSION_FILE: &str = "aria2.session";
const LOG_FILE: &str = "aria2.log";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 私有工作目录，存放会话文件与引擎日志
    pub work_dir: PathBuf,
    /// 手动指定的 aria2c 路径，未指定时按平台查找
    pub binary: Option<PathBuf>,
    pub rpc_port: u16,
    pub rpc_secret: String,
    pub max_concurrent_downloads: u32,
    pub max_connection_per_server: u32,
    pub split: u32,
    pub min_split_size: String,
    pub user_agent: String,
    pub bt_trackers: Vec<String>,
    pub bt_listen_port: Option<u16>,
    pub dht_listen_port: Option<u16>,
    pub rpc_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub ready_timeout: Duration,
    pub probe_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            binary: None,
            rpc_port: DEFAULT_RPC_PORT,
            rpc_secret: uuid::Uuid::new_v4().simple().to_string(),
            max_concurrent_downloads: 5,
            max_connection_per_server: 16,
            split: 16,
            min_split_size: "1M".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            bt_trackers: Vec::new(),
            bt_listen_port: None,
            dht_listen_port: None,
            rpc_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(2),
            ready_timeout: Duration::from_secs(10),
            probe_interval: Duration::from_millis(200),
        }
    }
}

pub fn default_work_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("aria-downloader")
}

impl EngineConfig {
    pub fn session_file(&self) -> PathBuf {
        self.work_dir.join(SESSION_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.work_dir.join(LOG_FILE)
    }

    pub fn rpc_endpoint(&self) -> String {
        format!("http://127.0.0.1:{}/jsonrpc", self.rpc_port)
    }

    /// 引擎启动参数，会话文件同时用于保存和恢复
    pub fn engine_args(&self) -> Vec<String> {
        let session = self.session_file();
        let mut args = vec![
            "--enable-rpc=true".to_string(),
            format!("--rpc-listen-port={}", self.rpc_port),
            "--rpc-allow-origin-all=true".to_string(),
            format!("--save-session={}", session.display()),
            format!("--input-file={}", session.display()),
            format!("--log={}", self.log_file().display()),
            "--log-level=warn".to_string(),
            format!("--max-concurrent-downloads={}", self.max_concurrent_downloads),
            format!("--max-connection-per-server={}", self.max_connection_per_server),
            format!("--split={}", self.split),
            format!("--min-split-size={}", self.min_split_size),
            "--continue=true".to_string(),
            format!("--user-agent={}", self.user_agent),
        ];

        if !self.rpc_secret.is_empty() {
            args.insert(2, format!("--rpc-secret={}", self.rpc_secret));
        }

        let trackers: Vec<&str> = self
            .bt_trackers
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if !trackers.is_empty() {
            args.push(format!("--bt-tracker={}", trackers.join(",")));
        }
        if let Some(port) = self.bt_listen_port {
            args.push(format!("--listen-port={}", port));
        }
        if let Some(port) = self.dht_listen_port {
            args.push(format!("--dht-listen-port={}", port));
        }

        args
    }

    /// 定位 aria2c：手动指定 > 随程序打包 > PATH
    pub fn resolve_binary(&self) -> Result<PathBuf, StartError> {
        if let Some(binary) = &self.binary {
            if binary.is_file() {
                return Ok(binary.clone());
            }
            return Err(StartError::BinaryNotFound(binary.clone()));
        }

        let base_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        let bundled = base_dir.join(bundled_binary_path(std::env::consts::OS, std::env::consts::ARCH));
        if bundled.is_file() {
            return Ok(bundled);
        }

        find_in_path(binary_name(std::env::consts::OS)).ok_or(StartError::BinaryNotFound(bundled))
    }
}

fn binary_name(os: &str) -> &'static str {
    if os == "windows" { "aria2c.exe" } else { "aria2c" }
}

/// 打包目录结构: assets/binaries/<平台>/<架构>/aria2c
pub fn bundled_binary_path(os: &str, arch: &str) -> PathBuf {
    let platform = match os {
        "macos" => "darwin",
        "windows" => "win32",
        _ => "linux",
    };
    let arch = match (os, arch) {
        ("windows", "x86_64") => "x64",
        ("windows", _) => "ia32",
        (_, "aarch64") => "arm64",
        _ => "x64",
    };

    PathBuf::from("assets")
        .join("binaries")
        .join(platform)
        .join(arch)
        .join(binary_name(os))
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_path_per_platform() {
        assert_eq!(
            bundled_binary_path("macos", "aarch64"),
            PathBuf::from("assets/binaries/darwin/arm64/aria2c")
        );
        assert_eq!(
            bundled_binary_path("linux", "x86_64"),
            PathBuf::from("assets/binaries/linux/x64/aria2c")
        );
        assert_eq!(
            bundled_binary_path("windows", "x86"),
            PathBuf::from("assets/binaries/win32/ia32/aria2c.exe")
        );
    }

    #[test]
    fn test_engine_args_include_rpc_and_session() {
        let config = EngineConfig {
            work_dir: PathBuf::from("/tmp/ad"),
            rpc_port: 6800,
            rpc_secret: "abc".into(),
            bt_trackers: vec!["udp://t1:80".into(), " ".into(), "udp://t2:80".into()],
            ..Default::default()
        };
        let args = config.engine_args();

        assert!(args.contains(&"--enable-rpc=true".to_string()));
        assert!(args.contains(&"--rpc-listen-port=6800".to_string()));
        assert!(args.contains(&"--rpc-secret=abc".to_string()));
        assert!(args.contains(&"--save-session=/tmp/ad/aria2.session".to_string()));
        assert!(args.contains(&"--input-file=/tmp/ad/aria2.session".to_string()));
        assert!(args.contains(&"--log-level=warn".to_string()));
        assert!(args.contains(&"--bt-tracker=udp://t1:80,udp://t2:80".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--listen-port")));
    }

    #[test]
    fn test_missing_override_binary() {
        let config = EngineConfig {
            binary: Some(PathBuf::from("/definitely/not/here/aria2c")),
            ..Default::default()
        };
        assert!(matches!(config.resolve_binary(), Err(StartError::BinaryNotFound(_))));
    }
}
