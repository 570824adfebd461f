use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::config::EngineConfig;
use super::error::StartError;
use crate::rpc::{Aria2Client, RpcInvoke};

// 优雅关闭后等待进程自行退出的时间
const EXIT_GRACE: Duration = Duration::from_secs(1);
// 强制结束后等待回收的时间
const KILL_WAIT: Duration = Duration::from_secs(2);

/// aria2 子进程的生命周期管理
pub struct EngineProcess {
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
    client: Arc<Aria2Client>,
    shutdown_timeout: Duration,
    shut_down: AtomicBool,
}

impl EngineProcess {
    /// 启动引擎并等待 RPC 可用
    pub async fn start(config: &EngineConfig) -> Result<Self, StartError> {
        let process = Self::launch(config).await?;

        if let Err(e) = process
            .wait_ready(config.ready_timeout, config.probe_interval)
            .await
        {
            error!("aria2 启动后未能就绪: {}", e);
            process.shutdown().await;
            return Err(e);
        }

        Ok(process)
    }

    /// 只负责拉起进程，不等待就绪
    pub async fn launch(config: &EngineConfig) -> Result<Self, StartError> {
        prepare_work_dir(config).await?;

        let binary = config.resolve_binary()?;
        ensure_executable(&binary);

        let mut command = Command::new(&binary);
        command
            .args(config.engine_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // 独立进程组，便于整棵进程树一起结束
        #[cfg(unix)]
        command.process_group(0);

        #[cfg(windows)]
        command.creation_flags(0x0800_0000); // CREATE_NO_WINDOW

        let mut child = command.spawn().map_err(|source| StartError::Spawn {
            path: binary.clone(),
            source,
        })?;

        let pid = child.id();
        info!("aria2 已启动: {} (PID: {:?})", binary.display(), pid);

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, |line| warn!(target: "aria2", "{}", line)));
        }

        let client = Aria2Client::local(
            config.rpc_port,
            Some(config.rpc_secret.clone()),
            config.rpc_timeout,
        )?;

        Ok(Self {
            child: Mutex::new(Some(child)),
            pid,
            client: Arc::new(client),
            shutdown_timeout: config.shutdown_timeout,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn client(&self) -> Arc<Aria2Client> {
        Arc::clone(&self.client)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// 反复探测一个廉价的 RPC 方法，收到任何响应即视为就绪
    pub async fn wait_ready(&self, timeout: Duration, interval: Duration) -> Result<(), StartError> {
        let started = Instant::now();
        let probe_timeout = interval.max(Duration::from_millis(500));

        loop {
            match self
                .client
                .invoke_with_timeout::<HashMap<String, String>>("getGlobalStat", vec![], probe_timeout)
                .await
            {
                Ok(_) => {
                    info!("aria2 已就绪，用时 {:?}", started.elapsed());
                    return Ok(());
                }
                Err(e) if e.is_engine() => {
                    // 引擎已经在应答，只是拒绝了这次调用
                    warn!("aria2 已应答但拒绝了探测请求: {}", e);
                    return Ok(());
                }
                Err(e) => debug!("aria2 尚未就绪: {}", e),
            }

            if self.has_exited().await {
                return Err(StartError::NotReady {
                    waited: started.elapsed(),
                });
            }
            if started.elapsed() >= timeout {
                return Err(StartError::NotReady {
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(interval).await;
        }
    }

    pub async fn has_exited(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => !matches!(child.try_wait(), Ok(None)),
            None => true,
        }
    }

    /// 尽力关闭引擎，可重复调用，只有第一次生效，从不返回错误
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("aria2 关闭流程已执行过，忽略");
            return;
        }

        // 优雅关闭放在独立任务中，超时后不再等待，结果有意忽略
        let client = Arc::clone(&self.client);
        let timeout = self.shutdown_timeout;
        let graceful = tokio::spawn(async move {
            match client
                .invoke_with_timeout::<String>("shutdown", vec![], timeout)
                .await
            {
                Ok(_) => debug!("已通过 RPC 请求 aria2 退出"),
                Err(e) => warn!("通过 RPC 关闭 aria2 失败: {}", e),
            }
        });
        let _ = tokio::time::timeout(timeout, graceful).await;

        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return;
        };

        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                info!("aria2 已退出: {}", status);
                guard.take();
                return;
            }
            Ok(Err(e)) => warn!("等待 aria2 退出失败: {}", e),
            Err(_) => debug!("aria2 未在 {:?} 内退出，强制结束", EXIT_GRACE),
        }

        terminate(child).await;
        guard.take();
    }
}

/// 创建工作目录和会话文件，已有的会话文件保持原样
pub async fn prepare_work_dir(config: &EngineConfig) -> Result<(), StartError> {
    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .map_err(|source| StartError::Prepare {
            path: config.work_dir.clone(),
            source,
        })?;

    let session = config.session_file();
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&session)
        .await
        .map_err(|source| StartError::Prepare {
            path: session.clone(),
            source,
        })?;

    Ok(())
}

/// 逐行转发子进程输出，直到 EOF 或读取出错。文件名可能不是 UTF-8，按有损方式解码
async fn forward_lines<R>(reader: R, mut sink: impl FnMut(&str))
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if !line.is_empty() {
                    sink(line);
                }
            }
            Err(e) => {
                debug!("读取 aria2 输出失败: {}", e);
                break;
            }
        }
    }
}

#[cfg(unix)]
fn ensure_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let result = std::fs::metadata(path).and_then(|meta| {
        let mut perms = meta.permissions();
        if perms.mode() & 0o111 == 0o111 {
            return Ok(());
        }
        perms.set_mode(perms.mode() | 0o755);
        std::fs::set_permissions(path, perms)
    });

    if let Err(e) = result {
        warn!("设置 aria2 可执行权限失败 {}: {}", path.display(), e);
    }
}

#[cfg(not(unix))]
fn ensure_executable(_path: &Path) {}

async fn terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };

    match kill_tree(pid).await {
        Ok(()) => {
            if let Ok(Ok(status)) = tokio::time::timeout(KILL_WAIT, child.wait()).await {
                info!("aria2 进程树已结束: {}", status);
                return;
            }
            warn!("结束进程树后 aria2 仍未退出，改为结束主进程");
        }
        Err(e) => warn!("结束 aria2 进程树失败，改为结束主进程: {}", e),
    }

    if let Err(e) = child.start_kill() {
        warn!("结束 aria2 进程失败: {}", e);
        return;
    }
    match tokio::time::timeout(KILL_WAIT, child.wait()).await {
        Ok(Ok(status)) => info!("aria2 进程已结束: {}", status),
        Ok(Err(e)) => warn!("回收 aria2 进程失败: {}", e),
        Err(_) => warn!("aria2 进程在 {:?} 内未被回收", KILL_WAIT),
    }
}

#[cfg(unix)]
async fn kill_tree(pid: u32) -> std::io::Result<()> {
    // 进程以自身 PID 作为进程组号启动
    let status = Command::new("kill")
        .arg("-KILL")
        .arg(format!("-{}", pid))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("kill 退出码: {}", status)))
    }
}

#[cfg(windows)]
async fn kill_tree(pid: u32) -> std::io::Result<()> {
    let status = Command::new("taskkill")
        .arg("/F")
        .arg("/T")
        .arg("/PID")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("taskkill 退出码: {}", status)))
    }
}

#[cfg(not(any(unix, windows)))]
async fn kill_tree(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "当前平台不支持结束进程树",
    ))
}
