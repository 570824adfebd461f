// 用 shell 脚本冒充 aria2c，RPC 由假引擎应答
#![cfg(unix)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use aria_downloader::engine::{EngineConfig, EngineProcess, StartError};
use common::FakeEngine;

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("aria2c");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn config(dir: &Path, binary: PathBuf, port: u16) -> EngineConfig {
    EngineConfig {
        work_dir: dir.join("work"),
        binary: Some(binary),
        rpc_port: port,
        rpc_secret: "test".into(),
        ready_timeout: Duration::from_secs(3),
        probe_interval: Duration::from_millis(50),
        shutdown_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

async fn unused_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_missing_binary_keeps_existing_session() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), dir.path().join("no-such-aria2c"), 16899);
    std::fs::create_dir_all(&config.work_dir).unwrap();
    std::fs::write(config.session_file(), "http://a/a.iso\n gid=abc\n").unwrap();

    let err = EngineProcess::start(&config).await.err().unwrap();

    assert!(matches!(err, StartError::BinaryNotFound(_)));
    assert_eq!(
        std::fs::read_to_string(config.session_file()).unwrap(),
        "http://a/a.iso\n gid=abc\n"
    );
}

#[tokio::test]
async fn test_session_file_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), dir.path().join("no-such-aria2c"), 16899);

    let _ = EngineProcess::start(&config).await;

    assert!(config.session_file().is_file());
    assert_eq!(std::fs::metadata(config.session_file()).unwrap().len(), 0);
}

#[tokio::test]
async fn test_engine_that_exits_is_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "exit 3");
    let config = config(dir.path(), script, unused_port().await);

    let started = Instant::now();
    let err = EngineProcess::start(&config).await.err().unwrap();

    assert!(matches!(err, StartError::NotReady { .. }));
    // 进程已经退出，不必等满超时
    assert!(started.elapsed() < config.ready_timeout);
}

#[tokio::test]
async fn test_silent_engine_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "exec sleep 30");
    let mut config = config(dir.path(), script, unused_port().await);
    config.ready_timeout = Duration::from_millis(400);

    let err = EngineProcess::start(&config).await.err().unwrap();
    assert!(matches!(err, StartError::NotReady { .. }));
}

#[tokio::test]
async fn test_start_then_shutdown_twice() {
    let fake = FakeEngine::start().await;
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "exec sleep 30");
    let config = config(dir.path(), script, fake.addr.port());

    let engine = EngineProcess::start(&config).await.unwrap();
    assert!(engine.pid().is_some());
    assert!(fake.count("aria2.getGlobalStat") >= 1);

    engine.shutdown().await;
    assert!(engine.has_exited().await);
    assert_eq!(fake.count("aria2.shutdown"), 1);

    engine.shutdown().await;
    assert_eq!(fake.count("aria2.shutdown"), 1);
}

#[tokio::test]
async fn test_engine_refusing_readiness_call_is_ready() {
    // 密钥不一致，引擎以错误信封应答
    let fake = FakeEngine::start_with_secret(Some("other")).await;
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "exec sleep 30");
    let config = config(dir.path(), script, fake.addr.port());

    let started = Instant::now();
    let engine = EngineProcess::start(&config).await.unwrap();

    assert!(started.elapsed() < config.ready_timeout);
    engine.shutdown().await;
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[tokio::test]
async fn test_stderr_after_invalid_utf8_is_still_logged() {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        r"printf 'first line\n\377bad-bytes\nafter bad bytes\n' >&2
exec sleep 30",
    );
    let config = config(dir.path(), script, unused_port().await);

    let engine = EngineProcess::launch(&config).await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(3);
    while !captured.text().contains("after bad bytes") && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    engine.shutdown().await;

    let text = captured.text();
    assert!(text.contains("first line"));
    assert!(text.contains("bad-bytes"));
    assert!(text.contains("after bad bytes"), "日志输出: {}", text);
}

// 僵尸进程也算已结束
#[cfg(target_os = "linux")]
fn is_running(pid: &str) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => !stat.contains(") Z "),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_shutdown_kills_child_processes() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("child.pid");
    // 脚本自身再拉起一个子进程，关闭时两者都应结束
    let script = write_script(
        dir.path(),
        &format!("sleep 30 &\necho $! > {}\nwait", pid_file.display()),
    );
    let config = config(dir.path(), script, unused_port().await);

    let engine = EngineProcess::launch(&config).await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(3);
    let mut child_pid = String::new();
    while child_pid.is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
        child_pid = std::fs::read_to_string(&pid_file)
            .unwrap_or_default()
            .trim()
            .to_string();
    }
    assert!(!child_pid.is_empty());
    assert!(is_running(&child_pid));

    engine.shutdown().await;

    let deadline = Instant::now() + Duration::from_secs(2);
    while is_running(&child_pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!is_running(&child_pid), "子进程 {} 仍在运行", child_pid);
}
