// 测试用的假 aria2：在内存里维护任务，按 JSON-RPC 协议应答
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use aria_downloader::downloader::{DownloadService, PollConfig};
use aria_downloader::rpc::Aria2Client;

#[derive(Debug, Default)]
pub struct EngineState {
    pub tasks: Vec<Value>,
    /// 去掉 token 后的调用记录
    pub calls: Vec<(String, Vec<Value>)>,
    pub secret: Option<String>,
    pub global_options: HashMap<String, String>,
    pub splits: HashMap<String, String>,
    /// 设置后所有请求都返回这个 HTTP 状态码
    pub fail_with: Option<u16>,
    next_gid: u64,
}

impl EngineState {
    fn new_gid(&mut self) -> String {
        self.next_gid += 1;
        format!("{:016x}", 0x2089_b05e_cca3_d800u64 + self.next_gid)
    }

    fn find(&mut self, gid: &str) -> Option<&mut Value> {
        self.tasks.iter_mut().find(|t| t["gid"] == gid)
    }

    fn bucket(&self, statuses: &[&str]) -> Value {
        Value::Array(
            self.tasks
                .iter()
                .filter(|t| statuses.contains(&t["status"].as_str().unwrap_or_default()))
                .cloned()
                .collect(),
        )
    }
}

pub fn task_json(gid: &str, status: &str, path: &str, uri: &str) -> Value {
    json!({
        "gid": gid,
        "status": status,
        "totalLength": "1000",
        "completedLength": "250",
        "downloadSpeed": if status == "active" { "50" } else { "0" },
        "connections": if status == "active" { "2" } else { "0" },
        "files": [{
            "path": path,
            "uris": [{"uri": uri, "status": "used"}],
        }],
    })
}

type Shared = Arc<Mutex<EngineState>>;

pub struct FakeEngine {
    pub addr: SocketAddr,
    pub state: Shared,
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeEngine {
    pub async fn start() -> Self {
        Self::start_with_secret(None).await
    }

    pub async fn start_with_secret(secret: Option<&str>) -> Self {
        let state: Shared = Arc::new(Mutex::new(EngineState {
            secret: secret.map(str::to_string),
            ..Default::default()
        }));

        let app = Router::new()
            .route("/jsonrpc", post(handle_rpc))
            .with_state(Arc::clone(&state));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            _handle: handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/jsonrpc", self.addr)
    }

    pub fn client(&self, secret: Option<&str>) -> Aria2Client {
        Aria2Client::new(self.url(), secret.map(str::to_string), Duration::from_secs(5)).unwrap()
    }

    pub fn service(&self) -> DownloadService {
        let secret = self.state.lock().unwrap().secret.clone();
        DownloadService::attach(Arc::new(self.client(secret.as_deref())), fast_poll())
    }

    pub fn push_task(&self, task: Value) {
        self.state.lock().unwrap().tasks.push(task);
    }

    pub fn set_status(&self, gid: &str, status: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(task) = state.find(gid) {
            task["status"] = json!(status);
        }
    }

    pub fn drop_task(&self, gid: &str) {
        self.state.lock().unwrap().tasks.retain(|t| t["gid"] != gid);
    }

    pub fn calls(&self, method: &str) -> Vec<Vec<Value>> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls(method).len()
    }

    pub fn fail_with(&self, status: Option<u16>) {
        self.state.lock().unwrap().fail_with = status;
    }
}

pub fn fast_poll() -> PollConfig {
    PollConfig {
        interval: Duration::from_millis(50),
        settle_delay: Duration::from_millis(10),
        add_settle_delay: Duration::from_millis(10),
        stop_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

// 与 aria2 一致：错误信封配 500 状态码
fn engine_error(id: &Value, code: i64, message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message},
        })),
    )
        .into_response()
}

async fn handle_rpc(State(state): State<Shared>, Json(request): Json<Value>) -> Response {
    let id = request["id"].clone();
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let mut params: Vec<Value> = request["params"].as_array().cloned().unwrap_or_default();

    let mut state = state.lock().unwrap();
    if let Some(status) = state.fail_with {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, "engine unavailable").into_response();
    }

    if let Some(secret) = state.secret.clone() {
        let expected = format!("token:{}", secret);
        if params.first().and_then(Value::as_str) != Some(expected.as_str()) {
            return engine_error(&id, 1, "Unauthorized");
        }
        params.remove(0);
    }
    state.calls.push((method.clone(), params.clone()));

    let text = |i: usize| params.get(i).and_then(Value::as_str).unwrap_or_default().to_string();

    let result = match method.as_str() {
        "aria2.tellActive" => state.bucket(&["active"]),
        "aria2.tellWaiting" => state.bucket(&["waiting", "paused"]),
        "aria2.tellStopped" => state.bucket(&["complete", "error", "removed"]),
        "aria2.getGlobalStat" => json!({
            "downloadSpeed": "0",
            "numActive": state.bucket(&["active"]).as_array().map_or(0, Vec::len).to_string(),
        }),
        "aria2.addUri" => {
            let uri = params[0][0].as_str().unwrap_or_default().to_string();
            let options = params[1].clone();
            let dir = options["dir"].as_str().unwrap_or_default();
            let out = options["out"].as_str().unwrap_or("download.bin");
            let path = format!("{}/{}", dir, out);
            let gid = state.new_gid();
            if let Some(split) = options["split"].as_str() {
                state.splits.insert(gid.clone(), split.to_string());
            }
            state.tasks.push(task_json(&gid, "waiting", &path, &uri));
            json!(gid)
        }
        "aria2.addTorrent" => {
            let gid = state.new_gid();
            state.tasks.push(task_json(&gid, "waiting", "", ""));
            json!(gid)
        }
        "aria2.pause" => {
            let gid = text(0);
            match state.find(&gid) {
                Some(task) => {
                    task["status"] = json!("paused");
                    json!(gid)
                }
                None => return engine_error(&id, 1, "GID not found"),
            }
        }
        "aria2.pauseAll" => {
            for task in state.tasks.iter_mut() {
                if task["status"] == "active" || task["status"] == "waiting" {
                    task["status"] = json!("paused");
                }
            }
            json!("OK")
        }
        "aria2.unpause" => {
            let gid = text(0);
            match state.find(&gid) {
                Some(task) if task["status"] == "paused" => {
                    task["status"] = json!("active");
                    json!(gid)
                }
                _ => return engine_error(&id, 1, "GID is not in paused state"),
            }
        }
        "aria2.unpauseAll" => {
            for task in state.tasks.iter_mut() {
                if task["status"] == "paused" {
                    task["status"] = json!("active");
                }
            }
            json!("OK")
        }
        "aria2.remove" => {
            let gid = text(0);
            match state.find(&gid) {
                Some(task) if ["active", "waiting", "paused"].contains(&task["status"].as_str().unwrap_or_default()) => {
                    task["status"] = json!("removed");
                    json!(gid)
                }
                _ => return engine_error(&id, 1, &format!("Active Download not found for GID#{}", gid)),
            }
        }
        "aria2.removeDownloadResult" => {
            let gid = text(0);
            let before = state.tasks.len();
            state.tasks.retain(|t| t["gid"] != gid.as_str());
            if state.tasks.len() == before {
                return engine_error(&id, 1, "Could not remove download result");
            }
            json!("OK")
        }
        "aria2.getOption" => {
            let gid = text(0);
            match state.splits.get(&gid) {
                Some(split) => json!({"split": split, "dir": "/tmp"}),
                None => json!({"split": "5"}),
            }
        }
        "aria2.changeGlobalOption" => {
            if let Some(options) = params[0].as_object() {
                for (key, value) in options {
                    let value = value.as_str().unwrap_or_default().to_string();
                    state.global_options.insert(key.clone(), value);
                }
            }
            json!("OK")
        }
        "aria2.shutdown" => json!("OK"),
        "system.listMethods" => json!(["aria2.addUri", "aria2.remove"]),
        _ => return engine_error(&id, 1, &format!("No such method: {}", method)),
    };

    Json(json!({"jsonrpc": "2.0", "id": id, "result": result})).into_response()
}
