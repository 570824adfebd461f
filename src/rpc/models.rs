use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RpcError;

// --------------------------------------------------------------------
// JSON-RPC 2.0 报文

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: String,
    pub method: String,
    pub params: Vec<RpcArg>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcErrorBody {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

// --------------------------------------------------------------------
// 参数：封闭的四种类型，由调用方显式构造

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RpcArg {
    Text(String),
    Int(i64),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl From<&str> for RpcArg {
    fn from(s: &str) -> Self {
        RpcArg::Text(s.to_string())
    }
}

impl From<String> for RpcArg {
    fn from(s: String) -> Self {
        RpcArg::Text(s)
    }
}

impl From<i64> for RpcArg {
    fn from(n: i64) -> Self {
        RpcArg::Int(n)
    }
}

impl From<u32> for RpcArg {
    fn from(n: u32) -> Self {
        RpcArg::Int(n as i64)
    }
}

impl From<Vec<String>> for RpcArg {
    fn from(list: Vec<String>) -> Self {
        RpcArg::List(list)
    }
}

impl From<BTreeMap<String, String>> for RpcArg {
    fn from(map: BTreeMap<String, String>) -> Self {
        RpcArg::Map(map)
    }
}

impl From<HashMap<String, String>> for RpcArg {
    fn from(map: HashMap<String, String>) -> Self {
        RpcArg::Map(map.into_iter().collect())
    }
}

/// 动态参数（例如命令行传入的 JSON）只接受四种类型，其余直接报错
impl TryFrom<Value> for RpcArg {
    type Error = RpcError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(RpcArg::Text(s)),
            Value::Number(n) => n
                .as_i64()
                .map(RpcArg::Int)
                .ok_or_else(|| RpcError::UnsupportedArgument(format!("非整数数字 {}", n))),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    other => Err(RpcError::UnsupportedArgument(format!(
                        "数组元素必须是字符串: {}",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(RpcArg::List),
            Value::Object(entries) => entries
                .into_iter()
                .map(|(key, item)| match item {
                    Value::String(s) => Ok((key, s)),
                    other => Err(RpcError::UnsupportedArgument(format!(
                        "对象 {} 的值必须是字符串: {}",
                        key, other
                    ))),
                })
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(RpcArg::Map),
            other => Err(RpcError::UnsupportedArgument(other.to_string())),
        }
    }
}

// --------------------------------------------------------------------
// aria2 返回的任务快照，数值字段全部是字符串

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTaskStatus {
    pub gid: String,
    pub status: String,
    pub total_length: String,
    pub completed_length: String,
    pub download_speed: String,
    pub connections: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub files: Vec<RawFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawFile {
    pub path: String,
    pub uris: Vec<RawUri>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawUri {
    pub uri: String,
    pub status: String,
}

// --------------------------------------------------------------------
// 结果：只允许解码成固定的几种形状，新增调用点必须在这里显式扩展

mod sealed {
    pub trait Sealed {}

    impl Sealed for String {}
    impl Sealed for Vec<super::RawTaskStatus> {}
    impl Sealed for std::collections::HashMap<String, String> {}
}

pub trait RpcResult: sealed::Sealed + Sized + Send + 'static {
    const SHAPE: ResultShape;

    fn decode(value: Value) -> Result<Self, RpcError>;
}

fn decode_as<T: serde::de::DeserializeOwned>(shape: ResultShape, value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value)
        .map_err(|e| RpcError::InvalidResponse(format!("期望 {} 结果: {}", shape, e)))
}

impl RpcResult for String {
    const SHAPE: ResultShape = ResultShape::Text;

    fn decode(value: Value) -> Result<Self, RpcError> {
        decode_as(Self::SHAPE, value)
    }
}

impl RpcResult for Vec<RawTaskStatus> {
    const SHAPE: ResultShape = ResultShape::Tasks;

    fn decode(value: Value) -> Result<Self, RpcError> {
        decode_as(Self::SHAPE, value)
    }
}

impl RpcResult for HashMap<String, String> {
    const SHAPE: ResultShape = ResultShape::Options;

    fn decode(value: Value) -> Result<Self, RpcError> {
        decode_as(Self::SHAPE, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Text,
    Tasks,
    Options,
}

impl std::fmt::Display for ResultShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResultShape::Text => "text",
            ResultShape::Tasks => "tasks",
            ResultShape::Options => "options",
        };
        f.write_str(name)
    }
}

impl FromStr for ResultShape {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "string" => Ok(ResultShape::Text),
            "tasks" => Ok(ResultShape::Tasks),
            "options" | "map" => Ok(ResultShape::Options),
            other => Err(RpcError::UnsupportedResultType(other.to_string())),
        }
    }
}

impl ResultShape {
    pub fn decode(self, value: Value) -> Result<RpcReply, RpcError> {
        Ok(match self {
            ResultShape::Text => RpcReply::Text(String::decode(value)?),
            ResultShape::Tasks => RpcReply::Tasks(Vec::<RawTaskStatus>::decode(value)?),
            ResultShape::Options => RpcReply::Options(HashMap::<String, String>::decode(value)?),
        })
    }
}

/// 动态调用的解码结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RpcReply {
    Text(String),
    Tasks(Vec<RawTaskStatus>),
    Options(HashMap<String, String>),
}
