// aria2 JSON-RPC 传输层

pub mod client;
pub mod error;
pub mod models;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{Aria2Client, RpcInvoke, RpcTransport};
pub use error::RpcError;
pub use models::{RawTaskStatus, ResultShape, RpcArg, RpcReply, RpcResult};
