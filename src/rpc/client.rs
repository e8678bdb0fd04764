//! Client used by the CLI to talk to a running daemon.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::protocol::{Request, Response, RpcError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to daemon: {0}")]
    Connect(#[source] std::io::Error),

    #[error("communication error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode request: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to parse response: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("daemon closed the connection without answering")]
    NoResponse,

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

pub struct RpcClient {
    addr: SocketAddr,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            next_id: AtomicU64::new(1),
        }
    }

    /// Call `method` on a fresh connection and decode its result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, ClientError> {
        let mut stream = TcpStream::connect(self.addr)
            .await
            .map_err(ClientError::Connect)?;

        let request = Request::new(method, params, self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut line = serde_json::to_string(&request).map_err(ClientError::Serialize)?;
        line.push('\n');
        stream.write_all(line.as_bytes()).await?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        if reader.read_line(&mut response_line).await? == 0 {
            return Err(ClientError::NoResponse);
        }

        let response: Response = serde_json::from_str(&response_line).map_err(ClientError::Parse)?;
        if let Some(error) = response.error {
            return Err(error.into());
        }

        serde_json::from_value(response.result.unwrap_or(Value::Null)).map_err(ClientError::Parse)
    }
}
