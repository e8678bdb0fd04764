//! Local control channel for the CLI.
//!
//! JSON-RPC 2.0 over TCP, one JSON document per line.
//!
//! - `protocol`: request/response types and error codes
//! - `transport`: TCP listener and framing
//! - `methods`: method dispatch onto the engine
//! - `client`: client used by the CLI subcommands

pub mod client;
pub mod methods;
mod protocol;
mod transport;

use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
use transport::Transport;

pub use client::{ClientError, RpcClient};
pub use methods::MethodHandler;
pub use protocol::{
    JOB_ALREADY_RUNNING, JOB_NOT_FOUND, REMOTE_NOT_FOUND, Request, Response, RpcError,
};

pub struct RpcServer {
    transport: Transport,
    shutdown: CancellationToken,
}

impl RpcServer {
    pub fn new(ctx: AppContext, bind_addr: SocketAddr) -> Self {
        let shutdown = ctx.cancel.child_token();
        let transport = Transport::new(bind_addr, MethodHandler::new(ctx));

        Self {
            transport,
            shutdown,
        }
    }

    /// Serve until [`shutdown`](Self::shutdown) is called or the daemon's
    /// token is cancelled.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.transport.listen(self.shutdown.clone()).await
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
