use std::time::Duration;

use thiserror::Error;
use zof_proto::ProtocolError;

/// Errors surfaced while starting the helper subprocess or opening listen
/// endpoints.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("helper binary `{binary}` could not be spawned: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("helper exited before signaling readiness (status: {status:?})")]
    ExitedBeforeReady { status: Option<std::process::ExitStatus> },
    #[error("helper reported a protocol error during startup: {0}")]
    ProtocolError(String),
    #[error("failed to open listen endpoint `{endpoint}`: {source}")]
    ListenEndpoint {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors surfaced by a single `call`/`call_stream`/`send` against the RPC
/// transport or a `Datapath`.
#[derive(Debug, Error, Clone)]
pub enum RpcCallError {
    #[error("the helper channel is closed")]
    Closed,
    #[error("the helper reported error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("call exceeded its {0:?} deadline")]
    Timeout(Duration),
}

/// The crate-wide error type returned by fatal/boundary-crossing failures:
/// [`crate::Controller::run`], and anything that propagates all the way out
/// of the dispatch loop.
#[derive(Debug, Error)]
pub enum ZofError {
    #[error("startup failed: {0}")]
    Startup(#[from] StartupError),
    #[error(transparent)]
    Rpc(#[from] RpcCallError),
    #[error("malformed data from the helper: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("a handler for {event_type} (conn_id={conn_id:?}) panicked or returned an error: {message}")]
    Handler {
        event_type: String,
        conn_id: Option<u64>,
        message: String,
    },
}

impl ZofError {
    pub fn handler(event_type: impl Into<String>, conn_id: Option<u64>, message: impl Into<String>) -> Self {
        ZofError::Handler {
            event_type: event_type.into(),
            conn_id,
            message: message.into(),
        }
    }
}

/// A single handler failure, delivered to `on_exception`. Distinct from
/// [`ZofError`] because it never aborts `run()` — it is swallowed at the
/// dispatch boundary.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub event_type: String,
    pub conn_id: Option<u64>,
    pub message: String,
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "handler for {} (conn_id={:?}) failed: {}",
            self.event_type, self.conn_id, self.message
        )
    }
}

impl std::error::Error for HandlerError {}
