use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;

use crate::config::Config;
use crate::error::RpcCallError;
use crate::taskgroup::TaskGroup;
use crate::transport::RpcTransport;

/// A live OpenFlow switch connection: connection-id, negotiated identity,
/// and the task group whose lifetime equals the connection.
///
/// Shared via `Rc` between the [`crate::registry::Registry`] and whichever
/// handlers it is passed to; the registry's reference is what defines
/// liveness.
pub struct Datapath {
    conn_id: u64,
    dpid: String,
    version: u8,
    features: Value,
    ports: Value,
    transport: Rc<RpcTransport>,
    tasks: RefCell<TaskGroup>,
    closed: Cell<bool>,
    shutdown_grace: Duration,
}

impl Datapath {
    pub(crate) fn new(
        conn_id: u64,
        dpid: String,
        version: u8,
        features: Value,
        ports: Value,
        transport: Rc<RpcTransport>,
        config: &Config,
    ) -> Self {
        Self {
            conn_id,
            dpid,
            version,
            features,
            ports,
            transport,
            tasks: RefCell::new(TaskGroup::new()),
            closed: Cell::new(false),
            shutdown_grace: config.shutdown_grace,
        }
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    pub fn dpid(&self) -> &str {
        &self.dpid
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn features(&self) -> &Value {
        &self.features
    }

    pub fn ports(&self) -> &Value {
        &self.ports
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Fire-and-forget send. Fails immediately with
    /// [`RpcCallError::Closed`] without reaching the helper once the
    /// datapath has been closed.
    pub async fn send(&self, msg: Value) -> Result<(), RpcCallError> {
        if self.closed.get() {
            return Err(RpcCallError::Closed);
        }
        self.transport.send("OFP.SEND", self.scoped(msg)).await
    }

    /// A single request/reply round trip.
    pub async fn request(&self, msg: Value) -> Result<Value, RpcCallError> {
        if self.closed.get() {
            return Err(RpcCallError::Closed);
        }
        self.transport.call("OFP.REQUEST", self.scoped(msg)).await
    }

    /// A multipart request/reply sequence.
    pub async fn request_all(
        &self,
        msg: Value,
    ) -> Result<tokio::sync::mpsc::UnboundedReceiver<Result<Value, RpcCallError>>, RpcCallError> {
        if self.closed.get() {
            return Err(RpcCallError::Closed);
        }
        self.transport
            .call_stream("OFP.REQUEST", self.scoped(msg))
            .await
    }

    /// Adds a task to this datapath's task group; cancelled on CHANNEL_DOWN.
    pub fn create_task<F>(&self, fut: F)
    where
        F: Future<Output = ()> + 'static,
    {
        self.tasks.borrow_mut().spawn(fut);
    }

    /// Requests the helper drop the underlying connection. Marks the
    /// datapath closed immediately so further
    /// `send`/`request` calls fail fast; the actual CHANNEL_DOWN transition
    /// still comes from the helper's notification.
    pub async fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        let _ = self
            .transport
            .send("OFP.CLOSE", self.scoped(Value::Null))
            .await;
    }

    /// Cancels every task in this datapath's group and waits for them to
    /// finish, up to the configured shutdown grace window, so every
    /// datapath-scoped task is cancelled before the CHANNEL_DOWN handler
    /// returns.
    ///
    /// Swaps the group out for a fresh, empty one first rather than holding
    /// the `RefCell` borrow across the join: a task observing cancellation
    /// (or a handler still holding this `Rc<Datapath>`) may call
    /// `create_task` while this is awaiting, and that must not panic with a
    /// `BorrowMutError`.
    pub(crate) async fn cancel_tasks(&self) {
        self.closed.set(true);
        let mut group = self.tasks.replace(TaskGroup::new());
        group.cancel_and_join(self.shutdown_grace).await;
    }

    fn scoped(&self, msg: Value) -> Value {
        let mut params = serde_json::json!({ "conn_id": self.conn_id });
        if let Value::Object(extra) = msg {
            if let Value::Object(base) = &mut params {
                base.extend(extra);
            }
        } else if !msg.is_null() {
            params["msg"] = msg;
        }
        params
    }
}
