use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use zof_proto::{allocate_xid, decode_message, Event, EventType, IncomingMessage, RpcError, Xid};

use crate::driver::{Driver, DriverWriter};
use crate::error::RpcCallError;

use std::cell::RefCell;

enum PendingSlot {
    Single(oneshot::Sender<Result<Value, RpcCallError>>),
    Multipart(mpsc::UnboundedSender<Result<Value, RpcCallError>>),
}

#[derive(Default)]
struct TransportState {
    next_xid: Xid,
    pending: HashMap<Xid, PendingSlot>,
}

/// Request/reply and notification layer on top of the [`Driver`]. Assigns
/// xids, routes replies back to the caller that sent them,
/// streams multipart replies, and surfaces notifications as an ordered
/// [`Event`] stream for the dispatcher.
pub struct RpcTransport {
    writer: DriverWriter,
    state: Rc<Mutex<TransportState>>,
    events_rx: Option<mpsc::UnboundedReceiver<Event>>,
    pump: Option<JoinHandle<Driver>>,
    rpc_timeout: Duration,
    fatal: Rc<RefCell<Option<zof_proto::ProtocolError>>>,
}

impl RpcTransport {
    /// Takes ownership of `driver` and spawns the single reader task that
    /// demultiplexes its incoming stream into reply routing and the event
    /// stream, preserving the helper's own emission order: the single
    /// reader delivers replies and notifications in the order the helper
    /// emits them.
    pub fn new(driver: Driver, rpc_timeout: Duration) -> Self {
        let writer = driver.writer();
        let state = Rc::new(Mutex::new(TransportState::default()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let fatal = Rc::new(RefCell::new(None));

        let pump_state = state.clone();
        let pump_fatal = fatal.clone();
        let pump = tokio::task::spawn_local(pump_task(driver, pump_state, events_tx, pump_fatal));

        Self {
            writer,
            state,
            events_rx: Some(events_rx),
            pump: Some(pump),
            rpc_timeout,
            fatal,
        }
    }

    /// Takes the notification event stream. May only be called once; later
    /// calls return `None`.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<Event>> {
        self.events_rx.take()
    }

    /// Returns the malformed-message error that ended the reader task, if
    /// the event stream closed because of one — a malformed message is
    /// fatal and terminates the run — rather than a clean helper exit.
    pub fn take_fatal(&self) -> Option<zof_proto::ProtocolError> {
        self.fatal.borrow_mut().take()
    }

    /// Sends `params` as `method` and awaits exactly one reply.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcCallError> {
        let (tx, rx) = oneshot::channel();
        let xid = self.register(PendingSlot::Single(tx)).await;
        self.dispatch_request(xid, method, params).await?;

        match time::timeout(self.rpc_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcCallError::Closed),
            Err(_) => {
                self.state.lock().await.pending.remove(&xid);
                Err(RpcCallError::Timeout(self.rpc_timeout))
            }
        }
    }

    /// Sends `params` as `method` and returns a channel yielding every
    /// fragment of a multipart reply in order, completing after the
    /// fragment whose "more" flag is absent.
    pub async fn call_stream(
        &self,
        method: &str,
        params: Value,
    ) -> Result<mpsc::UnboundedReceiver<Result<Value, RpcCallError>>, RpcCallError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let xid = self.register(PendingSlot::Multipart(tx)).await;
        self.dispatch_request(xid, method, params).await?;
        Ok(rx)
    }

    /// Fire-and-forget send: assigns an xid for helper-side correlation but
    /// registers no pending slot, so any reply is discarded at debug level.
    pub async fn send(&self, method: &str, params: Value) -> Result<(), RpcCallError> {
        let xid = {
            let mut state = self.state.lock().await;
            allocate_xid(&mut state.next_xid, &keys(&state.pending))
        };
        self.dispatch_request(xid, method, params).await
    }

    async fn register(&self, slot: PendingSlot) -> Xid {
        let mut state = self.state.lock().await;
        let xid = allocate_xid(&mut state.next_xid, &keys(&state.pending));
        state.pending.insert(xid, slot);
        xid
    }

    async fn dispatch_request(&self, xid: Xid, method: &str, params: Value) -> Result<(), RpcCallError> {
        let request = zof_proto::RpcRequest {
            id: xid,
            method: method.to_string(),
            params,
        };
        let value = serde_json::to_value(&request).expect("request always serializes");
        self.writer.send(&value).map_err(|_| RpcCallError::Closed)
    }

    /// A transport with a detached writer and no pump task, for tests that
    /// only need something to hand a `Datapath` and never exchange real
    /// helper traffic.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            writer: DriverWriter::detached(),
            state: Rc::new(Mutex::new(TransportState::default())),
            events_rx: None,
            pump: None,
            rpc_timeout: Duration::from_secs(5),
            fatal: Rc::new(RefCell::new(None)),
        }
    }

    /// Closes the transport: stops the pump task and hands back the
    /// underlying [`Driver`] so the controller can run its own `stop()`
    /// sequence, since stopping the Driver is the controller's last
    /// shutdown step.
    pub async fn close(&mut self) -> Option<Driver> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            match pump.await {
                Ok(driver) => Some(driver),
                Err(_) => None,
            }
        } else {
            None
        }
    }
}

fn keys(pending: &HashMap<Xid, PendingSlot>) -> std::collections::HashSet<Xid> {
    pending.keys().copied().collect()
}

async fn pump_task(
    mut driver: Driver,
    state: Rc<Mutex<TransportState>>,
    events_tx: mpsc::UnboundedSender<Event>,
    fatal: Rc<RefCell<Option<zof_proto::ProtocolError>>>,
) -> Driver {
    while let Some(value) = driver.recv().await {
        match decode_message(value) {
            Ok(IncomingMessage::Reply(reply)) => handle_reply(reply, &state).await,
            Ok(IncomingMessage::Notification(notification)) => {
                if notification.method != "OFP.MESSAGE" {
                    debug!("ignoring unrecognized notification method: {}", notification.method);
                    continue;
                }
                if let Some(event) = notification_to_event(notification.params) {
                    if events_tx.send(event).is_err() {
                        break;
                    }
                }
            }
            Err(err) => {
                // Malformed JSON or an unrecognized envelope shape is fatal:
                // stop reading so the controller's dispatch loop sees the
                // event stream close and can surface this via `take_fatal`
                // instead of treating it as a clean shutdown.
                warn!("malformed helper message, terminating: {err}");
                *fatal.borrow_mut() = Some(err);
                break;
            }
        }
    }

    let mut state = state.lock().await;
    for (_, slot) in state.pending.drain() {
        match slot {
            PendingSlot::Single(tx) => {
                let _ = tx.send(Err(RpcCallError::Closed));
            }
            PendingSlot::Multipart(tx) => {
                let _ = tx.send(Err(RpcCallError::Closed));
            }
        }
    }
    drop(state);
    driver
}

async fn handle_reply(reply: zof_proto::RpcReply, state: &Rc<Mutex<TransportState>>) {
    let outcome = reply
        .outcome
        .map_err(|RpcError { code, message }| RpcCallError::Rpc { code, message });

    let mut guard = state.lock().await;
    if reply.more {
        // multipart fragments keep their slot until the final one arrives.
        match guard.pending.get(&reply.id) {
            Some(PendingSlot::Multipart(tx)) => {
                let _ = tx.send(outcome);
            }
            _ => debug!("dropping unexpected multipart fragment for xid {}", reply.id),
        }
        return;
    }

    match guard.pending.remove(&reply.id) {
        Some(PendingSlot::Single(tx)) => {
            let _ = tx.send(outcome);
        }
        Some(PendingSlot::Multipart(tx)) => {
            // dropping `tx` after this send ends the multipart stream.
            let _ = tx.send(outcome);
        }
        None => debug!("discarding reply for unknown or already-resolved xid {}", reply.id),
    }
}

fn notification_to_event(params: Value) -> Option<Event> {
    let event_type_raw = params.get("type")?.as_str()?.to_string();
    let conn_id = params.get("conn_id").and_then(Value::as_u64);
    let event_type = EventType::from_raw(&event_type_raw);
    Some(Event::new(event_type, conn_id, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use zof_proto::RpcReply;

    #[tokio::test]
    async fn single_reply_resolves_pending_slot_and_clears_it() {
        let state = Rc::new(Mutex::new(TransportState::default()));
        let (tx, rx) = oneshot::channel();
        state.lock().await.pending.insert(1, PendingSlot::Single(tx));

        handle_reply(
            RpcReply {
                id: 1,
                outcome: Ok(serde_json::json!({"ok": true})),
                more: false,
            },
            &state,
        )
        .await;

        assert_eq!(rx.await.unwrap().unwrap(), serde_json::json!({"ok": true}));
        assert!(state.lock().await.pending.is_empty());
    }

    /// Replies must be delivered to the originating caller with no
    /// cross-talk — two distinct pending callers, replies arriving in the
    /// opposite order from registration.
    #[tokio::test]
    async fn replies_for_distinct_xids_never_cross_talk() {
        let state = Rc::new(Mutex::new(TransportState::default()));
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        state.lock().await.pending.insert(1, PendingSlot::Single(tx_a));
        state.lock().await.pending.insert(2, PendingSlot::Single(tx_b));

        handle_reply(
            RpcReply {
                id: 2,
                outcome: Ok(serde_json::json!("for-b")),
                more: false,
            },
            &state,
        )
        .await;
        handle_reply(
            RpcReply {
                id: 1,
                outcome: Ok(serde_json::json!("for-a")),
                more: false,
            },
            &state,
        )
        .await;

        assert_eq!(rx_a.await.unwrap().unwrap(), serde_json::json!("for-a"));
        assert_eq!(rx_b.await.unwrap().unwrap(), serde_json::json!("for-b"));
        assert!(state.lock().await.pending.is_empty());
    }

    #[tokio::test]
    async fn multipart_fragments_stream_in_order_then_end() {
        let state = Rc::new(Mutex::new(TransportState::default()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.lock().await.pending.insert(9, PendingSlot::Multipart(tx));

        for (n, more) in [(1, true), (2, true), (3, false)] {
            handle_reply(
                RpcReply {
                    id: 9,
                    outcome: Ok(serde_json::json!(n)),
                    more,
                },
                &state,
            )
            .await;
        }

        assert_eq!(rx.recv().await.unwrap().unwrap(), serde_json::json!(1));
        assert_eq!(rx.recv().await.unwrap().unwrap(), serde_json::json!(2));
        assert_eq!(rx.recv().await.unwrap().unwrap(), serde_json::json!(3));
        assert!(rx.recv().await.is_none(), "stream must end after the final fragment");
        assert!(state.lock().await.pending.is_empty());
    }

    #[tokio::test]
    async fn error_reply_ends_a_multipart_stream() {
        let state = Rc::new(Mutex::new(TransportState::default()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.lock().await.pending.insert(2, PendingSlot::Multipart(tx));

        handle_reply(
            RpcReply {
                id: 2,
                outcome: Err(RpcError {
                    code: -1,
                    message: "boom".to_string(),
                }),
                more: false,
            },
            &state,
        )
        .await;

        let err = rx.recv().await.unwrap().unwrap_err();
        assert!(matches!(err, RpcCallError::Rpc { code: -1, .. }));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn reply_for_unknown_xid_is_discarded_without_panicking() {
        let state = Rc::new(Mutex::new(TransportState::default()));
        handle_reply(
            RpcReply {
                id: 42,
                outcome: Ok(Value::Null),
                more: false,
            },
            &state,
        )
        .await;
        assert!(state.lock().await.pending.is_empty());
    }

    #[test]
    fn notification_to_event_extracts_type_and_conn_id() {
        let params = serde_json::json!({"type": "CHANNEL_UP", "conn_id": 7, "version": 4});
        let event = notification_to_event(params).unwrap();
        assert_eq!(event.conn_id, Some(7));
        assert_eq!(event.event_type, EventType::ChannelUp);
    }

    #[test]
    fn notification_without_type_is_ignored() {
        let params = serde_json::json!({"conn_id": 7});
        assert!(notification_to_event(params).is_none());
    }
}
