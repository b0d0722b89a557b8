use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use zof_proto::{Event, EventType};

use crate::config::Config;
use crate::datapath::Datapath;
use crate::error::HandlerError;
use crate::handlers::{HandlerResult, Handlers, LocalBoxFuture};
use crate::registry::Registry;
use crate::statemachine;
use crate::taskgroup::TaskGroup;
use crate::transport::RpcTransport;

/// Resolves each decoded event to a target, selects a handler, and invokes
/// it inline or as a new task.
///
/// Does not itself decide sync-vs-async: every registered handler closure
/// returns a future, so the uniform strategy is "spawn the handler as a
/// task, then yield once before the next event" — a handler that never
/// actually suspends completes on that first poll, which is
/// observationally identical to running it inline, while a handler that
/// does suspend gets exactly the "first step synchronous, remainder
/// concurrent" treatment async handlers require. The controller's
/// dispatch loop performs the single `yield_now` per event; see
/// `Controller::run`.
pub struct Dispatcher {
    registry: Rc<Registry>,
    handlers: Rc<Handlers>,
    transport: Rc<RpcTransport>,
    controller_tasks: Rc<RefCell<TaskGroup>>,
    config: Config,
}

impl Dispatcher {
    pub fn new(
        registry: Rc<Registry>,
        handlers: Rc<Handlers>,
        transport: Rc<RpcTransport>,
        controller_tasks: Rc<RefCell<TaskGroup>>,
        config: Config,
    ) -> Self {
        Self {
            registry,
            handlers,
            transport,
            controller_tasks,
            config,
        }
    }

    pub async fn dispatch(&self, event: Event) {
        match &event.event_type {
            EventType::ChannelUp => self.handle_channel_up(event).await,
            EventType::ChannelDown => self.handle_channel_down(event).await,
            EventType::ChannelAlert => self.handle_channel_alert(event).await,
            EventType::Message(name) => {
                let name = name.clone();
                self.handle_message(name, event).await;
            }
            EventType::Signal => {
                debug!("signal events are routed directly by the controller, not the dispatcher");
            }
        }
    }

    /// `[negotiating] -> [ready]`: runs negotiation, registers the new
    /// datapath on success, and dispatches the synthesized CHANNEL_UP as a
    /// controller-scoped task, since it is a lifecycle event rather than a
    /// per-connection message.
    async fn handle_channel_up(&self, event: Event) {
        let Some(conn_id) = event.conn_id else {
            warn!("CHANNEL_UP notification carried no conn_id; dropping");
            return;
        };

        let Some((dp, synthesized)) =
            statemachine::negotiate(conn_id, event.body, self.transport.clone(), &self.config).await
        else {
            return;
        };

        if !self.registry.insert(conn_id, dp.clone()) {
            warn!("conn_id {conn_id} already registered; dropping duplicate CHANNEL_UP");
            dp.cancel_tasks().await;
            return;
        }

        if let Some(handler) = self.handlers.on_channel_up() {
            self.spawn_in_controller_scope("channel_up", Some(conn_id), handler(dp, synthesized));
        }
    }

    /// `[ready] -> [closing] -> [absent]`: cancels and joins every task in
    /// the datapath's group *before* invoking `on_channel_down`, then
    /// removes it from the registry.
    async fn handle_channel_down(&self, event: Event) {
        let Some(conn_id) = event.conn_id else {
            warn!("CHANNEL_DOWN notification carried no conn_id; dropping");
            return;
        };

        let Some(dp) = self.registry.remove(conn_id) else {
            debug!("CHANNEL_DOWN for unknown or already-removed conn_id {conn_id}; ignoring");
            return;
        };

        dp.cancel_tasks().await;

        if let Some(handler) = self.handlers.on_channel_down() {
            self.spawn_in_controller_scope("channel_down", Some(conn_id), handler(dp, event));
        }
    }

    async fn handle_channel_alert(&self, event: Event) {
        let Some(dp) = self.resolve_ready(&event) else {
            return;
        };

        if let Some(handler) = self.handlers.on_channel_alert() {
            self.spawn_in_datapath_scope(&dp, "channel_alert", handler(dp.clone(), event));
        }
    }

    async fn handle_message(&self, message_type: String, event: Event) {
        let Some(dp) = self.resolve_ready(&event) else {
            return;
        };

        let Some(handler) = self.handlers.resolve_message(&message_type) else {
            return;
        };

        self.spawn_in_datapath_scope(&dp, &message_type, handler(dp.clone(), event));
    }

    /// An event carrying no conn_id, or one whose conn_id does not resolve
    /// to a registered (i.e. ready) datapath, is dropped and logged.
    fn resolve_ready(&self, event: &Event) -> Option<Rc<Datapath>> {
        let conn_id = event.conn_id?;
        match self.registry.get(conn_id) {
            Some(dp) => Some(dp),
            None => {
                debug!("dropping event for unready or unknown conn_id {conn_id}");
                None
            }
        }
    }

    fn spawn_in_controller_scope(
        &self,
        event_type: &str,
        conn_id: Option<u64>,
        fut: LocalBoxFuture<'static, HandlerResult>,
    ) {
        let handlers = self.handlers.clone();
        let event_type = event_type.to_string();
        self.controller_tasks.borrow_mut().spawn(async move {
            if let Err(message) = fut.await {
                handlers.on_exception(&HandlerError {
                    event_type,
                    conn_id,
                    message,
                });
            }
        });
    }

    fn spawn_in_datapath_scope(
        &self,
        dp: &Rc<Datapath>,
        event_type: &str,
        fut: LocalBoxFuture<'static, HandlerResult>,
    ) {
        let handlers = self.handlers.clone();
        let event_type = event_type.to_string();
        let conn_id = Some(dp.conn_id());
        dp.create_task(async move {
            if let Err(message) = fut.await {
                handlers.on_exception(&HandlerError {
                    event_type,
                    conn_id,
                    message,
                });
            }
        });
    }
}
