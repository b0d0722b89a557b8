use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use zof_proto::{Event, EventType};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::driver::Driver;
use crate::error::{HandlerError, ZofError};
use crate::handlers::{Handlers, SignalEvent};
use crate::registry::Registry;
use crate::signal;
use crate::taskgroup::TaskGroup;
use crate::transport::RpcTransport;

/// A lightweight, cloneable reference to the running controller, passed to
/// `on_start`/`on_stop` so they can reach `get_config`/`create_task`
/// without the handler needing to be a method on some shared `Controller`
/// object, since the capability-set handler design has no single
/// receiver to call methods on.
#[derive(Clone)]
pub struct ControllerHandle {
    config: Config,
    tasks: Rc<RefCell<TaskGroup>>,
}

impl ControllerHandle {
    pub fn get_config(&self) -> &Config {
        &self.config
    }

    /// Adds a task to the controller's scope; cancelled and joined on
    /// shutdown.
    pub fn create_task<F>(&self, fut: F)
    where
        F: Future<Output = ()> + 'static,
    {
        self.tasks.borrow_mut().spawn(fut);
    }
}

/// Top-level lifecycle owner. Built once
/// from a [`Config`] and a [`Handlers`] capability set; `run()` drives a
/// single dispatch loop to completion.
pub struct Controller {
    config: Config,
    handlers: Rc<Handlers>,
}

impl Controller {
    pub fn new(config: Config, handlers: Handlers) -> Self {
        Self {
            config,
            handlers: Rc::new(handlers),
        }
    }

    pub fn get_config(&self) -> &Config {
        &self.config
    }

    /// Runs the full lifecycle: build Driver,
    /// build RPC Transport, install signal handlers, `on_start`, dispatch
    /// loop, then on shutdown close every registry entry (emitting
    /// CHANNEL_DOWN), cancel and join the controller task group, `on_stop`,
    /// stop the Driver.
    ///
    /// Single-threaded cooperative scheduling comes from
    /// driving the whole method inside one `tokio::task::LocalSet`, so
    /// every handler task spawned via `TaskGroup::spawn`/`Datapath::
    /// create_task` runs on this same logical thread.
    pub async fn run(self) -> Result<(), ZofError> {
        let local = tokio::task::LocalSet::new();
        local.run_until(self.run_on_local_set()).await
    }

    async fn run_on_local_set(self) -> Result<(), ZofError> {
        let driver = Driver::start(&self.config).await?;
        let mut transport = RpcTransport::new(driver, self.config.rpc_timeout);
        let mut events_rx = transport
            .take_events()
            .expect("take_events only called once, here");
        let transport = Rc::new(transport);

        let registry = Rc::new(Registry::new());
        let controller_tasks = Rc::new(RefCell::new(TaskGroup::new()));
        let dispatcher = Dispatcher::new(
            registry.clone(),
            self.handlers.clone(),
            transport.clone(),
            controller_tasks.clone(),
            self.config.clone(),
        );

        let handle = ControllerHandle {
            config: self.config.clone(),
            tasks: controller_tasks.clone(),
        };

        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<SignalEvent>();
        let signal_tasks = signal::install(&self.config.exit_signals, signal_tx);

        if let Some(on_start) = self.handlers.on_start() {
            if let Err(message) = on_start(handle.clone()).await {
                warn!("on_start failed: {message}");
                self.handlers.on_exception(&HandlerError {
                    event_type: "start".to_string(),
                    conn_id: None,
                    message,
                });
            }
        }

        let mut shutdown_requested = false;
        loop {
            if shutdown_requested {
                break;
            }
            tokio::select! {
                event = events_rx.recv() => {
                    match event {
                        Some(event) => {
                            dispatcher.dispatch(event).await;
                            tokio::task::yield_now().await;
                        }
                        None => {
                            debug!("helper event stream closed; shutting down");
                            break;
                        }
                    }
                }
                signal_event = signal_rx.recv(), if !signal_tasks.is_empty() => {
                    match signal_event {
                        Some(signal_event) => {
                            if self.handle_signal(signal_event).await {
                                shutdown_requested = true;
                            }
                        }
                        None => {}
                    }
                }
            }
        }

        for task in &signal_tasks {
            task.abort();
        }
        let fatal = transport.take_fatal();
        // Drop the dispatcher's `Rc<RpcTransport>` clone so shutdown can
        // reclaim sole ownership of the transport to hand the Driver back.
        drop(dispatcher);

        self.shutdown(registry, controller_tasks, transport, handle).await?;

        match fatal {
            Some(err) => Err(ZofError::from(err)),
            None => Ok(()),
        }
    }

    /// Invokes `on_signal`, honoring a veto (`event.exit = false`); returns
    /// whether the default shutdown should proceed — a handler may clear
    /// `event.exit` to veto default termination.
    async fn handle_signal(&self, event: SignalEvent) -> bool {
        match self.handlers.on_signal() {
            Some(on_signal) => {
                let result = on_signal(event).await;
                result.exit
            }
            None => true,
        }
    }

    /// Closes every registry entry (emitting CHANNEL_DOWN for each),
    /// cancels and joins the controller task group, runs `on_stop`, and
    /// stops the Driver. Runs to completion even if earlier
    /// steps logged failures, so shutdown is idempotent and
    /// `on_stop` always runs, best-effort, before `run()` returns.
    async fn shutdown(
        &self,
        registry: Rc<Registry>,
        controller_tasks: Rc<RefCell<TaskGroup>>,
        transport: Rc<RpcTransport>,
        handle: ControllerHandle,
    ) -> Result<(), ZofError> {
        // Every live datapath's tasks are cancelled and its CHANNEL_DOWN
        // handler run concurrently with every other datapath's.
        let mut closing = tokio::task::JoinSet::new();
        for dp in registry.iterate() {
            registry.remove(dp.conn_id());
            let handlers = self.handlers.clone();
            let on_channel_down = self.handlers.on_channel_down().cloned();
            closing.spawn_local(async move {
                dp.cancel_tasks().await;
                if let Some(handler) = on_channel_down {
                    let conn_id = dp.conn_id();
                    let event =
                        Event::new(EventType::ChannelDown, Some(conn_id), serde_json::Value::Null);
                    if let Err(message) = handler(dp, event).await {
                        handlers.on_exception(&HandlerError {
                            event_type: "channel_down".to_string(),
                            conn_id: Some(conn_id),
                            message,
                        });
                    }
                }
            });
        }
        while closing.join_next().await.is_some() {}

        // Swap the group out before joining: an `on_start`-spawned task
        // observing cancellation could still call `ControllerHandle::
        // create_task`, which would panic with a `BorrowMutError` if the
        // borrow below were held across the `.await`.
        let mut group = controller_tasks.replace(TaskGroup::new());
        group.cancel_and_join(self.config.shutdown_grace).await;

        if let Some(on_stop) = self.handlers.on_stop() {
            if let Err(message) = on_stop(handle).await {
                warn!("on_stop failed: {message}");
                self.handlers.on_exception(&HandlerError {
                    event_type: "stop".to_string(),
                    conn_id: None,
                    message,
                });
            }
        }

        let transport = Rc::try_unwrap(transport).unwrap_or_else(|_| {
            panic!("RpcTransport outlived the controller shutdown sequence")
        });
        let mut transport = transport;
        if let Some(driver) = transport.close().await {
            driver.stop().await;
        }

        info!("controller shutdown complete");
        Ok(())
    }
}
