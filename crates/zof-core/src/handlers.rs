use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use zof_proto::Event;

use crate::controller::ControllerHandle;
use crate::datapath::Datapath;
use crate::error::HandlerError;

/// A boxed, `!Send` future — handler closures run on the single dispatch
/// thread, so there is no need for the `Send` bound `futures::future::
/// BoxFuture` carries.
pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

pub type HandlerResult = Result<(), String>;

type EventHandler = Rc<dyn Fn(Rc<Datapath>, Event) -> LocalBoxFuture<'static, HandlerResult>>;
type LifecycleHandler = Rc<dyn Fn(ControllerHandle) -> LocalBoxFuture<'static, HandlerResult>>;
type SignalHandler = Rc<dyn Fn(SignalEvent) -> LocalBoxFuture<'static, SignalEvent>>;
type ExceptionHandler = Rc<dyn Fn(&HandlerError)>;

/// The in-band shutdown request a translated OS signal becomes. `exit`
/// starts `true`; a handler clears it to veto the default termination.
#[derive(Debug, Clone)]
pub struct SignalEvent {
    pub signal: crate::config::ExitSignal,
    pub exit: bool,
}

/// The capability set a user registers handlers against: the Controller is
/// modeled as a set of optional callback slots, registered explicitly
/// rather than resolved by reflecting on method names at runtime.
///
/// Built once via [`HandlersBuilder`] and never mutated afterward.
#[derive(Default, Clone)]
pub struct Handlers {
    on_start: Option<LifecycleHandler>,
    on_stop: Option<LifecycleHandler>,
    on_exception: Option<ExceptionHandler>,
    on_signal: Option<SignalHandler>,
    on_channel_up: Option<EventHandler>,
    on_channel_down: Option<EventHandler>,
    on_channel_alert: Option<EventHandler>,
    on_message: Option<EventHandler>,
    by_message_type: HashMap<String, EventHandler>,
}

impl Handlers {
    pub fn on_start(&self) -> Option<&LifecycleHandler> {
        self.on_start.as_ref()
    }

    pub fn on_stop(&self) -> Option<&LifecycleHandler> {
        self.on_stop.as_ref()
    }

    pub fn on_exception(&self, err: &HandlerError) {
        match &self.on_exception {
            Some(handler) => handler(err),
            None => tracing::error!("{err}"),
        }
    }

    pub fn on_signal(&self) -> Option<&SignalHandler> {
        self.on_signal.as_ref()
    }

    pub fn on_channel_up(&self) -> Option<&EventHandler> {
        self.on_channel_up.as_ref()
    }

    pub fn on_channel_down(&self) -> Option<&EventHandler> {
        self.on_channel_down.as_ref()
    }

    pub fn on_channel_alert(&self) -> Option<&EventHandler> {
        self.on_channel_alert.as_ref()
    }

    /// Resolves the handler for a named message event: the specific
    /// `on_<type>` slot if registered, else the generic `on_message`
    /// fallback, else `None`.
    pub fn resolve_message(&self, message_type: &str) -> Option<&EventHandler> {
        self.by_message_type
            .get(message_type)
            .or(self.on_message.as_ref())
    }
}

/// Fluent builder for [`Handlers`], producing an immutable value on `build()`.
#[derive(Default)]
pub struct HandlersBuilder {
    handlers: Handlers,
}

impl HandlersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ControllerHandle) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        self.handlers.on_start = Some(Rc::new(move |handle| Box::pin(f(handle))));
        self
    }

    pub fn on_stop<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ControllerHandle) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        self.handlers.on_stop = Some(Rc::new(move |handle| Box::pin(f(handle))));
        self
    }

    pub fn on_exception<F>(mut self, f: F) -> Self
    where
        F: Fn(&HandlerError) + 'static,
    {
        self.handlers.on_exception = Some(Rc::new(f));
        self
    }

    pub fn on_signal<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SignalEvent) -> Fut + 'static,
        Fut: Future<Output = SignalEvent> + 'static,
    {
        self.handlers.on_signal = Some(Rc::new(move |event| Box::pin(f(event))));
        self
    }

    pub fn on_channel_up<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Rc<Datapath>, Event) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        self.handlers.on_channel_up = Some(Rc::new(move |dp, event| Box::pin(f(dp, event))));
        self
    }

    pub fn on_channel_down<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Rc<Datapath>, Event) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        self.handlers.on_channel_down = Some(Rc::new(move |dp, event| Box::pin(f(dp, event))));
        self
    }

    pub fn on_channel_alert<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Rc<Datapath>, Event) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        self.handlers.on_channel_alert = Some(Rc::new(move |dp, event| Box::pin(f(dp, event))));
        self
    }

    pub fn on_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Rc<Datapath>, Event) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        self.handlers.on_message = Some(Rc::new(move |dp, event| Box::pin(f(dp, event))));
        self
    }

    /// Registers a handler for one concrete message type name (e.g.
    /// `"packet_in"`) without requiring a runtime name lookup.
    pub fn on_type<F, Fut>(mut self, message_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(Rc<Datapath>, Event) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        let handler: EventHandler = Rc::new(move |dp, event| Box::pin(f(dp, event)));
        self.handlers.by_message_type.insert(message_type.into(), handler);
        self
    }

    pub fn build(self) -> Handlers {
        self.handlers
    }
}
