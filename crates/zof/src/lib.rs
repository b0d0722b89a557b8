#![forbid(unsafe_code)]
//! `zof`: write an OpenFlow controller without hand-rolling the protocol
//! plumbing.
//!
//! ```no_run
//! use zof::{Config, Controller, HandlersBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), zof::ZofError> {
//!     tracing_subscriber::fmt::init();
//!
//!     let config = Config::default();
//!     let handlers = HandlersBuilder::new()
//!         .on_channel_up(|dp, _event| async move {
//!             tracing::info!("datapath {} connected", dp.dpid());
//!             Ok(())
//!         })
//!         .build();
//!
//!     Controller::new(config, handlers).run().await
//! }
//! ```
//!
//! A [`Controller`] owns one helper subprocess for its whole lifetime,
//! negotiates each incoming switch connection into a
//! [`Datapath`], and dispatches every subsequent event to whichever handler
//! was registered on [`Handlers`] via [`HandlersBuilder`]. Nothing here
//! spawns its own OS thread: the entire runtime runs inside one
//! `tokio::task::LocalSet`, so handler closures may freely use `Rc`-based
//! state instead of `Arc`/`Mutex`.

pub use zof_core::{
    Config, ConfigBuilder, Controller, ControllerHandle, Datapath, Dispatcher, Driver,
    DriverClosedError, DriverWriter, ExitSignal, HandlerError, HandlerResult, Handlers,
    HandlersBuilder, LocalBoxFuture, Registry, RpcCallError, RpcTransport, SignalEvent,
    StartupError, TaskGroup, TlsIdentity, ZofError,
};
pub use zof_proto::{Event, EventType, Framing};
