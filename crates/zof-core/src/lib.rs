#![forbid(unsafe_code)]
//! Controller runtime for the OpenFlow network-management protocol: owns the
//! translation helper subprocess, negotiates each switch connection, and
//! drives user-registered handlers from a single-threaded dispatch loop.
//!
//! Application code typically depends on the `zof` facade crate rather than
//! this one directly; `zof-core` is split out so the runtime can be tested
//! and versioned independently of the re-export surface.

mod config;
mod controller;
mod datapath;
mod dispatcher;
mod driver;
mod error;
mod handlers;
mod registry;
mod signal;
mod statemachine;
mod taskgroup;
mod transport;

pub use config::{Config, ConfigBuilder, ExitSignal, TlsIdentity};
pub use controller::{Controller, ControllerHandle};
pub use datapath::Datapath;
pub use dispatcher::Dispatcher;
pub use driver::{Driver, DriverClosedError, DriverWriter};
pub use error::{HandlerError, RpcCallError, StartupError, ZofError};
pub use handlers::{HandlerResult, Handlers, HandlersBuilder, LocalBoxFuture, SignalEvent};
pub use registry::Registry;
pub use taskgroup::TaskGroup;
pub use transport::RpcTransport;

pub use zof_proto::{Event, EventType, Framing};
