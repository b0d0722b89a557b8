use std::path::PathBuf;
use std::time::Duration;

use zof_proto::Framing;

/// An OS signal that requests graceful shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitSignal {
    Interrupt,
    Terminate,
}

/// File paths for the helper's TLS identity, when the listener terminates
/// TLS itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsIdentity {
    pub cert: PathBuf,
    pub privkey: PathBuf,
    pub cacert: Option<PathBuf>,
}

/// Immutable runtime configuration. Built once via
/// [`ConfigBuilder`] and never mutated after [`crate::Controller::run`]
/// starts.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_endpoints: Vec<String>,
    pub listen_versions: Vec<u8>,
    pub exit_signals: Vec<ExitSignal>,
    pub tls_identity: Option<TlsIdentity>,
    pub oftr_path: PathBuf,
    pub oftr_args: Vec<String>,
    pub rpc_timeout: Duration,
    pub shutdown_grace: Duration,
    /// `ZOFDEBUG=1`: elevates the default log level and adds `--trace=rpc`.
    pub debug: bool,
    /// Mirrors the helper's raw stdout/stderr to the console in addition to
    /// parsing it. Off by default; never enabled implicitly.
    pub trace_io: bool,
    /// How the helper frames messages on its stdout. Every known helper
    /// build speaks [`Framing::LineDelimited`]; [`Framing::LengthPrefixed`]
    /// is implemented and wired through the Driver but unexercised by any
    /// known helper.
    pub framing: Framing,
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::new().build()
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    listen_endpoints: Vec<String>,
    listen_versions: Vec<u8>,
    exit_signals: Vec<ExitSignal>,
    tls_identity: Option<TlsIdentity>,
    oftr_path: PathBuf,
    oftr_args: Vec<String>,
    rpc_timeout: Duration,
    shutdown_grace: Duration,
    debug: bool,
    trace_io: bool,
    framing: Framing,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        let debug = std::env::var("ZOFDEBUG").as_deref() == Ok("1");
        Self {
            listen_endpoints: Vec::new(),
            listen_versions: vec![4],
            exit_signals: vec![ExitSignal::Interrupt, ExitSignal::Terminate],
            tls_identity: None,
            oftr_path: PathBuf::from("oftr"),
            oftr_args: Vec::new(),
            rpc_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(3),
            debug,
            trace_io: false,
            framing: Framing::default(),
        }
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen_endpoints(mut self, endpoints: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.listen_endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    pub fn listen_versions(mut self, versions: impl IntoIterator<Item = u8>) -> Self {
        self.listen_versions = versions.into_iter().collect();
        self
    }

    pub fn exit_signals(mut self, signals: impl IntoIterator<Item = ExitSignal>) -> Self {
        self.exit_signals = signals.into_iter().collect();
        self
    }

    pub fn tls_identity(mut self, identity: TlsIdentity) -> Self {
        self.tls_identity = Some(identity);
        self
    }

    pub fn oftr_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.oftr_path = path.into();
        self
    }

    pub fn oftr_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.oftr_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn trace_io(mut self, trace_io: bool) -> Self {
        self.trace_io = trace_io;
        self
    }

    pub fn framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn build(self) -> Config {
        let mut oftr_args = self.oftr_args;
        if self.debug && !oftr_args.iter().any(|a| a == "--trace=rpc") {
            oftr_args.push("--trace=rpc".to_string());
        }

        Config {
            listen_endpoints: self.listen_endpoints,
            listen_versions: self.listen_versions,
            exit_signals: self.exit_signals,
            tls_identity: self.tls_identity,
            oftr_path: self.oftr_path,
            oftr_args,
            rpc_timeout: self.rpc_timeout,
            shutdown_grace: self.shutdown_grace,
            debug: self.debug,
            trace_io: self.trace_io,
            framing: self.framing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.listen_versions, vec![4]);
        assert_eq!(
            config.exit_signals,
            vec![ExitSignal::Interrupt, ExitSignal::Terminate]
        );
        assert_eq!(config.rpc_timeout, Duration::from_secs(5));
        assert_eq!(config.shutdown_grace, Duration::from_secs(3));
        assert_eq!(config.oftr_path, PathBuf::from("oftr"));
        assert!(config.listen_endpoints.is_empty());
        assert!(!config.trace_io);
    }

    #[test]
    fn debug_appends_trace_rpc_once() {
        let config = ConfigBuilder::new()
            .debug(true)
            .oftr_args(["--foo"])
            .build();
        assert_eq!(config.oftr_args, vec!["--foo".to_string(), "--trace=rpc".to_string()]);
    }

    #[test]
    fn builder_overrides_listen_endpoints() {
        let config = ConfigBuilder::new()
            .listen_endpoints(["127.0.0.1:6653", "[::1]:6653"])
            .build();
        assert_eq!(config.listen_endpoints, vec!["127.0.0.1:6653", "[::1]:6653"]);
    }
}
