use std::time::Duration;

use thiserror::Error;

/// Errors raised by the supervisor and its control plane.
///
/// Lifecycle errors for one process never unwind into unrelated
/// processes; the only cross-process propagation is the explicit
/// exit-on-error policy in the supervisor loop.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// A name was used that is not present in the registry.
    #[error("unknown process: {0}")]
    UnknownProcess(String),

    /// The procfile parsed to zero entries.
    #[error("no process entries in procfile")]
    EmptyProcfile,

    /// Two procfile lines declared the same name.
    #[error("duplicate process name: {0}")]
    DuplicateName(String),

    /// Port auto-assignment walked past the top of the port range.
    #[error("assigned port for process {name} exceeds 65535 (base port {base})")]
    PortRange { name: String, base: u16 },

    /// A managed process exited with a failure that was not caused by
    /// the supervisor's own stop path.
    #[error("process {name} failed: {detail}")]
    ProcessFailed { name: String, detail: String },

    /// The hard-kill escalation itself failed; the child may be leaked.
    #[error("failed to kill {name}: {source}")]
    Kill {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The control server's in-flight connections did not drain in time.
    #[error("control server did not shut down within {0:?}")]
    ControlShutdownTimeout(Duration),

    /// Error string returned by the remote supervisor for an RPC call.
    #[error("{0}")]
    Remote(String),

    /// The supervisor loop is no longer answering control requests.
    #[error("supervisor control loop unavailable")]
    ControlUnavailable,

    /// Malformed request or response on the control-plane wire.
    #[error("invalid control message: {0}")]
    Protocol(#[from] serde_json::Error),

    /// Malformed YAML settings file.
    #[error("invalid settings file: {0}")]
    Settings(#[from] serde_yaml::Error),

    /// An environment file could not be read or parsed.
    #[error("failed to load env file: {0}")]
    EnvFile(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
