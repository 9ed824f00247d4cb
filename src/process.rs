//! Per-process descriptor and lifecycle controller.
//!
//! Each [`Process`] owns its own lock and exit notification; every state
//! transition (start, exit observation, stop, kill escalation) happens
//! under that lock, so concurrent RPC calls and the supervisor loop see
//! one consistent transition per descriptor.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time;
use tracing::{info, warn};

use crate::error::Error;
use crate::logger;
use crate::terminate::{self, StopSignal};

/// Default escalation deadline between the graceful signal and SIGKILL.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

/// How a process's stdio and exit are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Output captured and prefixed; the supervisor observes its exit.
    #[default]
    Foreground,
    /// Fire-and-forget: no wait, no captured output.
    Detached,
    /// Foreground discipline, output discarded.
    Silent,
}

/// State guarded by the descriptor lock. `pid` doubles as the running
/// handle: present exactly while the child is alive.
#[derive(Debug, Default)]
struct ProcState {
    pid: Option<u32>,
    stopped_by_supervisor: bool,
    wait_err: Option<String>,
}

/// Everything a spawn needs from the surrounding supervisor: the extra
/// child environment, the channel unexpected exits are reported on, and
/// an optional guard whose drop marks this process as done for the
/// exit-on-stop accounting.
#[derive(Clone)]
pub struct Launch {
    pub env: Arc<Vec<(String, String)>>,
    pub err_tx: mpsc::Sender<Error>,
    pub done: Option<mpsc::Sender<()>>,
}

impl Launch {
    pub fn new(env: Arc<Vec<(String, String)>>, err_tx: mpsc::Sender<Error>) -> Self {
        Self {
            env,
            err_tx,
            done: None,
        }
    }
}

/// One named managed process. Created at registry build time and alive
/// for the whole supervisor run; only the guarded state changes.
#[derive(Debug)]
pub struct Process {
    pub name: String,
    pub cmdline: String,
    pub port: Option<u16>,
    pub color_index: usize,
    pub run_mode: RunMode,
    /// Name column width for output prefixing.
    pub pad: usize,
    pub grace: Duration,
    state: Mutex<ProcState>,
    exited: Notify,
}

impl Process {
    pub fn new(name: impl Into<String>, cmdline: impl Into<String>) -> Self {
        let name = name.into();
        let pad = name.len();
        Self {
            name,
            cmdline: cmdline.into(),
            port: None,
            color_index: 0,
            run_mode: RunMode::default(),
            pad,
            grace: DEFAULT_GRACE,
            state: Mutex::new(ProcState::default()),
            exited: Notify::new(),
        }
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn with_color(mut self, index: usize) -> Self {
        self.color_index = index;
        self
    }

    pub fn with_run_mode(mut self, mode: RunMode) -> Self {
        self.run_mode = mode;
        self
    }

    pub fn with_pad(mut self, pad: usize) -> Self {
        self.pad = pad;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Locked read of the running state; a point-in-time answer.
    pub async fn running(&self) -> bool {
        self.state.lock().await.pid.is_some()
    }

    /// Locked read of the last observed wait failure.
    pub async fn last_wait_error(&self) -> Option<String> {
        self.state.lock().await.wait_err.clone()
    }

    /// Locked read of the supervisor-stopped flag.
    pub async fn stopped_by_supervisor(&self) -> bool {
        self.state.lock().await.stopped_by_supervisor
    }

    /// Launch the child. Starting an already-running process is a no-op.
    /// Spawn failures are recorded as the wait error and routed through
    /// the supervisor error channel rather than raised here.
    pub async fn start(self: &Arc<Self>, launch: &Launch) -> Result<(), Error> {
        let mut st = self.state.lock().await;
        if st.pid.is_some() {
            return Ok(());
        }

        st.stopped_by_supervisor = false;
        st.wait_err = None;

        let mut cmd = shell_command(&self.cmdline);
        match self.run_mode {
            RunMode::Foreground => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            RunMode::Detached | RunMode::Silent => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        cmd.stdin(Stdio::null());

        // Children get their own process group so the termination
        // adapter can address them and their descendants together.
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(
            windows_sys::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP
                | windows_sys::Win32::System::Threading::CREATE_UNICODE_ENVIRONMENT,
        );

        if let Some(port) = self.port {
            cmd.env("PORT", port.to_string());
            info!(process = %self.name, port, "starting on assigned port");
        }
        for (key, value) in launch.env.iter() {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                let detail = err.to_string();
                st.wait_err = Some(detail.clone());
                warn!(process = %self.name, error = %detail, "failed to start");
                let _ = launch.err_tx.try_send(Error::ProcessFailed {
                    name: self.name.clone(),
                    detail,
                });
                return Ok(());
            }
        };

        if self.run_mode == RunMode::Detached {
            info!(process = %self.name, pid = child.id(), "started detached");
            // Dropped without waiting; the runtime reaps it in the
            // background and the supervisor forgets the handle at once.
            drop(child);
            return Ok(());
        }

        let Some(pid) = child.id() else {
            // Reaped before we ever looked; treat as an immediate exit.
            self.exited.notify_waiters();
            return Ok(());
        };
        st.pid = Some(pid);
        drop(st);

        info!(process = %self.name, pid, "started");

        if self.run_mode == RunMode::Foreground {
            if let Some(out) = child.stdout.take() {
                tokio::spawn(logger::forward(
                    self.name.clone(),
                    self.color_index,
                    self.pad,
                    out,
                ));
            }
            if let Some(err) = child.stderr.take() {
                tokio::spawn(logger::forward(
                    self.name.clone(),
                    self.color_index,
                    self.pad,
                    err,
                ));
            }
        }

        let this = Arc::clone(self);
        let err_tx = launch.err_tx.clone();
        let done = launch.done.clone();
        tokio::spawn(async move {
            // Held until the exit is observed; its drop feeds the
            // all-processes-exited accounting.
            let _done = done;

            let failure = match child.wait().await {
                Ok(status) if status.success() => None,
                Ok(status) => Some(status.to_string()),
                Err(err) => Some(format!("wait failed: {err}")),
            };

            let mut st = this.state.lock().await;
            let unexpected = failure.is_some() && !st.stopped_by_supervisor;
            st.wait_err = failure.clone();
            st.pid = None;
            drop(st);

            this.exited.notify_waiters();

            if unexpected {
                if let Some(detail) = failure {
                    let _ = err_tx.try_send(Error::ProcessFailed {
                        name: this.name.clone(),
                        detail,
                    });
                }
            }

            info!(process = %this.name, "terminated");
        });

        Ok(())
    }

    /// Deliver the stop signal and wait for the exit, escalating to a
    /// hard kill once the grace period runs out. Stopping an already
    /// stopped process is a no-op. A supervisor-initiated exit is never
    /// surfaced as a failure; only a failed hard kill is.
    pub async fn stop(&self, sig: StopSignal) -> Result<(), Error> {
        let mut st = self.state.lock().await;
        let Some(pid) = st.pid else {
            return Ok(());
        };

        st.stopped_by_supervisor = true;

        if let Err(err) = terminate::terminate(pid, sig) {
            // Delivery failure is non-fatal; the escalation below still
            // bounds the wait.
            warn!(process = %self.name, pid, error = %err, "failed to deliver stop signal");
        }

        // Arm the exit notification while still holding the lock so the
        // waiter cannot slip a notify in between.
        let notified = self.exited.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        drop(st);

        if time::timeout(self.grace, notified.as_mut()).await.is_err() {
            let st = self.state.lock().await;
            if let Some(pid) = st.pid {
                warn!(process = %self.name, pid, "grace period elapsed, killing");
                terminate::kill(pid).map_err(|source| Error::Kill {
                    name: self.name.clone(),
                    source,
                })?;
            }
            drop(st);
            notified.await;
        }

        Ok(())
    }
}

#[cfg(unix)]
fn shell_command(cmdline: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(cmdline);
    cmd
}

#[cfg(windows)]
fn shell_command(cmdline: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/c").arg(cmdline);
    cmd
}
