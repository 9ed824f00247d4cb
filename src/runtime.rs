//! The supervisor control loop: bring the registered process set to
//! running, then multiplex control-plane requests, process exits and OS
//! signals until a stop decision is reached.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{info, warn};

use crate::error::Error;
use crate::process::Launch;
use crate::registry::Registry;
use crate::terminate::StopSignal;

/// Stop-subset request marshaled from the control plane onto the loop,
/// so remote stops serialize with supervisor-initiated stop-alls.
pub struct StopRequest {
    pub names: Vec<String>,
    pub reply: oneshot::Sender<Result<(), Error>>,
}

pub struct Supervisor {
    registry: Arc<Registry>,
    env: Arc<Vec<(String, String)>>,
    err_tx: mpsc::Sender<Error>,
}

impl Supervisor {
    pub fn new(
        registry: Arc<Registry>,
        env: Vec<(String, String)>,
        err_tx: mpsc::Sender<Error>,
    ) -> Self {
        Self {
            registry,
            env: Arc::new(env),
            err_tx,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn launch(&self) -> Launch {
        Launch::new(Arc::clone(&self.env), self.err_tx.clone())
    }

    pub async fn start_proc(&self, name: &str) -> Result<(), Error> {
        let proc = self
            .registry
            .find(name)
            .await
            .ok_or_else(|| Error::UnknownProcess(name.to_string()))?;
        proc.start(&self.launch()).await
    }

    pub async fn stop_proc(&self, name: &str, sig: StopSignal) -> Result<(), Error> {
        let proc = self
            .registry
            .find(name)
            .await
            .ok_or_else(|| Error::UnknownProcess(name.to_string()))?;
        proc.stop(sig).await
    }

    pub async fn restart_proc(&self, name: &str) -> Result<(), Error> {
        self.stop_proc(name, StopSignal::default()).await?;
        self.start_proc(name).await
    }

    /// Stop every registered process sequentially, walking the
    /// configured shutdown order and honoring the stagger interval.
    /// Returns the last stop error observed, if any.
    pub async fn stop_all(&self, sig: StopSignal) -> Result<(), Error> {
        let mut result = Ok(());

        for proc in self.registry.stop_order().await {
            if let Err(err) = proc.stop(sig).await {
                warn!(process = %proc.name, error = %err, "failed to stop");
                result = Err(err);
            }
            if !self.registry.interval.is_zero() {
                time::sleep(self.registry.interval).await;
            }
        }

        result
    }

    /// Start everything, then wait for a stop decision: a failed process
    /// under exit-on-error, all processes gone under exit-on-stop, or an
    /// OS termination signal (forwarded to the children). Control-plane
    /// stop requests are served in between without ending the loop.
    pub async fn run(
        &self,
        mut ctrl_rx: mpsc::Receiver<StopRequest>,
        mut err_rx: mpsc::Receiver<Error>,
        mut signals: impl Stream<Item = StopSignal> + Unpin,
    ) -> Result<(), Error> {
        // Each startup waiter holds a clone of this sender; the channel
        // closing means every process has observed its exit.
        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

        for proc in self.registry.snapshot().await {
            let mut launch = self.launch();
            launch.done = Some(done_tx.clone());
            proc.start(&launch).await?;
            if !self.registry.interval.is_zero() {
                time::sleep(self.registry.interval).await;
            }
        }
        drop(done_tx);

        loop {
            tokio::select! {
                Some(req) = ctrl_rx.recv() => {
                    let mut result = Ok(());
                    for name in &req.names {
                        if let Err(err) = self.stop_proc(name, StopSignal::default()).await {
                            result = Err(err);
                            break;
                        }
                    }
                    let _ = req.reply.send(result);
                }
                Some(err) = err_rx.recv() => {
                    if self.registry.exit_on_error {
                        self.stop_all(StopSignal::default()).await?;
                        return Err(err);
                    }
                    warn!(error = %err, "process failed");
                }
                _ = done_rx.recv(), if self.registry.exit_on_stop => {
                    info!("all processes stopped");
                    self.stop_all(StopSignal::default()).await?;
                    return Ok(());
                }
                Some(sig) = signals.next() => {
                    info!(signal = ?sig, "shutting down");
                    self.stop_all(sig).await?;
                    return Ok(());
                }
            }
        }
    }
}
