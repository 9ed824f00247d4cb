//! Remote control plane: a JSON-lines request/response protocol over a
//! long-lived TCP listener, and the matching client used by the
//! companion CLI. Requests and responses carry process name strings
//! only.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time;
use tracing::{info, warn};

use crate::config;
use crate::error::Error;
use crate::runtime::{StopRequest, Supervisor};
use crate::terminate::StopSignal;

/// Bound on draining in-flight connections at shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Verb {
    Start,
    Stop,
    StopAll,
    Restart,
    RestartAll,
    List,
    Status,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    pub verb: Verb,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub result: String,
}

/// Server-side verb dispatch. Holds no lock of its own; everything
/// delegates to the per-descriptor locks through the supervisor.
#[derive(Clone)]
pub struct Controller {
    sup: Arc<Supervisor>,
    ctrl_tx: mpsc::Sender<StopRequest>,
}

impl Controller {
    pub fn new(sup: Arc<Supervisor>, ctrl_tx: mpsc::Sender<StopRequest>) -> Self {
        Self { sup, ctrl_tx }
    }

    pub async fn dispatch(&self, req: Request) -> Response {
        match self.apply(req).await {
            Ok(result) => Response {
                error: String::new(),
                result,
            },
            Err(err) => Response {
                error: err.to_string(),
                result: String::new(),
            },
        }
    }

    async fn apply(&self, req: Request) -> Result<String, Error> {
        match req.verb {
            Verb::Start => {
                for name in &req.args {
                    self.sup.start_proc(name).await?;
                }
                Ok(String::new())
            }
            // Stopping must serialize with supervisor-initiated
            // stop-alls, so it goes through the loop channel.
            Verb::Stop => {
                let (reply, rx) = oneshot::channel();
                self.ctrl_tx
                    .send(StopRequest {
                        names: req.args,
                        reply,
                    })
                    .await
                    .map_err(|_| Error::ControlUnavailable)?;
                rx.await.map_err(|_| Error::ControlUnavailable)??;
                Ok(String::new())
            }
            // Goes straight to the descriptors; per-descriptor stop is
            // idempotent, so racing a supervisor stop-all is harmless.
            Verb::StopAll => {
                self.sup.stop_all(StopSignal::default()).await?;
                Ok(String::new())
            }
            Verb::Restart => {
                for name in &req.args {
                    self.sup.restart_proc(name).await?;
                }
                Ok(String::new())
            }
            Verb::RestartAll => {
                for name in self.sup.registry().names().await {
                    self.sup.restart_proc(&name).await?;
                }
                Ok(String::new())
            }
            Verb::List => {
                let mut out = String::new();
                for name in self.sup.registry().names().await {
                    out.push_str(&name);
                    out.push('\n');
                }
                Ok(out)
            }
            // Point-in-time snapshot; no lock held across the listing.
            Verb::Status => {
                let mut out = String::new();
                for proc in self.sup.registry().snapshot().await {
                    out.push(if proc.running().await { '*' } else { ' ' });
                    out.push_str(&proc.name);
                    out.push('\n');
                }
                Ok(out)
            }
        }
    }
}

/// Bind the control listener and serve until `shutdown` flips.
/// A bind failure is fatal to the control plane only.
pub async fn serve(
    controller: Controller,
    port: u16,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    let addr = format!("{}:{port}", config::bind_addr());
    let listener = TcpListener::bind(&addr).await?;
    serve_on(controller, listener, shutdown).await
}

/// Accept loop over an already-bound listener. Each connection runs on
/// its own task so one stuck client cannot block new connections; at
/// shutdown, in-flight connections get [`SHUTDOWN_GRACE`] to finish.
pub async fn serve_on(
    controller: Controller,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "control server listening");
    }

    let mut conns = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let controller = controller.clone();
                    conns.spawn(async move {
                        if let Err(err) = serve_conn(controller, stream).await {
                            warn!(%peer, error = %err, "control connection failed");
                        }
                    });
                }
                Err(err) => warn!(error = %err, "accept failed"),
            },
        }
    }

    drop(listener);

    let drain = async {
        while conns.join_next().await.is_some() {}
    };
    time::timeout(SHUTDOWN_GRACE, drain)
        .await
        .map_err(|_| Error::ControlShutdownTimeout(SHUTDOWN_GRACE))?;

    Ok(())
}

async fn serve_conn(controller: Controller, stream: TcpStream) -> Result<(), Error> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(req) => controller.dispatch(req).await,
            Err(err) => Response {
                error: format!("invalid control message: {err}"),
                result: String::new(),
            },
        };

        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        write.write_all(&payload).await?;
    }

    Ok(())
}

/// One request/response exchange with a running supervisor. A non-empty
/// error string in the response becomes [`Error::Remote`].
pub async fn call(addr: &str, verb: Verb, args: Vec<String>) -> Result<String, Error> {
    let stream = TcpStream::connect(addr).await?;
    let (read, mut write) = stream.into_split();

    let mut payload = serde_json::to_vec(&Request { verb, args })?;
    payload.push(b'\n');
    write.write_all(&payload).await?;

    let mut lines = BufReader::new(read).lines();
    let Some(line) = lines.next_line().await? else {
        return Err(Error::Remote("connection closed before response".into()));
    };

    let response: Response = serde_json::from_str(&line)?;
    if !response.error.is_empty() {
        return Err(Error::Remote(response.error));
    }
    Ok(response.result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbs_use_kebab_case_on_the_wire() {
        let req = Request {
            verb: Verb::StopAll,
            args: vec![],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"stop-all\""), "{json}");

        let parsed: Request =
            serde_json::from_str("{\"verb\":\"restart-all\",\"args\":[\"web\"]}").unwrap();
        assert_eq!(parsed.verb, Verb::RestartAll);
        assert_eq!(parsed.args, vec!["web"]);
    }

    #[test]
    fn missing_args_default_to_empty() {
        let parsed: Request = serde_json::from_str("{\"verb\":\"list\"}").unwrap();
        assert_eq!(parsed.verb, Verb::List);
        assert!(parsed.args.is_empty());
    }

    #[test]
    fn empty_response_fields_are_omitted() {
        let ok = serde_json::to_string(&Response::default()).unwrap();
        assert_eq!(ok, "{}");
    }
}
