use std::fs;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::error;

use procman::cli::{Cli, Command, ExportFormat};
use procman::config;
use procman::control::{self, Controller};
use procman::export;
use procman::logger;
use procman::parse;
use procman::registry::Registry;
use procman::runtime::Supervisor;
use procman::terminate;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = logger::init(cli.debug, !cli.no_timestamps, cli.log_dir.as_deref());

    match &cli.command {
        Command::Run { verb, names } => {
            let settings = cli.settings()?;
            let addr = config::server_addr(settings.rpc_port);
            let out = control::call(&addr, *verb, names.clone())
                .await
                .with_context(|| format!("control call to {addr}"))?;
            print!("{out}");
            Ok(())
        }
        Command::Check => {
            let settings = cli.settings()?;
            let entries = read_procfile(&settings.procfile)?;
            let mut names: Vec<_> = entries.into_iter().map(|e| e.name).collect();
            names.sort();
            println!("valid procfile detected ({})", names.join(", "));
            Ok(())
        }
        Command::Export { format, path } => {
            let settings = cli.settings()?;
            let entries = read_procfile(&settings.procfile)?;
            let registry = Registry::build(entries, &settings)?;
            match format {
                ExportFormat::Upstart => {
                    export::export_upstart(&registry.snapshot().await, &settings.procfile, path)?;
                }
            }
            Ok(())
        }
        Command::Start { names } => start(&cli, names).await,
    }
}

fn read_procfile(path: &std::path::Path) -> anyhow::Result<Vec<parse::ProcEntry>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(parse::parse_procfile(&text)?)
}

async fn start(cli: &Cli, names: &[String]) -> anyhow::Result<()> {
    let settings = cli.settings()?;
    let entries = read_procfile(&settings.procfile)?;
    let registry = Arc::new(Registry::build(entries, &settings)?);
    if !names.is_empty() {
        registry.narrow(names).await?;
    }

    let env = parse::load_env_files(&settings.env_files)?;

    let (err_tx, err_rx) = mpsc::channel(1);
    let (ctrl_tx, ctrl_rx) = mpsc::channel(10);
    let sup = Arc::new(Supervisor::new(Arc::clone(&registry), env, err_tx));

    // The control server lives and dies with the supervisor run; a
    // failure to bind is fatal to the control plane only.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = settings.rpc_server.then(|| {
        let controller = Controller::new(Arc::clone(&sup), ctrl_tx.clone());
        let port = settings.rpc_port;
        tokio::spawn(async move {
            if let Err(err) = control::serve(controller, port, shutdown_rx).await {
                error!(error = %err, "control server failed");
            }
        })
    });

    let signals = terminate::shutdown_signals()?;
    let result = sup.run(ctrl_rx, err_rx, signals).await;

    let _ = shutdown_tx.send(true);
    if let Some(server) = server {
        let _ = server.await;
    }

    Ok(result?)
}
