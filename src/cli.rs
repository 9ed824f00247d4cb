//! Command-line surface for the supervisor and its companion client.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{self, Settings};
use crate::control::Verb;
use crate::error::Error;
use crate::process::DEFAULT_GRACE;

#[derive(Debug, Parser)]
#[command(name = "procman", version, about = "Procfile-driven process supervisor")]
pub struct Cli {
    /// Path to the procfile
    #[arg(short = 'f', long, global = true, default_value = "Procfile")]
    pub procfile: PathBuf,

    /// Path to the YAML settings file
    #[arg(short = 'c', long = "config", global = true, default_value = ".procman")]
    pub config: PathBuf,

    /// Environment files to load, comma separated
    #[arg(long = "env", global = true, value_delimiter = ',')]
    pub env_files: Vec<PathBuf>,

    /// Port for the control server
    #[arg(short = 'p', long = "port", global = true)]
    pub rpc_port: Option<u16>,

    /// Base port for PORT auto-assignment (0 disables)
    #[arg(short = 'b', long, global = true, default_value_t = 0)]
    pub base_port: u16,

    /// Exit the supervisor if a process quits with an error
    #[arg(long, global = true)]
    pub exit_on_error: bool,

    /// Keep the supervisor running after every process has stopped
    #[arg(long, global = true)]
    pub no_exit_on_stop: bool,

    /// Do not start the control server
    #[arg(long, global = true)]
    pub no_rpc_server: bool,

    /// Seconds to wait between starting/stopping consecutive processes
    #[arg(long, global = true, default_value_t = 0)]
    pub interval: u64,

    /// Reverse process order when stopping
    #[arg(long, global = true)]
    pub reverse_on_stop: bool,

    /// Run processes detached (no wait, no captured output)
    #[arg(long, global = true)]
    pub detached: bool,

    /// Discard process output
    #[arg(long, global = true)]
    pub silent: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Omit timestamps from supervisor logs
    #[arg(long, global = true)]
    pub no_timestamps: bool,

    /// Write supervisor logs to a daily-rotating file in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the supervisor, optionally narrowed to the named processes
    Start { names: Vec<String> },
    /// Send a control command to a running supervisor
    Run {
        verb: Verb,
        names: Vec<String>,
    },
    /// Validate the procfile and list its entries
    Check,
    /// Export the process set to init-system configuration files
    Export {
        format: ExportFormat,
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ExportFormat {
    Upstart,
}

impl Cli {
    /// Resolve flags into settings, then overlay the settings file.
    pub fn settings(&self) -> Result<Settings, Error> {
        let mut settings = Settings {
            procfile: self.procfile.clone(),
            env_files: self.env_files.clone(),
            rpc_port: config::default_port(self.rpc_port),
            rpc_server: !self.no_rpc_server,
            base_port: (self.base_port > 0).then_some(self.base_port),
            exit_on_error: self.exit_on_error,
            exit_on_stop: !self.no_exit_on_stop,
            interval: Duration::from_secs(self.interval),
            reverse_on_stop: self.reverse_on_stop,
            detached: self.detached,
            silent: self.silent,
            stop_grace: DEFAULT_GRACE,
        };
        settings.apply_file(&self.config)?;
        Ok(settings)
    }
}
