//! Supervisor-wide settings: CLI flags merged with an optional YAML
//! settings file, plus the control-plane address defaults.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;
use crate::process::DEFAULT_GRACE;

pub const DEFAULT_RPC_PORT: u16 = 8555;

/// Fully-resolved supervisor settings, immutable after startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub procfile: PathBuf,
    pub env_files: Vec<PathBuf>,
    pub rpc_port: u16,
    pub rpc_server: bool,
    /// `Some(base)` enables PORT auto-assignment from this base.
    pub base_port: Option<u16>,
    pub exit_on_error: bool,
    pub exit_on_stop: bool,
    pub interval: Duration,
    pub reverse_on_stop: bool,
    pub detached: bool,
    pub silent: bool,
    pub stop_grace: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            procfile: PathBuf::from("Procfile"),
            env_files: Vec::new(),
            rpc_port: default_port(None),
            rpc_server: true,
            base_port: None,
            exit_on_error: false,
            exit_on_stop: true,
            interval: Duration::ZERO,
            reverse_on_stop: false,
            detached: false,
            silent: false,
            stop_grace: DEFAULT_GRACE,
        }
    }
}

/// On-disk YAML mirror of the flags; present fields take precedence
/// over the command line.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    procfile: Option<PathBuf>,
    port: Option<u16>,
    baseport: Option<u16>,
    #[serde(rename = "envFiles")]
    env_files: Option<Vec<PathBuf>>,
    #[serde(rename = "exitOnErr")]
    exit_on_error: Option<bool>,
    #[serde(rename = "exitOnStop")]
    exit_on_stop: Option<bool>,
    #[serde(rename = "rpcServer")]
    rpc_server: Option<bool>,
    interval: Option<u64>,
    #[serde(rename = "reverseOnStop")]
    reverse_on_stop: Option<bool>,
    #[serde(rename = "fork")]
    detached: Option<bool>,
    silent: Option<bool>,
    #[serde(rename = "stopGrace")]
    stop_grace: Option<u64>,
}

impl Settings {
    /// Overlay values from the YAML settings file, if one exists at
    /// `path`. A missing file is not an error; a malformed one is.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), Error> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let file: FileSettings = serde_yaml::from_str(&text)?;

        if let Some(procfile) = file.procfile {
            self.procfile = procfile;
        }
        if let Some(port) = file.port {
            self.rpc_port = port;
        }
        if let Some(base) = file.baseport {
            self.base_port = (base > 0).then_some(base);
        }
        if let Some(env_files) = file.env_files {
            self.env_files = env_files;
        }
        if let Some(v) = file.exit_on_error {
            self.exit_on_error = v;
        }
        if let Some(v) = file.exit_on_stop {
            self.exit_on_stop = v;
        }
        if let Some(v) = file.rpc_server {
            self.rpc_server = v;
        }
        if let Some(secs) = file.interval {
            self.interval = Duration::from_secs(secs);
        }
        if let Some(v) = file.reverse_on_stop {
            self.reverse_on_stop = v;
        }
        if let Some(v) = file.detached {
            self.detached = v;
        }
        if let Some(v) = file.silent {
            self.silent = v;
        }
        if let Some(secs) = file.stop_grace {
            self.stop_grace = Duration::from_secs(secs);
        }

        Ok(())
    }
}

/// Control-plane port: environment override, then the explicit value,
/// then the default.
pub fn default_port(explicit: Option<u16>) -> u16 {
    if let Ok(s) = env::var("PROCMAN_RPC_PORT") {
        if let Ok(port) = s.parse() {
            return port;
        }
    }
    explicit.unwrap_or(DEFAULT_RPC_PORT)
}

/// Address the client dials.
pub fn server_addr(port: u16) -> String {
    env::var("PROCMAN_RPC_SERVER").unwrap_or_else(|_| format!("127.0.0.1:{port}"))
}

/// Address the server binds.
pub fn bind_addr() -> String {
    env::var("PROCMAN_RPC_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_overrides_flags() {
        let mut settings = Settings::default();
        let dir = std::env::temp_dir().join("procman-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.yml");
        std::fs::write(
            &path,
            "procfile: Other\nbaseport: 6000\nexitOnErr: true\ninterval: 2\n",
        )
        .unwrap();

        settings.apply_file(&path).unwrap();
        assert_eq!(settings.procfile, PathBuf::from("Other"));
        assert_eq!(settings.base_port, Some(6000));
        assert!(settings.exit_on_error);
        assert_eq!(settings.interval, Duration::from_secs(2));
        // untouched fields keep their flag values
        assert!(settings.exit_on_stop);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let mut settings = Settings::default();
        settings
            .apply_file(Path::new("/nonexistent/procman.yml"))
            .unwrap();
        assert_eq!(settings.procfile, PathBuf::from("Procfile"));
    }
}
