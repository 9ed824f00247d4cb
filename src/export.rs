//! Export of the process set to static init-system configuration.
//! Currently upstart only: one `app-<name>.conf` per descriptor.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Error;
use crate::process::Process;

/// Write one upstart unit per descriptor into `out_dir`. Environment
/// lines come from the assigned port and a `.env` file next to the
/// procfile, when one exists.
pub fn export_upstart(
    procs: &[Arc<Process>],
    procfile: &Path,
    out_dir: &Path,
) -> Result<(), Error> {
    fs::create_dir_all(out_dir)?;

    let procfile = procfile
        .canonicalize()
        .unwrap_or_else(|_| procfile.to_path_buf());
    let app_dir = procfile
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let env = read_dotenv(&app_dir.join(".env"));

    for proc in procs {
        let mut unit = String::new();
        let _ = writeln!(unit, "start on starting app-{}", proc.name);
        let _ = writeln!(unit, "stop on stopping app-{}", proc.name);
        let _ = writeln!(unit, "respawn");
        let _ = writeln!(unit);

        if let Some(port) = proc.port {
            let _ = writeln!(unit, "env PORT={port}");
        }
        for (key, value) in &env {
            let _ = writeln!(unit, "env {key}='{}'", value.replace('\'', "\\'"));
        }

        let _ = writeln!(unit);
        let _ = writeln!(unit, "setuid app");
        let _ = writeln!(unit);
        let _ = writeln!(unit, "chdir {}", app_dir.display());
        let _ = writeln!(unit);
        let _ = writeln!(unit, "exec {}", proc.cmdline);

        fs::write(out_dir.join(format!("app-{}.conf", proc.name)), unit)?;
    }

    Ok(())
}

/// Plain `KEY=value` lines, with any `export ` prefix trimmed.
fn read_dotenv(path: &Path) -> Vec<(String, String)> {
    let Ok(text) = fs::read_to_string(path) else {
        return Vec::new();
    };

    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim().trim_start_matches("export ").trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_unit_per_process() {
        let dir = std::env::temp_dir().join("procman-export-test");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let procfile = dir.join("Procfile");
        fs::write(&procfile, "web: rails server\n").unwrap();
        fs::write(dir.join(".env"), "export RAILS_ENV=production\n").unwrap();

        let procs = vec![Arc::new(
            Process::new("web", "rails server").with_port(Some(5000)),
        )];
        let out_dir = dir.join("upstart");
        export_upstart(&procs, &procfile, &out_dir).unwrap();

        let unit = fs::read_to_string(out_dir.join("app-web.conf")).unwrap();
        assert!(unit.contains("start on starting app-web"));
        assert!(unit.contains("respawn"));
        assert!(unit.contains("env PORT=5000"));
        assert!(unit.contains("env RAILS_ENV='production'"));
        assert!(unit.contains("exec rails server"));
    }
}
