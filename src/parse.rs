//! Procfile and env-file collaborators. The supervisor consumes their
//! output as opaque `(name, command-line)` pairs and key/value sets.

use std::path::PathBuf;

use tracing::debug;

use crate::error::Error;

/// Env-file keys carrying this prefix are injected into children with
/// the prefix stripped; other keys are injected under their own name.
pub const EXPORT_PREFIX: &str = "SET_";

/// One parsed procfile line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcEntry {
    pub name: String,
    pub cmdline: String,
}

/// Parse procfile text: one `name: command-line` pair per non-comment,
/// non-blank line. Declaration order is preserved; duplicate names and
/// an empty result are configuration errors.
pub fn parse_procfile(text: &str) -> Result<Vec<ProcEntry>, Error> {
    let mut entries: Vec<ProcEntry> = Vec::new();

    for line in text.lines() {
        let Some((name, cmdline)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || name.starts_with('#') {
            continue;
        }
        if entries.iter().any(|e| e.name == name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        let cmdline = cmdline.trim().to_string();
        // cmd.exe has no $VAR syntax.
        #[cfg(windows)]
        let cmdline = dollar_to_percent(&cmdline);
        entries.push(ProcEntry {
            name: name.to_string(),
            cmdline,
        });
    }

    if entries.is_empty() {
        return Err(Error::EmptyProcfile);
    }

    Ok(entries)
}

/// Rewrite `$NAME` references to cmd.exe's `%NAME%` style. A name is an
/// ASCII letter followed by letters, digits or underscores; anything
/// else after a `$` is left alone.
#[cfg_attr(not(windows), allow(dead_code))]
fn dollar_to_percent(cmdline: &str) -> String {
    let mut out = String::with_capacity(cmdline.len());
    let mut rest = cmdline;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let end = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..end];
        if name.starts_with(|c: char| c.is_ascii_alphabetic()) {
            out.push('%');
            out.push_str(name);
            out.push('%');
        } else {
            out.push('$');
            out.push_str(name);
        }
        rest = &after[end..];
    }

    out.push_str(rest);
    out
}

/// Collect the env-file variables injected into every child
/// environment. The supervisor's own environment is never mutated;
/// mutating it from inside the runtime would race concurrent reads.
pub fn load_env_files(paths: &[PathBuf]) -> Result<Vec<(String, String)>, Error> {
    let mut vars = Vec::new();

    for path in paths {
        let iter = dotenv::from_filename_iter(path)
            .map_err(|err| Error::EnvFile(format!("{}: {err}", path.display())))?;

        for item in iter {
            let (key, value) =
                item.map_err(|err| Error::EnvFile(format!("{}: {err}", path.display())))?;

            let key = match key.strip_prefix(EXPORT_PREFIX) {
                Some(stripped) => {
                    debug!(key = stripped, "stripped export prefix");
                    stripped.to_string()
                }
                None => key,
            };
            vars.push((key, value));
        }
    }

    Ok(vars)
}
