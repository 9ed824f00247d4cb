//! The process registry: an ordered list of descriptors plus the
//! supervisor-wide policy settings. Storage and lookup only; lifecycle
//! behavior lives on [`Process`](crate::process::Process).

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::Settings;
use crate::error::Error;
use crate::logger;
use crate::parse::ProcEntry;
use crate::process::{Process, RunMode};

/// Ports are assigned from the base in steps of 100 per descriptor, in
/// declaration order.
const PORT_STRIDE: u16 = 100;

#[derive(Debug)]
pub struct Registry {
    /// Declaration-ordered descriptors. The shape is only ever mutated
    /// by the main task (narrowing to a named subset before startup);
    /// everything else takes read snapshots.
    procs: RwLock<Vec<Arc<Process>>>,
    pub exit_on_error: bool,
    pub exit_on_stop: bool,
    pub interval: std::time::Duration,
    pub reverse_on_stop: bool,
}

impl Registry {
    /// Build descriptors from parsed procfile entries, assigning ports,
    /// colors and the shared name pad in declaration order.
    pub fn build(entries: Vec<ProcEntry>, settings: &Settings) -> Result<Self, Error> {
        if entries.is_empty() {
            return Err(Error::EmptyProcfile);
        }

        let pad = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
        let run_mode = if settings.detached {
            RunMode::Detached
        } else if settings.silent {
            RunMode::Silent
        } else {
            RunMode::Foreground
        };

        let mut procs = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            // Computed wide so a high base with many entries errors
            // instead of wrapping.
            let port = match settings.base_port {
                Some(base) => {
                    let port = u32::from(base) + u32::from(PORT_STRIDE) * index as u32;
                    Some(u16::try_from(port).map_err(|_| Error::PortRange {
                        name: entry.name.clone(),
                        base,
                    })?)
                }
                None => None,
            };
            procs.push(Arc::new(
                Process::new(entry.name, entry.cmdline)
                    .with_port(port)
                    .with_color(index % logger::PALETTE_LEN)
                    .with_run_mode(run_mode)
                    .with_pad(pad)
                    .with_grace(settings.stop_grace),
            ));
        }

        Ok(Self {
            procs: RwLock::new(procs),
            exit_on_error: settings.exit_on_error,
            exit_on_stop: settings.exit_on_stop,
            interval: settings.interval,
            reverse_on_stop: settings.reverse_on_stop,
        })
    }

    pub async fn find(&self, name: &str) -> Option<Arc<Process>> {
        self.procs
            .read()
            .await
            .iter()
            .find(|p| p.name == name)
            .cloned()
    }

    /// Narrow the registry to the named subset, in the order given.
    /// Called only by the main task before startup.
    pub async fn narrow(&self, names: &[String]) -> Result<(), Error> {
        let mut subset = Vec::with_capacity(names.len());
        for name in names {
            let proc = self
                .find(name)
                .await
                .ok_or_else(|| Error::UnknownProcess(name.clone()))?;
            subset.push(proc);
        }

        // Rebuilt with the subset's own name pad so log prefixes are no
        // wider than needed. Nothing has started yet, so the descriptors
        // carry no state worth keeping.
        let pad = subset.iter().map(|p| p.name.len()).max().unwrap_or(0);
        let subset = subset
            .into_iter()
            .map(|p| {
                Arc::new(
                    Process::new(p.name.clone(), p.cmdline.clone())
                        .with_port(p.port)
                        .with_color(p.color_index)
                        .with_run_mode(p.run_mode)
                        .with_pad(pad)
                        .with_grace(p.grace),
                )
            })
            .collect();

        *self.procs.write().await = subset;
        Ok(())
    }

    /// Point-in-time snapshot in declaration order.
    pub async fn snapshot(&self) -> Vec<Arc<Process>> {
        self.procs.read().await.clone()
    }

    /// The order stop-all walks: declaration order, or its reverse when
    /// the shutdown-order flag is set. The stored order never changes.
    pub async fn stop_order(&self) -> Vec<Arc<Process>> {
        let mut procs = self.snapshot().await;
        if self.reverse_on_stop {
            procs.reverse();
        }
        procs
    }

    pub async fn names(&self) -> Vec<String> {
        self.procs
            .read()
            .await
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::ProcEntry;

    fn entries(names: &[&str]) -> Vec<ProcEntry> {
        names
            .iter()
            .map(|n| ProcEntry {
                name: n.to_string(),
                cmdline: "sleep 1".to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn build_assigns_ports_and_colors_in_order() {
        let settings = Settings {
            base_port: Some(5000),
            ..Settings::default()
        };
        let registry = Registry::build(entries(&["web", "worker", "clock"]), &settings).unwrap();

        let procs = registry.snapshot().await;
        assert_eq!(procs[0].port, Some(5000));
        assert_eq!(procs[1].port, Some(5100));
        assert_eq!(procs[2].port, Some(5200));
        assert_eq!(procs[0].color_index, 0);
        assert_eq!(procs[1].color_index, 1);
        assert_eq!(procs[2].pad, "worker".len());
    }

    #[tokio::test]
    async fn port_assignment_rejects_range_overflow() {
        let settings = Settings {
            base_port: Some(65500),
            ..Settings::default()
        };
        let err = Registry::build(entries(&["web", "worker"]), &settings).unwrap_err();
        assert!(matches!(err, Error::PortRange { name, base: 65500 } if name == "worker"));
    }

    #[tokio::test]
    async fn narrow_recomputes_the_name_pad() {
        let registry =
            Registry::build(entries(&["web", "longworker"]), &Settings::default()).unwrap();
        assert_eq!(registry.snapshot().await[0].pad, "longworker".len());

        registry.narrow(&["web".to_string()]).await.unwrap();
        assert_eq!(registry.snapshot().await[0].pad, "web".len());
    }

    #[tokio::test]
    async fn empty_entry_list_is_rejected() {
        let err = Registry::build(Vec::new(), &Settings::default()).unwrap_err();
        assert!(matches!(err, Error::EmptyProcfile));
    }

    #[tokio::test]
    async fn narrow_keeps_requested_order_and_rejects_unknown() {
        let registry =
            Registry::build(entries(&["web", "worker", "clock"]), &Settings::default()).unwrap();

        registry
            .narrow(&["clock".to_string(), "web".to_string()])
            .await
            .unwrap();
        assert_eq!(registry.names().await, vec!["clock", "web"]);

        let err = registry.narrow(&["nope".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::UnknownProcess(name) if name == "nope"));
    }

    #[tokio::test]
    async fn stop_order_reverses_under_flag_without_mutating() {
        let settings = Settings {
            reverse_on_stop: true,
            ..Settings::default()
        };
        let registry = Registry::build(entries(&["a", "b", "c"]), &settings).unwrap();

        let order: Vec<_> = registry
            .stop_order()
            .await
            .iter()
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(order, vec!["c", "b", "a"]);
        // list/status order is unchanged by computing the stop order
        assert_eq!(registry.names().await, vec!["a", "b", "c"]);
    }
}
