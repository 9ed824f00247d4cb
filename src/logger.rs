//! Logging setup and child-output prefixing.
//!
//! The tracing subscriber carries the supervisor's own diagnostics
//! (stderr, or a daily-rotating file when a log directory is given);
//! captured child output goes to stdout, one `name |` prefixed line at
//! a time, colored per descriptor.

use std::io::IsTerminal;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

/// ANSI color codes cycled over descriptors in declaration order:
/// cyan, yellow, green, magenta, red, blue.
const COLORS: [u8; 6] = [36, 33, 32, 35, 31, 34];

pub const PALETTE_LEN: usize = COLORS.len();

/// Configure the tracing subscriber. Returns the appender guard when
/// file logging is enabled; it must stay alive for the supervisor run.
pub fn init(debug: bool, timestamps: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    match log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "procman.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_target(false)
                .with_writer(non_blocking);
            if timestamps {
                builder.try_init().ok();
            } else {
                builder.without_time().try_init().ok();
            }
            Some(guard)
        }
        None => {
            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr);
            if timestamps {
                builder.try_init().ok();
            } else {
                builder.without_time().try_init().ok();
            }
            None
        }
    }
}

/// Copy a child's output stream to stdout line by line, prefixed with
/// the padded process name. Runs until the stream closes.
pub async fn forward<R>(name: String, color_index: usize, pad: usize, reader: R)
where
    R: AsyncRead + Unpin,
{
    let colorize = std::io::stdout().is_terminal();
    let color = COLORS[color_index % PALETTE_LEN];
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if colorize {
            println!("\x1b[{color}m{name:<pad$} |\x1b[0m {line}");
        } else {
            println!("{name:<pad$} | {line}");
        }
    }
}
