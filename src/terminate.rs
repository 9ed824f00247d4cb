//! Platform termination adapter: deliver a graceful signal to a process
//! and its children, or hard-kill the whole group, plus the stream of
//! OS shutdown signals the supervisor itself listens on.

use std::io;

use futures::stream::BoxStream;

/// Portable graceful-stop signal. On unix each variant maps to the
/// matching POSIX signal; on windows the distinction collapses into
/// console control events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopSignal {
    #[default]
    Interrupt,
    Terminate,
    Hangup,
}

#[cfg(unix)]
mod imp {
    use super::StopSignal;
    use std::io;

    use futures::stream::BoxStream;
    use futures::StreamExt;
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::{getpgid, Pid};
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    impl StopSignal {
        pub(super) fn to_unix(self) -> Signal {
            match self {
                StopSignal::Interrupt => Signal::SIGINT,
                StopSignal::Terminate => Signal::SIGTERM,
                StopSignal::Hangup => Signal::SIGHUP,
            }
        }

        fn from_raw(raw: i32) -> Option<Self> {
            match raw {
                SIGINT => Some(StopSignal::Interrupt),
                SIGTERM => Some(StopSignal::Terminate),
                SIGHUP => Some(StopSignal::Hangup),
                _ => None,
            }
        }
    }

    fn errno(e: Errno) -> io::Error {
        io::Error::from_raw_os_error(e as i32)
    }

    /// Signal the process, or its whole group when the process leads one.
    /// ref: http://unix.stackexchange.com/questions/14815/process-descendants
    pub fn terminate(pid: u32, sig: StopSignal) -> io::Result<()> {
        let pid = Pid::from_raw(pid as i32);
        let pgid = getpgid(Some(pid)).map_err(errno)?;

        let target = if pgid == pid {
            Pid::from_raw(-pid.as_raw())
        } else {
            pid
        };

        signal::kill(target, sig.to_unix()).map_err(errno)
    }

    /// Unconditionally kill the process group. A group that is already
    /// gone counts as success.
    pub fn kill(pid: u32) -> io::Result<()> {
        match signal::killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Err(Errno::ESRCH) => Ok(()),
            other => other.map_err(errno),
        }
    }

    /// Stream of incoming shutdown signals (SIGINT/SIGTERM/SIGHUP).
    pub fn shutdown_signals() -> io::Result<BoxStream<'static, StopSignal>> {
        let signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
        Ok(signals
            .filter_map(|raw| futures::future::ready(StopSignal::from_raw(raw)))
            .boxed())
    }
}

#[cfg(windows)]
mod imp {
    use super::StopSignal;
    use std::io;

    use futures::stream::BoxStream;
    use futures::StreamExt;
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Console::{
        AttachConsole, FreeConsole, GenerateConsoleCtrlEvent, SetConsoleCtrlHandler,
        CTRL_BREAK_EVENT, CTRL_C_EVENT,
    };
    use windows_sys::Win32::System::Threading::{
        OpenProcess, TerminateProcess, PROCESS_TERMINATE,
    };

    const ERROR_ACCESS_DENIED: i32 = 5;

    /// Inject console control events at the target's console. No single
    /// event reliably stops arbitrary console children, so both break
    /// and close are sent.
    pub fn terminate(pid: u32, _sig: StopSignal) -> io::Result<()> {
        unsafe {
            if AttachConsole(pid) == 0 {
                let err = io::Error::last_os_error();
                // Already attached to the same console.
                if err.raw_os_error() != Some(ERROR_ACCESS_DENIED) {
                    return Err(err);
                }
            }

            // Shield the supervisor from the events it is about to send.
            if SetConsoleCtrlHandler(None, 1) == 0 {
                return Err(io::Error::last_os_error());
            }

            if GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) == 0 {
                return Err(io::Error::last_os_error());
            }

            if GenerateConsoleCtrlEvent(CTRL_C_EVENT, pid) == 0 {
                return Err(io::Error::last_os_error());
            }

            FreeConsole();
        }

        Ok(())
    }

    pub fn kill(pid: u32) -> io::Result<()> {
        unsafe {
            let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
            if handle.is_null() {
                let err = io::Error::last_os_error();
                // Process already gone counts as success.
                if err.raw_os_error() == Some(87 /* ERROR_INVALID_PARAMETER */) {
                    return Ok(());
                }
                return Err(err);
            }

            let ok = TerminateProcess(handle, 1);
            CloseHandle(handle);

            if ok == 0 {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(())
    }

    /// Only ctrl-c is observable here.
    pub fn shutdown_signals() -> io::Result<BoxStream<'static, StopSignal>> {
        Ok(futures::stream::unfold((), |()| async {
            tokio::signal::ctrl_c().await.ok()?;
            Some((StopSignal::Interrupt, ()))
        })
        .boxed())
    }
}

/// Request graceful shutdown of the process (and its children, where the
/// platform can express that).
pub fn terminate(pid: u32, sig: StopSignal) -> io::Result<()> {
    imp::terminate(pid, sig)
}

/// Hard-kill the process and its group. Used only after the graceful
/// timeout escalation.
pub fn kill(pid: u32) -> io::Result<()> {
    imp::kill(pid)
}

/// Stream of OS termination signals addressed to the supervisor.
pub fn shutdown_signals() -> io::Result<BoxStream<'static, StopSignal>> {
    imp::shutdown_signals()
}
