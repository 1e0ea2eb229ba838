//! Detached subprocess launch, liveness probing and signalling.

use std::io;
use std::process::Stdio;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::debug;

/// Outcome of asking a recorded process to stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// The signal was delivered.
    Signalled,

    /// The process had already exited.
    AlreadyGone,

    /// There was no process id to signal.
    NoProcess,
}

/// Launches `command_line` through `bash` and returns the pid of the service.
///
/// The line is run as `exec <command_line>` so the shell is replaced by the
/// service and the returned pid is the service's own. The child gets its own
/// process group and no stdin, so it outlives this process.
pub fn launch(command_line: &str) -> io::Result<u32> {
    let mut cmd = Command::new("bash");
    cmd.arg("-c")
        .arg(format!("exec {command_line}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0);

    debug!("spawning: {:?}", cmd);

    let child = cmd.spawn()?;

    child
        .id()
        .ok_or_else(|| io::Error::other("spawned process has no pid"))
}

/// Zero-effect liveness probe.
///
/// A missing or zero pid is never signalled and is reported as not alive.
/// `EPERM` means the process exists but belongs to someone else, which still
/// counts as alive.
#[must_use]
pub fn is_alive(pid: Option<u32>) -> bool {
    let Some(pid) = to_pid(pid) else {
        return false;
    };

    match signal::kill(pid, None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Sends `SIGINT`, the graceful-leave signal of the supervised services.
///
/// # Errors
///
/// Returns the errno if delivery failed for any reason other than the
/// process being gone.
pub fn interrupt(pid: Option<u32>) -> Result<StopOutcome, Errno> {
    let Some(target) = to_pid(pid) else {
        return Ok(StopOutcome::NoProcess);
    };

    match signal::kill(target, Signal::SIGINT) {
        Ok(()) => Ok(StopOutcome::Signalled),
        Err(Errno::ESRCH) => Ok(StopOutcome::AlreadyGone),
        Err(e) => Err(e),
    }
}

fn to_pid(pid: Option<u32>) -> Option<Pid> {
    pid.filter(|p| *p > 0)
        .and_then(|p| i32::try_from(p).ok())
        .map(Pid::from_raw)
}
