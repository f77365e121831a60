//! Worker process spawning.
//!
//! Workers are forked, not exec'd: the child inherits the bound
//! listening descriptor, moves it onto the well-known listener slot,
//! detaches from the terminal, silences stdout/stderr, and enters the
//! worker loop, never returning. The parent gives the child a brief
//! grace period and probes it non-blockingly; a child that already died
//! counts as a spawn failure.

use std::fs::File;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, dup2, fork, setsid};
use tracing::{info, warn};

use crate::error::{FpmError, Result};

use super::signals::analyze_wait_status;

/// The descriptor slot the transport expects the listening socket on.
pub const LISTENSOCK_FILENO: RawFd = 0;

/// Grace period before probing a fresh child.
const SPAWN_GRACE: Duration = Duration::from_millis(100);

/// Move the listening descriptor onto [`LISTENSOCK_FILENO`], detach from
/// the controlling terminal, silence stdout/stderr, and close unrelated
/// descriptors. Runs in the child, before the worker loop.
fn child_setup(listener: &OwnedFd) -> Result<()> {
    let listen_fd = listener.as_raw_fd();
    if listen_fd != LISTENSOCK_FILENO {
        dup2(listen_fd, LISTENSOCK_FILENO)?;
    }

    setsid()?;

    match File::options().read(true).write(true).open("/dev/null") {
        Ok(null) => {
            let null_fd = null.as_raw_fd();
            if null_fd != 1 {
                dup2(null_fd, 1)?;
            }
            if null_fd != 2 {
                dup2(null_fd, 2)?;
            }
            // Close descriptors between the stdio slots and the null fd;
            // the worker only needs the listener slot.
            for fd in 3..null_fd {
                if fd != LISTENSOCK_FILENO && fd != listen_fd {
                    drop(unsafe { OwnedFd::from_raw_fd(fd) });
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "couldn't redirect stdout/stderr to /dev/null");
        }
    }

    Ok(())
}

/// Fork one worker.
///
/// The child runs `child_setup` and then `worker_entry`, exiting with
/// its return value; it never returns here. The parent waits briefly and
/// probes the child: an already-exited child is a spawn failure.
pub fn spawn_worker<F>(listener: &OwnedFd, worker_entry: &F) -> Result<Pid>
where
    F: Fn() -> i32,
{
    // Safety: the child only calls async-signal-safe-ish setup before
    // taking over the process with the worker loop; the parent side is
    // unaffected.
    match unsafe { fork() }.map_err(|e| FpmError::Spawn(format!("fork failed: {}", e)))? {
        ForkResult::Child => {
            let code = match child_setup(listener) {
                Ok(()) => worker_entry(),
                Err(_) => 1,
            };
            std::process::exit(code);
        }
        ForkResult::Parent { child } => {
            std::thread::sleep(SPAWN_GRACE);

            match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {
                    info!(pid = %child, "worker spawned successfully");
                    Ok(child)
                }
                Ok(status) => {
                    let reason = analyze_wait_status(status);
                    Err(FpmError::Spawn(format!(
                        "worker {} died during startup: {}",
                        child, reason
                    )))
                }
                Err(e) => Err(FpmError::Spawn(format!("waitpid failed: {}", e))),
            }
        }
    }
}

/// Detach the supervisor from its terminal before the pool is spawned:
/// stdio onto /dev/null, fork, parent exits, child becomes session
/// leader.
pub fn daemonize() -> Result<()> {
    let null = File::options().read(true).write(true).open("/dev/null")?;
    let null_fd = null.as_raw_fd();
    for stdio in 0..=2 {
        if null_fd != stdio {
            dup2(null_fd, stdio)?;
        }
    }
    drop(null);

    match unsafe { fork() }.map_err(|e| FpmError::Spawn(format!("fork failed: {}", e)))? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {
            setsid()?;
            Ok(())
        }
    }
}
