//! The worker pool supervisor.
//!
//! The supervisor owns the pool state and is its sole mutator: workers
//! are added on spawn and removed when reaped. Its only suspension point
//! is the wait-for-any-child call. A worker exiting with the fatal
//! status stops the pool; any other exit, including death by signal,
//! triggers exactly one replacement spawn, indefinitely.

use std::collections::BTreeMap;
use std::os::fd::OwnedFd;
use std::time::SystemTime;

use nix::errno::Errno;
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use tracing::{error, info, warn};

use crate::error::{FpmError, Result};

use super::pidfile::PidFile;
use super::signals::analyze_wait_status;
use super::spawn::spawn_worker;

/// Supervisor-owned record of one live worker.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub spawned_at: SystemTime,
}

/// Supervises a pool of forked worker processes sharing one listening
/// descriptor.
pub struct Supervisor<F>
where
    F: Fn() -> i32,
{
    listener: OwnedFd,
    pid_file: Option<PidFile>,
    workers: BTreeMap<Pid, WorkerRecord>,
    worker_entry: F,
}

impl<F> Supervisor<F>
where
    F: Fn() -> i32,
{
    pub fn new(listener: OwnedFd, pid_file: Option<PidFile>, worker_entry: F) -> Self {
        Self {
            listener,
            pid_file,
            workers: BTreeMap::new(),
            worker_entry,
        }
    }

    /// Number of live workers.
    pub fn pool_size(&self) -> usize {
        self.workers.len()
    }

    /// Spawn one worker and record it.
    fn spawn_one(&mut self) -> Result<()> {
        let pid = spawn_worker(&self.listener, &self.worker_entry)?;
        self.workers.insert(
            pid,
            WorkerRecord {
                spawned_at: SystemTime::now(),
            },
        );
        if let Some(pid_file) = &mut self.pid_file {
            // A pid file that stops being writable is worth a warning,
            // not a dead pool.
            if let Err(e) = pid_file.append(pid) {
                warn!(error = %e, "disabling pid file");
                self.pid_file = None;
            }
        }
        Ok(())
    }

    /// Bring the pool up to the configured size.
    pub fn spawn_initial(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.spawn_one()?;
        }
        info!(workers = self.pool_size(), "worker pool started");
        Ok(())
    }

    /// Supervise until a fatal condition.
    ///
    /// Blocks in wait-for-any-child; classifies each exit and keeps the
    /// pool size constant for non-fatal exits. Returns an error for a
    /// fatal worker exit or a failed replacement spawn; the caller
    /// terminates the service with a nonzero status.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let status = match waitpid(None::<Pid>, None) {
                Ok(status) => status,
                Err(Errno::ECHILD) => {
                    // No children left to wait for; with indefinite
                    // respawn this only happens when the pool was empty
                    // to begin with.
                    warn!("no worker children left");
                    return Ok(());
                }
                Err(e) => return Err(FpmError::Spawn(format!("waitpid failed: {}", e))),
            };

            let Some(pid) = status.pid() else {
                continue;
            };
            let record = self.workers.remove(&pid);
            let reason = analyze_wait_status(status);

            if record.is_none() {
                // Not one of ours (e.g. a reparented grandchild); reap
                // and move on.
                continue;
            }

            if reason.is_fatal() {
                error!(%pid, %reason, "worker exited fatally; stopping the pool");
                return Err(FpmError::WorkerFatal {
                    pid: pid.as_raw(),
                    status: reason.code(),
                });
            }

            info!(%pid, %reason, "worker exited; spawning replacement");
            self.spawn_one()?;
        }
    }
}
