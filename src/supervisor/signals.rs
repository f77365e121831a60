//! Worker exit-status analysis.
//!
//! Classifies how a worker terminated and whether the pool respawns it.
//! Exactly one exit status is fatal to the pool; everything else,
//! including death by signal, triggers a single replacement spawn.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// The worker exit code the supervisor treats as unrecoverable.
pub const FATAL_EXIT_CODE: i32 = 1;

/// Why a worker process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// Anything waitpid reported that is neither of the above.
    Unknown,
}

impl ExitReason {
    /// A fatal exit stops the whole pool; nothing is respawned.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Exited(FATAL_EXIT_CODE))
    }

    /// The exit code to report for a fatal exit.
    pub fn code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled(sig) => 128 + *sig as i32,
            Self::Unknown => -1,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::Unknown => "terminated for an unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Analyze a `WaitStatus` to determine the termination reason.
pub fn analyze_wait_status(status: WaitStatus) -> ExitReason {
    match status {
        WaitStatus::Exited(_, code) => ExitReason::Exited(code),
        WaitStatus::Signaled(_, signal, _) => ExitReason::Signaled(signal),
        _ => ExitReason::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_clean_exit_respawns() {
        assert!(!ExitReason::Exited(0).is_fatal());
    }

    #[test]
    fn test_fatal_code_stops_pool() {
        assert!(ExitReason::Exited(FATAL_EXIT_CODE).is_fatal());
        assert!(!ExitReason::Exited(2).is_fatal());
    }

    #[test]
    fn test_signal_kill_respawns() {
        assert!(!ExitReason::Signaled(Signal::SIGKILL).is_fatal());
        assert!(!ExitReason::Signaled(Signal::SIGTERM).is_fatal());
    }

    #[test]
    fn test_analyze_wait_status() {
        let pid = Pid::from_raw(1);
        assert_eq!(
            analyze_wait_status(WaitStatus::Exited(pid, 0)),
            ExitReason::Exited(0)
        );
        assert_eq!(
            analyze_wait_status(WaitStatus::Signaled(pid, Signal::SIGSEGV, false)),
            ExitReason::Signaled(Signal::SIGSEGV)
        );
        assert_eq!(
            analyze_wait_status(WaitStatus::StillAlive),
            ExitReason::Unknown
        );
    }

    #[test]
    fn test_description_mentions_signal() {
        let desc = ExitReason::Signaled(Signal::SIGKILL).to_string();
        assert!(desc.contains("SIGKILL"));
    }
}
