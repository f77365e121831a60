//! Worker process supervision.
//!
//! The supervisor forks a configured number of workers sharing the bound
//! listening descriptor, tracks each child, and keeps the pool size
//! constant by respawning on non-fatal exits. The parent process is the
//! sole mutator of the pool state; workers share nothing with each other
//! beyond the inherited descriptor.
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │    Supervisor    │
//!                  │ (wait-for-child) │
//!                  └────────┬─────────┘
//!            fork, inherit  │  listening fd
//!            ┌──────────────┼──────────────┐
//!      ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!      │ Worker 1  │  │ Worker 2  │  │ Worker N  │
//!      │ (process) │  │ (process) │  │ (process) │
//!      └───────────┘  └───────────┘  └───────────┘
//! ```

mod pidfile;
mod pool;
mod signals;
mod spawn;

pub use pidfile::PidFile;
pub use pool::{Supervisor, WorkerRecord};
pub use signals::{ExitReason, FATAL_EXIT_CODE, analyze_wait_status};
pub use spawn::{LISTENSOCK_FILENO, daemonize, spawn_worker};
