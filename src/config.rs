//! Process configuration consumed by the core.
//!
//! The CLI layer owns option parsing; everything below it works from the
//! plain values in [`FpmConfig`].

use std::path::PathBuf;

use nix::sys::stat::{Mode, umask};

use crate::error::{FpmError, Result};

/// Longest path a unix-domain socket address can carry (sun_path minus NUL).
pub const MAX_UNIX_PATH: usize = 107;

/// Default permission bits requested for a unix socket before the umask
/// is applied: read+write for user and group.
const DEFAULT_SOCKET_MODE: u32 = 0o660;

/// Where the daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointAddr {
    /// Unix-domain socket at the given path.
    Unix(PathBuf),
    /// TCP socket; `addr` of `None` binds the wildcard address.
    Inet { addr: Option<String>, port: u16 },
}

/// A fully specified listening endpoint. Immutable once bound.
#[derive(Debug, Clone)]
pub struct EndpointSpec {
    pub addr: EndpointAddr,
    /// Permission mode applied to a unix socket after bind.
    pub mode: u32,
    /// Owner applied to a unix socket after bind; zero means "leave as is".
    pub owner_uid: u32,
    pub owner_gid: u32,
    /// Listen backlog depth.
    pub backlog: i32,
}

/// The full configuration surface of the daemon.
#[derive(Debug, Clone)]
pub struct FpmConfig {
    pub endpoint: EndpointSpec,
    /// Number of worker processes to fork.
    pub workers: usize,
    /// Request cycles a worker serves before exiting cleanly.
    pub max_executions: usize,
    /// Pid file recording spawned worker pids.
    pub pid_file: Option<PathBuf>,
    /// Privilege-drop user, as a name or numeric id.
    pub user: Option<String>,
    /// Privilege-drop group, as a name or numeric id.
    pub group: Option<String>,
    /// Socket owner user/group, defaulting to the privilege-drop identity.
    pub socket_user: Option<String>,
    pub socket_group: Option<String>,
    /// Chroot directory (root only).
    pub chroot: Option<PathBuf>,
    /// Bind the socket before entering the chroot.
    pub bind_before_chroot: bool,
    /// Working directory to change into before spawning.
    pub chdir: Option<PathBuf>,
    /// Directory receiving multipart upload temp files.
    pub upload_dir: PathBuf,
    /// Emit per-request diagnostic output from workers.
    pub verbose: bool,
}

impl FpmConfig {
    /// Validate cross-field constraints that clap cannot express.
    ///
    /// Endpoint shape errors are startup-fatal before any socket call is
    /// made, including an overlong unix socket path.
    pub fn validate(&self) -> Result<()> {
        match &self.endpoint.addr {
            EndpointAddr::Unix(path) => {
                if path.as_os_str().len() > MAX_UNIX_PATH {
                    return Err(FpmError::Config(
                        "path of the unix domain socket is too long".into(),
                    ));
                }
            }
            EndpointAddr::Inet { port, .. } => {
                if *port == 0 {
                    return Err(FpmError::Config(
                        "no socket given (use either a TCP port or a unix socket path)".into(),
                    ));
                }
            }
        }

        if self.endpoint.backlog < 0 {
            return Err(FpmError::Config("backlog must not be negative".into()));
        }

        if self.max_executions == 0 {
            return Err(FpmError::Config(
                "per-worker execution cap must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Worker count with the minimum of one enforced.
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }
}

/// Read the process umask without changing it.
fn read_umask() -> Mode {
    let mask = umask(Mode::empty());
    umask(mask);
    mask
}

/// Default unix socket mode: user/group read+write as far as the umask
/// allows it.
pub fn default_socket_mode() -> u32 {
    DEFAULT_SOCKET_MODE & !read_umask().bits()
}

/// Parse an octal mode string such as `660` or `0660`.
pub fn parse_octal_mode(s: &str) -> std::result::Result<u32, String> {
    u32::from_str_radix(s, 8).map_err(|_| format!("'{}' is not an octal mode", s))
}
