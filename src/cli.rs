//! Command-line interface definitions using clap.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{self, EndpointAddr, EndpointSpec, FpmConfig};
use crate::error::{FpmError, Result};

/// FastCGI-style process manager for script execution engines.
#[derive(Parser, Debug)]
#[command(name = "fpmd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Bind to an IPv4/IPv6 address (defaults to the wildcard address).
    #[arg(short = 'a', long)]
    pub address: Option<String>,

    /// Bind to a TCP port.
    #[arg(short = 'p', long, conflicts_with = "socket")]
    pub port: Option<u16>,

    /// Bind to a unix domain socket at this path.
    #[arg(short = 's', long)]
    pub socket: Option<PathBuf>,

    /// Unix socket mode as an octal integer (default: rw for user and
    /// group as far as the umask allows it).
    #[arg(short = 'M', long, value_parser = config::parse_octal_mode)]
    pub socket_mode: Option<u32>,

    /// Change the unix socket owner to this user (root only).
    #[arg(short = 'U', long)]
    pub socket_user: Option<String>,

    /// Change the unix socket group to this group (root only).
    #[arg(short = 'G', long)]
    pub socket_group: Option<String>,

    /// Number of worker processes to fork.
    #[arg(short = 'F', long, default_value_t = 1)]
    pub workers: usize,

    /// Backlog to allow on the socket.
    #[arg(short = 'b', long, default_value_t = 1024)]
    pub backlog: i32,

    /// Name of the pid file for spawned worker processes.
    #[arg(short = 'P', long)]
    pub pid_file: Option<PathBuf>,

    /// Maximum number of request cycles per worker before it is recycled.
    #[arg(short = 'e', long, default_value_t = 1000)]
    pub max_executions: usize,

    /// Change to this user id after binding (root only).
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Change to this group id; defaults to the user's primary group
    /// (root only).
    #[arg(short = 'g', long)]
    pub group: Option<String>,

    /// Chroot to this directory before spawning (root only).
    #[arg(short = 'c', long)]
    pub chroot: Option<PathBuf>,

    /// Create the socket before chroot() instead of inside the chroot.
    #[arg(short = 'S', long)]
    pub bind_before_chroot: bool,

    /// Chdir to this directory before spawning.
    #[arg(short = 'd', long)]
    pub chdir: Option<PathBuf>,

    /// Directory receiving multipart upload temp files.
    #[arg(long, env = "FPMD_UPLOAD_DIR", default_value = "/var/tmp")]
    pub upload_dir: PathBuf,

    /// Enable verbose output (-v for debug, -vv for trace); workers also
    /// emit per-request diagnostics.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Turn parsed arguments into the plain configuration the core
    /// consumes, enforcing the endpoint choice.
    pub fn into_config(self) -> Result<FpmConfig> {
        let addr = match (self.socket, self.port) {
            (Some(path), None) => EndpointAddr::Unix(path),
            (None, Some(port)) => EndpointAddr::Inet {
                addr: self.address,
                port,
            },
            (None, None) => {
                return Err(FpmError::Config(
                    "no socket given (use either a TCP port or a unix socket path)".into(),
                ));
            }
            // clap's conflicts_with already rejects this; keep the check
            // for non-clap callers.
            (Some(_), Some(_)) => {
                return Err(FpmError::Config(
                    "either a unix domain socket or a TCP port, but not both".into(),
                ));
            }
        };

        let config = FpmConfig {
            endpoint: EndpointSpec {
                addr,
                mode: self.socket_mode.unwrap_or_else(config::default_socket_mode),
                owner_uid: 0,
                owner_gid: 0,
                backlog: self.backlog,
            },
            workers: self.workers,
            max_executions: self.max_executions,
            pid_file: self.pid_file,
            user: self.user,
            group: self.group,
            socket_user: self.socket_user,
            socket_group: self.socket_group,
            chroot: self.chroot,
            bind_before_chroot: self.bind_before_chroot,
            chdir: self.chdir,
            upload_dir: self.upload_dir,
            verbose: self.verbose > 0,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_tcp_endpoint() {
        let cli = Cli::parse_from(["fpmd", "-p", "9000", "-F", "4"]);
        let config = cli.into_config().unwrap();
        assert_eq!(
            config.endpoint.addr,
            EndpointAddr::Inet {
                addr: None,
                port: 9000
            }
        );
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn test_cli_parses_unix_endpoint() {
        let cli = Cli::parse_from(["fpmd", "-s", "/run/fpmd.sock", "-M", "600"]);
        let config = cli.into_config().unwrap();
        assert_eq!(
            config.endpoint.addr,
            EndpointAddr::Unix(PathBuf::from("/run/fpmd.sock"))
        );
        assert_eq!(config.endpoint.mode, 0o600);
    }

    #[test]
    fn test_cli_requires_an_endpoint() {
        let cli = Cli::parse_from(["fpmd"]);
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn test_cli_rejects_both_endpoints() {
        // conflicts_with makes this a parse error, not a config error
        assert!(Cli::try_parse_from(["fpmd", "-p", "9000", "-s", "/run/x.sock"]).is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["fpmd", "-p", "9000"]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.workers, 1);
        assert_eq!(config.max_executions, 1000);
        assert_eq!(config.endpoint.backlog, 1024);
        assert!(!config.verbose);
        assert!(!config.bind_before_chroot);
    }
}
