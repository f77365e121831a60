//! Endpoint binder.
//!
//! Resolves a TCP (v4/v6) or unix-socket address, creates, permissions,
//! and listens on it. Any failure here is startup-fatal; there is no
//! retry. The returned descriptor is the only resource later shared with
//! the worker pool (by fork inheritance).

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use nix::sys::socket::{
    AddressFamily, Backlog, SockFlag, SockType, SockaddrIn, SockaddrIn6, UnixAddr, bind, connect,
    listen, setsockopt, socket, sockopt,
};
use nix::unistd::{Gid, Uid, chown};
use tracing::{debug, info};

use crate::config::{EndpointAddr, EndpointSpec};
use crate::error::{FpmError, Result};

/// The address family and literal a network endpoint resolved to.
///
/// Selection tie-break order: no address means the v4 wildcard, otherwise
/// the first syntactically valid parse wins, IPv4 before IPv6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InetAddrChoice {
    V4(SocketAddrV4),
    V6(SocketAddrV6),
}

/// Resolve a network address literal to a concrete socket address.
pub fn resolve_inet(addr: Option<&str>, port: u16) -> Result<InetAddrChoice> {
    let Some(addr) = addr else {
        return Ok(InetAddrChoice::V4(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            port,
        )));
    };

    if let Ok(v4) = addr.parse::<Ipv4Addr>() {
        return Ok(InetAddrChoice::V4(SocketAddrV4::new(v4, port)));
    }
    if let Ok(v6) = addr.parse::<Ipv6Addr>() {
        return Ok(InetAddrChoice::V6(SocketAddrV6::new(v6, port, 0, 0)));
    }

    Err(FpmError::InvalidAddress(addr.to_string()))
}

/// Check whether another instance is live on the unix socket, and clean
/// up a stale socket file.
///
/// If we simply deleted the socket file and rebound there would be no
/// "socket already in use" error, so probe with a connect first.
fn prepare_unix_path(path: &Path, addr: &UnixAddr) -> Result<()> {
    let probe = socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::empty(),
        None,
    )
    .map_err(|e| FpmError::Bind(format!("couldn't create socket: {}", e)))?;

    if connect(probe.as_raw_fd(), addr).is_ok() {
        return Err(FpmError::EndpointBusy(path.display().to_string()));
    }
    drop(probe);

    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale socket file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FpmError::Bind(format!("removing old socket failed: {}", e))),
    }
}

/// Bind and listen on the configured endpoint, returning the bound
/// descriptor.
///
/// For unix sockets, the requested mode and owner are applied between
/// `bind` and `listen`. An owner id of zero means "leave unchanged".
pub fn bind_endpoint(spec: &EndpointSpec) -> Result<OwnedFd> {
    match &spec.addr {
        EndpointAddr::Unix(path) => {
            let addr = UnixAddr::new(path.as_path())
                .map_err(|e| FpmError::Bind(format!("invalid socket path: {}", e)))?;
            prepare_unix_path(path, &addr)?;

            let fd = socket(
                AddressFamily::Unix,
                SockType::Stream,
                SockFlag::empty(),
                None,
            )
            .map_err(|e| FpmError::Bind(format!("couldn't create socket: {}", e)))?;
            setsockopt(&fd, sockopt::ReuseAddr, &true)
                .map_err(|e| FpmError::Bind(format!("couldn't set SO_REUSEADDR: {}", e)))?;
            bind(fd.as_raw_fd(), &addr)
                .map_err(|e| FpmError::Bind(format!("bind failed: {}", e)))?;

            apply_unix_socket_meta(path, spec).inspect_err(|_| {
                let _ = std::fs::remove_file(path);
            })?;

            finish_listen(fd, spec.backlog).inspect_err(|_| {
                let _ = std::fs::remove_file(path);
            })
        }
        EndpointAddr::Inet { addr, port } => {
            let choice = resolve_inet(addr.as_deref(), *port)?;
            let family = match choice {
                InetAddrChoice::V4(_) => AddressFamily::Inet,
                InetAddrChoice::V6(_) => AddressFamily::Inet6,
            };

            let fd = socket(family, SockType::Stream, SockFlag::empty(), None)
                .map_err(|e| FpmError::Bind(format!("couldn't create socket: {}", e)))?;
            setsockopt(&fd, sockopt::ReuseAddr, &true)
                .map_err(|e| FpmError::Bind(format!("couldn't set SO_REUSEADDR: {}", e)))?;
            match choice {
                InetAddrChoice::V4(sa) => bind(fd.as_raw_fd(), &SockaddrIn::from(sa)),
                InetAddrChoice::V6(sa) => bind(fd.as_raw_fd(), &SockaddrIn6::from(sa)),
            }
            .map_err(|e| FpmError::Bind(format!("bind failed: {}", e)))?;

            finish_listen(fd, spec.backlog)
        }
    }
}

/// Apply the requested mode and owner to a freshly bound unix socket.
fn apply_unix_socket_meta(path: &Path, spec: &EndpointSpec) -> Result<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(spec.mode))
        .map_err(|e| FpmError::Bind(format!("couldn't chmod socket: {}", e)))?;

    if spec.owner_uid != 0 || spec.owner_gid != 0 {
        let uid = (spec.owner_uid != 0).then(|| Uid::from_raw(spec.owner_uid));
        let gid = (spec.owner_gid != 0).then(|| Gid::from_raw(spec.owner_gid));
        chown(path, uid, gid)
            .map_err(|e| FpmError::Bind(format!("couldn't chown socket: {}", e)))?;
    }
    Ok(())
}

fn finish_listen(fd: OwnedFd, backlog: i32) -> Result<OwnedFd> {
    let backlog =
        Backlog::new(backlog).map_err(|e| FpmError::Bind(format!("invalid backlog: {}", e)))?;
    listen(&fd, backlog).map_err(|e| FpmError::Bind(format!("listen failed: {}", e)))?;
    info!(fd = fd.as_raw_fd(), "endpoint bound and listening");
    Ok(fd)
}
