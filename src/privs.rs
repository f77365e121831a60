//! Privilege manager.
//!
//! Resolves user/group identities and drops privileges in a fixed order:
//! group first (the group database may live outside a chroot), then the
//! optional chroot, then the final uid drop. The caller sequences the
//! socket bind before or after the chroot step; that choice is explicit
//! configuration, never inferred.

use std::ffi::CString;
use std::path::Path;

use nix::unistd::{
    Gid, Group, Uid, User, chdir, chroot, getegid, geteuid, getgid, getuid, initgroups, setgid,
    setgroups, setuid,
};
use tracing::{info, warn};

use crate::error::{FpmError, Result};

/// A resolved privilege-drop identity.
///
/// A zero uid or gid means "nothing requested" for that half; resolution
/// refuses to produce root ids for anything the caller explicitly asked
/// to drop to.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub uid: Uid,
    pub gid: Gid,
    /// Known user name, used to initialize supplementary groups.
    pub username: Option<String>,
}

/// Resolve a user and group specification into concrete ids.
///
/// Each spec is tried as a numeric id first, then as a database name.
/// When only a user is given, its primary group is used. An explicit or
/// resolved id of zero is rejected.
pub fn resolve(user: Option<&str>, group: Option<&str>) -> Result<Credentials> {
    let mut creds = Credentials {
        uid: Uid::from_raw(0),
        gid: Gid::from_raw(0),
        username: None,
    };

    let mut primary_gid: Option<Gid> = None;

    if let Some(user) = user {
        match user.parse::<u32>() {
            Ok(0) => {
                return Err(FpmError::Privilege("will not set uid to 0".into()));
            }
            Ok(id) => {
                creds.uid = Uid::from_raw(id);
                // Best effort: learn the name and primary group for
                // initgroups and the group default.
                if let Ok(Some(pw)) = User::from_uid(creds.uid) {
                    creds.username = Some(pw.name);
                    primary_gid = Some(pw.gid);
                }
            }
            Err(_) => {
                let pw = User::from_name(user)
                    .map_err(|e| FpmError::Privilege(format!("user lookup failed: {}", e)))?
                    .ok_or_else(|| {
                        FpmError::Privilege(format!("can't find user name {}", user))
                    })?;
                if pw.uid.is_root() {
                    return Err(FpmError::Privilege("will not set uid to 0".into()));
                }
                creds.uid = pw.uid;
                primary_gid = Some(pw.gid);
                creds.username = Some(user.to_string());
            }
        }
    }

    if let Some(group) = group {
        match group.parse::<u32>() {
            Ok(0) => {
                return Err(FpmError::Privilege("will not set gid to 0".into()));
            }
            Ok(id) => creds.gid = Gid::from_raw(id),
            Err(_) => {
                let gr = Group::from_name(group)
                    .map_err(|e| FpmError::Privilege(format!("group lookup failed: {}", e)))?
                    .ok_or_else(|| {
                        FpmError::Privilege(format!("can't find group name {}", group))
                    })?;
                if gr.gid.as_raw() == 0 {
                    return Err(FpmError::Privilege("will not set gid to 0".into()));
                }
                creds.gid = gr.gid;
            }
        }
    } else if let Some(gid) = primary_gid {
        if gid.as_raw() == 0 {
            return Err(FpmError::Privilege("will not set gid to 0".into()));
        }
        creds.gid = gid;
    }

    if !creds.uid.is_root() && creds.gid.as_raw() == 0 && user.is_some() {
        warn!(
            uid = creds.uid.as_raw(),
            "couldn't find the user's group and no group was specified; \
             only the user privileges will be dropped"
        );
    }

    Ok(creds)
}

/// Drop the group half of the credentials: set the gid, clear
/// supplementary groups, and initialize them from the user database when
/// the user name is known.
pub fn drop_group(creds: &Credentials) -> Result<()> {
    if creds.gid.as_raw() == 0 {
        return Ok(());
    }

    setgid(creds.gid).map_err(|e| {
        FpmError::Privilege(format!("setgid({}) failed: {}", creds.gid.as_raw(), e))
    })?;
    setgroups(&[]).map_err(|e| FpmError::Privilege(format!("setgroups failed: {}", e)))?;

    if let Some(name) = &creds.username {
        let cname = CString::new(name.as_str())
            .map_err(|_| FpmError::Privilege("user name contains a NUL byte".into()))?;
        initgroups(&cname, creds.gid).map_err(|e| {
            FpmError::Privilege(format!("initgroups('{}', {}) failed: {}", name, creds.gid, e))
        })?;
    }

    info!(gid = creds.gid.as_raw(), "dropped group privileges");
    Ok(())
}

/// Drop the user half of the credentials.
pub fn drop_user(creds: &Credentials) -> Result<()> {
    if creds.uid.is_root() {
        return Ok(());
    }
    setuid(creds.uid).map_err(|e| {
        FpmError::Privilege(format!("setuid({}) failed: {}", creds.uid.as_raw(), e))
    })?;
    info!(uid = creds.uid.as_raw(), "dropped user privileges");
    Ok(())
}

/// Enter a chroot jail and move to its root.
pub fn enter_chroot(dir: &Path) -> Result<()> {
    chroot(dir).map_err(|e| {
        FpmError::Privilege(format!("chroot('{}') failed: {}", dir.display(), e))
    })?;
    chdir("/").map_err(|e| FpmError::Privilege(format!("chdir('/') failed: {}", e)))?;
    info!(dir = %dir.display(), "entered chroot");
    Ok(())
}

/// True when the process runs with real root privileges.
pub fn is_root() -> bool {
    getuid().is_root()
}

/// True when effective and real ids differ, i.e. the binary was started
/// set-uid or set-gid. Running that way is refused at startup.
pub fn is_setugid() -> bool {
    geteuid() != getuid() || getegid() != getgid()
}
