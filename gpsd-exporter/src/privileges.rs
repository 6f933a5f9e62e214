// gpsd-exporter - Prometheus exporter for gpsd telemetry
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Giving up root once the listener is bound and gpsd is reachable.

use std::io;

/// Account the exporter switches to
pub const UNPRIVILEGED_USER: &str = "nobody";
/// Group the exporter switches to
pub const UNPRIVILEGED_GROUP: &str = "nogroup";

/// What [`drop_privileges`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeOutcome {
    /// Not running as root, nothing to do
    NotRoot,
    /// Switched to the given ids
    Dropped { uid: u32, gid: u32 },
    /// Platform has no notion of it
    Unsupported,
}

/// Switch to `user:group` when running as root
///
/// Supplementary groups are cleared, then the group and user ids are set
/// and the umask is tightened to 077.
#[cfg(unix)]
pub fn drop_privileges(user: &str, group: &str) -> io::Result<PrivilegeOutcome> {
    use std::ffi::CString;

    // SAFETY: getuid has no preconditions.
    if unsafe { libc::getuid() } != 0 {
        return Ok(PrivilegeOutcome::NotRoot);
    }

    let c_user = CString::new(user).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let c_group =
        CString::new(group).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: the name is a valid C string; the returned record is read
    // before any other passwd lookup can overwrite it.
    let uid = unsafe {
        let pw = libc::getpwnam(c_user.as_ptr());
        if pw.is_null() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("unknown user {}", user),
            ));
        }
        (*pw).pw_uid
    };
    // SAFETY: as above, for the group database.
    let gid = unsafe {
        let gr = libc::getgrnam(c_group.as_ptr());
        if gr.is_null() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("unknown group {}", group),
            ));
        }
        (*gr).gr_gid
    };

    // SAFETY: plain system calls on ids obtained above; the group list is
    // empty so the null pointer is never read.
    unsafe {
        if libc::setgroups(0, std::ptr::null()) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::setgid(gid) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::setuid(uid) != 0 {
            return Err(io::Error::last_os_error());
        }
        libc::umask(0o077);
    }

    Ok(PrivilegeOutcome::Dropped {
        uid: uid as u32,
        gid: gid as u32,
    })
}

/// Switch to `user:group` when running as root
#[cfg(not(unix))]
pub fn drop_privileges(_user: &str, _group: &str) -> io::Result<PrivilegeOutcome> {
    Ok(PrivilegeOutcome::Unsupported)
}
