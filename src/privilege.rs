//! Identity resolution, privilege drop and ownership fixes.

use std::os::unix::fs::MetadataExt;
use std::path::Path;

use tracing::{debug, error};

use crate::error::{DaemonError, DaemonResult};
use crate::sys::unix;
use crate::types::{Group, IdSpec, ProcessIdentity, User};

/// Resolves the configured user and group to numeric ids.
///
/// Must be called before anything touches process state: an unknown name is
/// reported here so the daemon fails while it still has a terminal.
pub fn resolve_identity(user: &User, group: &Group) -> DaemonResult<ProcessIdentity> {
    let uid = match user.spec() {
        IdSpec::Unchanged => None,
        IdSpec::Numeric(uid) => Some(uid),
        IdSpec::Name(name) => Some(
            unix::lookup_user(name)?.ok_or_else(|| DaemonError::UnknownUser(name.to_owned()))?,
        ),
    };
    let gid = match group.spec() {
        IdSpec::Unchanged => None,
        IdSpec::Numeric(gid) => Some(gid),
        IdSpec::Name(name) => Some(
            unix::lookup_group(name)?.ok_or_else(|| DaemonError::UnknownGroup(name.to_owned()))?,
        ),
    };
    Ok(ProcessIdentity::new(uid, gid))
}

/// Switches the process to `identity`, group first.
///
/// Once the uid is dropped the process can no longer change its group, so
/// the order matters. Failures are logged and the daemon carries on with
/// whatever privileges it has; see DESIGN.md for why this stays non-fatal.
pub fn drop_privileges(identity: &ProcessIdentity) {
    if let Some(gid) = identity.gid {
        match unix::set_group(gid) {
            Ok(()) => debug!(gid, "dropped group privileges"),
            Err(err) => error!(gid, "setgid failed: {err}"),
        }
    }
    if let Some(uid) = identity.uid {
        match unix::set_user(uid) {
            Ok(()) => debug!(uid, "dropped user privileges"),
            Err(err) => error!(uid, "setuid failed: {err}"),
        }
    }
}

/// Hands `path` over to `identity`.
///
/// An unset half keeps the file's current owner or group. Failure is fatal
/// because the daemon could not write to the path after dropping privileges.
pub fn fix_ownership(path: &Path, identity: &ProcessIdentity) -> DaemonResult<()> {
    if identity.is_unchanged() {
        return Ok(());
    }

    let meta = std::fs::metadata(path)?;
    let uid = identity.uid.unwrap_or_else(|| meta.uid());
    let gid = identity.gid.unwrap_or_else(|| meta.gid());

    std::os::unix::fs::chown(path, Some(uid), Some(gid)).map_err(|source| DaemonError::Chown {
        path: path.to_path_buf(),
        uid,
        gid,
        source,
    })?;
    debug!(path = %path.display(), uid, gid, "fixed ownership");
    Ok(())
}
