//! Pid-file based mutual exclusion.
//!
//! The lock is advisory: checking for a live instance and writing our own pid
//! happen at different points of startup, so two instances started at the
//! same moment can both pass [`PidFile::check_not_running`]. Nothing here
//! tries to hide that window.

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{DaemonError, DaemonResult};
use crate::sys::unix;
use crate::types::ProcessIdentity;

/// A pid file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        PidFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the pid, `None` when the file does not exist.
    ///
    /// Contents that are not a positive decimal integer, undecodable bytes
    /// included, are reported as a corrupt pid file.
    pub fn read(&self) -> DaemonResult<Option<i32>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        std::str::from_utf8(&bytes)
            .ok()
            .and_then(parse_pid)
            .map(Some)
            .ok_or_else(|| DaemonError::CorruptPidFile {
                path: self.path.clone(),
            })
    }

    /// Fails if the pid file names a live process; reclaims a stale one.
    pub fn check_not_running(&self) -> DaemonResult<()> {
        let Some(pid) = self.read()? else {
            return Ok(());
        };

        match unix::probe(pid) {
            Ok(()) => Err(DaemonError::AlreadyRunning { pid }),
            Err(err) if err.raw_os_error() == Some(libc::ESRCH) => {
                info!(pid, path = %self.path.display(), "removing stale pidfile");
                self.remove()
            }
            Err(source) => Err(DaemonError::ProbeFailed {
                pid,
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Verifies that `identity` will be able to create or replace the pid file.
    ///
    /// An existing file is checked directly, otherwise its parent directory.
    pub fn check_writable(&self, identity: &ProcessIdentity) -> DaemonResult<()> {
        let target = if self.path.exists() {
            self.path.clone()
        } else {
            parent_dir(&self.path)
        };

        if writable_by(&target, identity) {
            Ok(())
        } else {
            Err(DaemonError::PidFileNotWritable {
                path: self.path.clone(),
            })
        }
    }

    /// Records `pid`. The file holds the bare decimal digits.
    pub fn write(&self, pid: u32) -> DaemonResult<()> {
        fs::write(&self.path, pid.to_string())?;
        debug!(pid, path = %self.path.display(), "wrote pidfile");
        Ok(())
    }

    /// Deletes the pid file; already gone is fine.
    pub fn remove(&self) -> DaemonResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Parses pid file contents. Zero and negative values are rejected: handed to
/// `kill(2)` they would address a whole process group.
pub(crate) fn parse_pid(contents: &str) -> Option<i32> {
    contents.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn writable_by(path: &Path, identity: &ProcessIdentity) -> bool {
    let (euid, egid) = unix::effective_ids();
    let uid = identity.uid.unwrap_or(euid);
    let gid = identity.gid.unwrap_or(egid);

    if (uid, gid) == (euid, egid) {
        return unix::access_writable(path);
    }

    // We are about to become someone else; judge by the permission bits.
    match fs::metadata(path) {
        Ok(meta) => mode_permits_write(meta.mode(), meta.uid(), meta.gid(), uid, gid),
        Err(_) => false,
    }
}

pub(crate) fn mode_permits_write(mode: u32, owner: u32, group: u32, uid: u32, gid: u32) -> bool {
    if uid == 0 {
        true
    } else if uid == owner {
        mode & 0o200 != 0
    } else if gid == group {
        mode & 0o020 != 0
    } else {
        mode & 0o002 != 0
    }
}
