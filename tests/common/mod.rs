#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

pub struct Layout {
    pub dir: tempfile::TempDir,
    pub config: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
}

/// Writes a tickd config with pid and log files under `run/` and `log/`.
pub fn layout() -> Layout {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("tickd.toml");
    let pid_file = dir.path().join("run/tickd.pid");
    let log_file = dir.path().join("log/tickd.log");
    fs::write(
        &config,
        "[daemon]\npidfile = \"run/tickd.pid\"\nlogfile = \"log/tickd.log\"\nloglevel = \"debug\"\n",
    )
    .unwrap();
    Layout {
        dir,
        config,
        pid_file,
        log_file,
    }
}

pub fn tickd() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tickd"));
    cmd.env_remove("NOTIFY_SOCKET")
        .env("TICKD_INTERVAL_MS", "100");
    cmd
}

/// Polls until `pred` holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    pred()
}

pub fn read_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

pub fn is_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

/// A uid/gid pair other than our own that this process may chown to:
/// `nobody` when running as root, otherwise our uid with a supplementary
/// group that is not the effective one.
pub fn foreign_identity() -> Option<(u32, u32)> {
    let (uid, egid) = unsafe { (libc::geteuid(), libc::getegid()) };
    if uid == 0 {
        return Some((65534, 65534));
    }
    let count = unsafe { libc::getgroups(0, std::ptr::null_mut()) };
    if count <= 0 {
        return None;
    }
    let mut groups = vec![0 as libc::gid_t; count as usize];
    let count = unsafe { libc::getgroups(count, groups.as_mut_ptr()) };
    groups.truncate(count.max(0) as usize);
    groups
        .into_iter()
        .find(|gid| *gid != egid)
        .map(|gid| (uid, gid))
}
