use crate::error::{DaemonError, DaemonResult};
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

/// File-creation mask applied by [`detach`].
pub(crate) const DAEMON_UMASK: libc::mode_t = 0o077;

/// Largest scratch buffer handed to `getpwnam_r` / `getgrnam_r`.
const MAX_LOOKUP_BUFFER: usize = 1 << 20;

// =========================================================================
// Detachment
// =========================================================================

/// Double-Fork to detach from the controlling terminal.
///
/// Only the grandchild returns from this function. The original process and
/// the intermediate session leader leave through `_exit(0)` so that no
/// destructors or atexit handlers run twice.
pub(crate) fn detach() -> DaemonResult<()> {
    unsafe {
        // Fork 1
        if perform_fork()? > 0 {
            libc::_exit(0);
        }

        // New Session
        if libc::setsid() < 0 {
            return Err(DaemonError::last_syscall("setsid"));
        }

        // Fork 2: the session leader exits so we can never reacquire a terminal
        if perform_fork()? > 0 {
            libc::_exit(0);
        }

        libc::umask(DAEMON_UMASK);
        redirect_to_devnull()
    }
}

unsafe fn perform_fork() -> DaemonResult<libc::pid_t> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        Err(DaemonError::last_syscall("fork"))
    } else {
        Ok(pid)
    }
}

unsafe fn redirect_to_devnull() -> DaemonResult<()> {
    let fd = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDWR) };
    if fd < 0 {
        return Err(DaemonError::Io(io::Error::last_os_error()));
    }

    for target_fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if unsafe { libc::dup2(fd, target_fd) } < 0 {
            let err = io::Error::last_os_error();
            // The descriptor may already be closed.
            if err.raw_os_error() != Some(libc::EBADF) {
                unsafe { libc::close(fd) };
                return Err(DaemonError::Io(err));
            }
        }
    }

    if fd > libc::STDERR_FILENO {
        unsafe { libc::close(fd) };
    }
    Ok(())
}

// =========================================================================
// Signals
// =========================================================================

pub(crate) fn send_signal(pid: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    if unsafe { libc::kill(pid, signal) } < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Zero-effect liveness probe. `ESRCH` means the process is gone.
pub(crate) fn probe(pid: libc::pid_t) -> io::Result<()> {
    send_signal(pid, 0)
}

// =========================================================================
// Identity
// =========================================================================

pub(crate) fn effective_ids() -> (u32, u32) {
    unsafe { (libc::geteuid(), libc::getegid()) }
}

pub(crate) fn set_group(gid: u32) -> io::Result<()> {
    if unsafe { libc::setgid(gid) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn set_user(uid: u32) -> io::Result<()> {
    if unsafe { libc::setuid(uid) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Looks `name` up in the password database.
pub(crate) fn lookup_user(name: &str) -> io::Result<Option<u32>> {
    let cname = c_name(name)?;
    let mut buf: Vec<libc::c_char> = vec![0; 1024];
    loop {
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = ptr::null_mut();
        let rc = unsafe {
            libc::getpwnam_r(
                cname.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        match rc {
            0 if result.is_null() => return Ok(None),
            0 => return Ok(Some(pwd.pw_uid)),
            libc::ERANGE if buf.len() < MAX_LOOKUP_BUFFER => buf.resize(buf.len() * 2, 0),
            rc if is_not_found(rc) => return Ok(None),
            rc => return Err(io::Error::from_raw_os_error(rc)),
        }
    }
}

/// Looks `name` up in the group database.
pub(crate) fn lookup_group(name: &str) -> io::Result<Option<u32>> {
    let cname = c_name(name)?;
    let mut buf: Vec<libc::c_char> = vec![0; 1024];
    loop {
        let mut grp: libc::group = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::group = ptr::null_mut();
        let rc = unsafe {
            libc::getgrnam_r(
                cname.as_ptr(),
                &mut grp,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        match rc {
            0 if result.is_null() => return Ok(None),
            0 => return Ok(Some(grp.gr_gid)),
            libc::ERANGE if buf.len() < MAX_LOOKUP_BUFFER => buf.resize(buf.len() * 2, 0),
            rc if is_not_found(rc) => return Ok(None),
            rc => return Err(io::Error::from_raw_os_error(rc)),
        }
    }
}

// getpwnam_r(3): these all mean "the given name was not found".
fn is_not_found(rc: libc::c_int) -> bool {
    matches!(rc, libc::ENOENT | libc::ESRCH | libc::EBADF | libc::EPERM)
}

fn c_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "name contains a NUL byte")
    })
}

// =========================================================================
// Files
// =========================================================================

/// `access(path, W_OK)` for the real uid/gid of the calling process.
pub(crate) fn access_writable(path: &Path) -> bool {
    let Ok(cpath) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(cpath.as_ptr(), libc::W_OK) == 0 }
}
