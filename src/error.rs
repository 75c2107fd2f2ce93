use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Boxed error returned by task hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while starting, running or stopping a daemon.
///
/// The `Display` form of every variant is the single line printed before a
/// non-zero exit, so messages are written for an operator reading a terminal.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Standard IO errors (directory creation, pid file access, ...)
    #[error("{0}")]
    Io(#[from] io::Error),

    /// The configuration file is missing or cannot be parsed.
    #[error("{0}")]
    Config(String),

    /// A user name is not present in the password database.
    #[error("user is not in password database: {0}")]
    UnknownUser(String),

    /// A group name is not present in the group database.
    #[error("group is not in group database: {0}")]
    UnknownGroup(String),

    /// The pid file exists but does not hold a decimal pid.
    #[error("pidfile {} contains a non-integer value", path.display())]
    CorruptPidFile { path: PathBuf },

    /// The pid file names a process that is still alive.
    #[error("another instance seems to be running (pid {pid}), exiting")]
    AlreadyRunning { pid: i32 },

    /// Probing the process named in the pid file failed for a reason other than ESRCH.
    #[error("failed to check status of process {pid} from pidfile {}: {source}", path.display())]
    ProbeFailed {
        pid: i32,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The daemon identity cannot write the pid file location.
    #[error("unable to write to pidfile {}", path.display())]
    PidFileNotWritable { path: PathBuf },

    /// Changing the owner of a file created as root failed.
    #[error("can't chown({}, {uid}, {gid}): {source}", path.display())]
    Chown {
        path: PathBuf,
        uid: u32,
        gid: u32,
        #[source]
        source: io::Error,
    },

    /// `stop` found no pid file.
    #[error("not running")]
    NotRunning,

    /// `stop` signalled the process but it outlived the polling budget.
    #[error("pid {pid} did not die")]
    DidNotDie { pid: i32 },

    /// The log sink could not be created.
    #[error("failed to initialize logging: {0}")]
    Logging(String),

    /// A task hook returned an error.
    #[error("{0}")]
    Task(BoxError),

    /// (Unix) Specific system call failure (fork, setsid).
    #[error("syscall '{call}' failed with errno {errno}")]
    SyscallError { call: &'static str, errno: i32 },
}

impl DaemonError {
    pub(crate) fn last_syscall(call: &'static str) -> Self {
        DaemonError::SyscallError {
            call,
            errno: io::Error::last_os_error().raw_os_error().unwrap_or(0),
        }
    }
}

/// A specialized Result type for daemon_keeper operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Result type of the task hooks.
pub type TaskResult = Result<(), BoxError>;
