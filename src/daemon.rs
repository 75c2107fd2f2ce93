use std::fmt;
use std::path::Path;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info, warn};

use crate::cli::{Action, Cli};
use crate::config::{DaemonConfig, DEFAULT_SECTION};
use crate::error::{DaemonError, DaemonResult, TaskResult};
use crate::logging::LogContext;
use crate::pidfile::PidFile;
use crate::privilege::{drop_privileges, fix_ownership};
use crate::shutdown::{Shutdown, SignalRegistration};
use crate::sys::unix;

/// Delay between liveness probes while waiting for a stopped daemon to exit.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Liveness probes before `stop` gives up.
pub const STOP_POLL_ATTEMPTS: u32 = 10;

/// The work a daemon does, split along the privilege boundary.
///
/// The controller calls the hooks in order: `setup_root` while still holding
/// the starting user's privileges, `setup_user` after the drop, `run` after
/// detaching. Both setup hooks run with the terminal attached, so their
/// failures reach the operator.
pub trait Task {
    /// Setup that needs the starting privileges (binding low ports, opening
    /// root-owned files). Logging is not initialized yet.
    fn setup_root(&mut self) -> TaskResult {
        Ok(())
    }

    /// Setup done as the daemon identity, before detaching.
    fn setup_user(&mut self) -> TaskResult {
        Ok(())
    }

    /// Main loop. Return once `shutdown` is requested; returning `Ok` is a
    /// clean stop, returning `Err` is logged and propagated.
    fn run(&mut self, shutdown: &Shutdown) -> TaskResult;
}

/// Lifecycle controller: drives a [`Task`] through start or stop.
pub struct Daemon<T> {
    config: DaemonConfig,
    task: T,
    logging: LogContext,
}

impl<T> fmt::Debug for Daemon<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Daemon")
            .field("config", &self.config)
            .field("logging", &self.logging.is_initialized())
            .finish_non_exhaustive()
    }
}

impl<T: Task> Daemon<T> {
    pub fn new(config: DaemonConfig, task: T) -> Self {
        Daemon {
            config,
            task,
            logging: LogContext::new(),
        }
    }

    /// Builds a controller from parsed arguments, loading the config file
    /// named by `-c` or `default_conf`.
    pub fn from_cli(task: T, cli: &Cli, default_conf: &Path) -> DaemonResult<Self> {
        let path = cli.config.as_deref().unwrap_or(default_conf);
        let config = DaemonConfig::load(path, DEFAULT_SECTION)?.daemonize(!cli.nodaemon);
        Ok(Daemon::new(config, task))
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Runs the requested action.
    pub fn execute(self, action: Action) -> DaemonResult<()> {
        match action {
            Action::Start => self.start().map(drop),
            Action::Stop => self.stop(),
        }
    }

    /// Starts the daemon and blocks until the task's main loop returns.
    ///
    /// When daemonizing, the calling process and the intermediate child exit
    /// inside this call; only the detached grandchild returns. The task is
    /// handed back after a clean stop.
    ///
    /// SIGTERM and SIGINT are caught for the duration of the call. After it
    /// returns they stay caught with no action attached, so they are ignored
    /// rather than fatal; a host process that keeps running must install its
    /// own handling if it wants them back.
    pub fn start(mut self) -> DaemonResult<T> {
        let pid_file = self.config.pid_file.clone().map(PidFile::new);

        // Don't proceed if another instance is already running.
        if let Some(pid_file) = &pid_file {
            pid_file.check_not_running()?;
        }

        let shutdown = Shutdown::new();
        let _signals = SignalRegistration::register(&shutdown)?;

        if let Err(err) = self.prepare(pid_file.as_ref()) {
            if self.logging.is_initialized() {
                error!("failed to start: {err}");
            }
            return Err(err);
        }

        // Only now is the pid of the long-running process known.
        if let Some(pid_file) = &pid_file {
            if let Err(err) = pid_file.write(std::process::id()) {
                error!("failed to write pidfile: {err}");
                return Err(err);
            }
        }
        let guard = RunGuard {
            pid_file: pid_file.as_ref(),
        };

        notify_ready();
        info!("started");

        let result = match self.task.run(&shutdown) {
            Ok(()) => {
                if shutdown.is_requested() {
                    debug!("shutdown requested");
                }
                Ok(())
            }
            Err(err) => {
                error!("stopping with an error: {err}");
                Err(DaemonError::Task(err))
            }
        };

        drop(guard);
        result.map(|()| self.task)
    }

    // Steps between the signal handler and the pid file, in the order the
    // daemon needs them: directories exist before root setup, logging is up
    // before anything that may fail late, and the writability check runs
    // while the failure can still reach a terminal.
    fn prepare(&mut self, pid_file: Option<&PidFile>) -> DaemonResult<()> {
        let identity = self.config.identity;

        self.prepare_dirs()?;

        self.task.setup_root().map_err(DaemonError::Task)?;

        self.logging.init(&self.config.log)?;
        if let Some(log_file) = &self.config.log.file {
            fix_ownership(log_file, &identity)?;
        }

        if let Some(pid_file) = pid_file {
            pid_file.check_writable(&identity)?;
        }

        if !identity.is_unchanged() {
            drop_privileges(&identity);
        }

        self.task.setup_user().map_err(DaemonError::Task)?;

        if self.config.daemonize {
            if under_systemd() {
                info!("NOTIFY_SOCKET set, staying in the foreground");
            } else {
                unix::detach()?;
            }
        }
        Ok(())
    }

    /// Creates missing parent directories of the pid and log files and hands
    /// them to the daemon identity.
    fn prepare_dirs(&self) -> DaemonResult<()> {
        let files = [self.config.pid_file.as_deref(), self.config.log.file.as_deref()];
        for file in files.into_iter().flatten() {
            let Some(parent) = file.parent() else {
                continue;
            };
            if parent.as_os_str().is_empty() || parent.exists() {
                continue;
            }
            std::fs::create_dir_all(parent)?;
            fix_ownership(parent, &self.config.identity)?;
        }
        Ok(())
    }

    /// Signals the running instance and waits for it to exit.
    pub fn stop(&self) -> DaemonResult<()> {
        match self.config.pid_file() {
            Some(path) => stop(path),
            None => Err(DaemonError::NotRunning),
        }
    }
}

/// Removes the pid file and writes the final log line on every way out of
/// the main loop, unwinding included.
struct RunGuard<'a> {
    pid_file: Option<&'a PidFile>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        notify_stopping();
        if let Some(pid_file) = self.pid_file {
            if let Err(err) = pid_file.remove() {
                warn!("failed to remove pidfile {}: {err}", pid_file.path().display());
            }
        }
        info!("stopped");
    }
}

/// Sends SIGTERM to the pid recorded in `pid_file` and waits for it to die.
///
/// Polls every [`STOP_POLL_INTERVAL`], [`STOP_POLL_ATTEMPTS`] times. The pid
/// file itself is left for the exiting daemon to remove.
pub fn stop(pid_file: &Path) -> DaemonResult<()> {
    let pid_file = PidFile::new(pid_file);
    let Some(pid) = pid_file.read()? else {
        return Err(DaemonError::NotRunning);
    };

    match unix::send_signal(pid, libc::SIGTERM) {
        Ok(()) => {}
        // Stale pid file; the next start reclaims it.
        Err(err) if err.raw_os_error() == Some(libc::ESRCH) => return Err(DaemonError::NotRunning),
        Err(err) => return Err(err.into()),
    }

    for _ in 0..STOP_POLL_ATTEMPTS {
        thread::sleep(STOP_POLL_INTERVAL);
        match unix::probe(pid) {
            Ok(()) => continue,
            Err(err) if err.raw_os_error() == Some(libc::ESRCH) => return Ok(()),
            Err(source) => {
                return Err(DaemonError::ProbeFailed {
                    pid,
                    path: pid_file.path().to_path_buf(),
                    source,
                })
            }
        }
    }
    Err(DaemonError::DidNotDie { pid })
}

/// Parses the process arguments, then starts or stops `task`.
///
/// `default_conf` is used when `-c` is absent. Fatal errors are printed as a
/// single line on stderr and turn into exit status 1.
pub fn main<T: Task>(task: T, default_conf: impl AsRef<Path>) -> ExitCode {
    let cli = Cli::parse();
    let outcome = Daemon::from_cli(task, &cli, default_conf.as_ref())
        .and_then(|daemon| daemon.execute(cli.action()));
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(target_os = "linux")]
fn under_systemd() -> bool {
    std::env::var_os("NOTIFY_SOCKET").is_some()
}

#[cfg(not(target_os = "linux"))]
fn under_systemd() -> bool {
    false
}

#[cfg(target_os = "linux")]
fn notify_ready() {
    use sd_notify::NotifyState;
    if under_systemd() {
        if let Err(err) = sd_notify::notify(false, &[NotifyState::Ready]) {
            debug!("sd_notify READY failed: {err}");
        }
    }
}

#[cfg(target_os = "linux")]
fn notify_stopping() {
    use sd_notify::NotifyState;
    if under_systemd() {
        if let Err(err) = sd_notify::notify(false, &[NotifyState::Stopping]) {
            debug!("sd_notify STOPPING failed: {err}");
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn notify_ready() {}

#[cfg(not(target_os = "linux"))]
fn notify_stopping() {}
