//! # daemon_keeper
//!
//! **daemon_keeper** turns a long-running task into a well-behaved Unix daemon.
//! It owns the process-level chores in the order they have to happen: pid-file
//! singleton check, signal handling, directory preparation, root-phase setup,
//! logging, privilege drop, user-phase setup, terminal detachment, pid file
//! write, and cleanup on the way out.
//!
//! The task only implements [`Task`]:
//!
//! ```no_run
//! use std::time::Duration;
//! use daemon_keeper::{Shutdown, Task, TaskResult};
//!
//! struct Ticker;
//!
//! impl Task for Ticker {
//!     fn run(&mut self, shutdown: &Shutdown) -> TaskResult {
//!         while !shutdown.wait_timeout(Duration::from_secs(3)) {
//!             tracing::info!("tick");
//!         }
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> std::process::ExitCode {
//!     daemon_keeper::main(Ticker, "/etc/ticker.toml")
//! }
//! ```
//!
//! The pid file is an advisory lock. Two instances started at the same moment
//! can both pass the liveness check before either writes its pid.

#[cfg(not(unix))]
compile_error!("daemon_keeper only supports Unix targets");

mod cli;
mod config;
mod daemon;
mod error;
mod logging;
mod pidfile;
mod privilege;
mod shutdown;
mod sys;
mod types;

// Re-export public types to keep the API flat
pub use cli::{Action, Cli};
pub use config::{DaemonConfig, DEFAULT_SECTION};
pub use daemon::{main, stop, Daemon, Task, STOP_POLL_ATTEMPTS, STOP_POLL_INTERVAL};
pub use error::{BoxError, DaemonError, DaemonResult, TaskResult};
pub use logging::{parse_level, LogContext, LogOptions, LogSink};
pub use pidfile::PidFile;
pub use privilege::{drop_privileges, fix_ownership, resolve_identity};
pub use shutdown::Shutdown;
pub use types::{Group, ProcessIdentity, User};

/// Level type used by [`LogOptions`] and [`DaemonConfig::log_level`].
pub use tracing::level_filters::LevelFilter;
