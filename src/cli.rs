use std::path::PathBuf;

use clap::Parser;

/// Command-line surface shared by every daemon built on this crate.
#[derive(Debug, Clone, Parser)]
#[command(version, about = "Start or stop the daemon")]
pub struct Cli {
    /// Start the daemon (the default action)
    #[arg(long, conflicts_with = "stop")]
    pub start: bool,

    /// Stop the daemon
    #[arg(short = 's', long)]
    pub stop: bool,

    /// Specify alternate configuration file name
    #[arg(short = 'c', value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Run in the foreground
    #[arg(short = 'n', long)]
    pub nodaemon: bool,
}

/// What the invocation asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
}

impl Cli {
    pub fn action(&self) -> Action {
        if self.stop {
            Action::Stop
        } else {
            Action::Start
        }
    }
}
