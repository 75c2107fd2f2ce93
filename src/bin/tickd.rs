//! tickd - a ticker daemon built on daemon_keeper.
//!
//! Usage:
//!   tickd [-c tickd.toml] [-n]     start (in the foreground with -n)
//!   tickd -s [-c tickd.toml]       stop the running instance
//!
//! `TICKD_INTERVAL_MS` overrides the default one second tick.

use std::process::ExitCode;
use std::time::Duration;

use daemon_keeper::{Shutdown, Task, TaskResult};
use tracing::info;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

const PHRASES: [&str; 5] = [
    "still here",
    "nothing to report",
    "all quiet",
    "hello world",
    "goodbye world",
];

struct Ticker {
    interval: Duration,
    ticks: u64,
}

impl Ticker {
    fn from_env() -> Self {
        let interval = std::env::var("TICKD_INTERVAL_MS")
            .ok()
            .and_then(|ms| ms.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_INTERVAL);
        Ticker { interval, ticks: 0 }
    }
}

impl Task for Ticker {
    fn setup_user(&mut self) -> TaskResult {
        info!(interval_ms = self.interval.as_millis() as u64, "ticker ready");
        Ok(())
    }

    fn run(&mut self, shutdown: &Shutdown) -> TaskResult {
        while !shutdown.wait_timeout(self.interval) {
            let phrase = PHRASES[(self.ticks % PHRASES.len() as u64) as usize];
            info!("ping #{} - {}", self.ticks, phrase);
            self.ticks += 1;
        }
        info!(ticks = self.ticks, "stop requested");
        Ok(())
    }
}

fn main() -> ExitCode {
    daemon_keeper::main(Ticker::from_env(), "tickd.toml")
}
