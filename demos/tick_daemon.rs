//! Builds the daemon configuration in code instead of reading a file.
//!
//! Run with `cargo run --example tick_daemon`, stop with
//! `kill $(cat ticker.pid)`.

use std::env;
use std::time::Duration;

use daemon_keeper::{Daemon, DaemonConfig, LevelFilter, Shutdown, Task, TaskResult};
use tracing::info;

struct Ticker;

impl Task for Ticker {
    fn setup_root(&mut self) -> TaskResult {
        println!("[Ticker] root setup as pid {}", std::process::id());
        Ok(())
    }

    fn run(&mut self, shutdown: &Shutdown) -> TaskResult {
        let mut i = 0u64;
        while !shutdown.wait_timeout(Duration::from_secs(3)) {
            info!("[Ticker] Ping #{i}");
            i += 1;
        }
        info!("[Ticker] stop signal received, shutting down cleanly");
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let pwd = env::current_dir()?;

    let config = DaemonConfig::new()
        .pid_file_path(pwd.join("ticker.pid"))
        .log_file(pwd.join("ticker.log"))
        .log_rotation(1024 * 1024, 3)
        .log_level(LevelFilter::DEBUG);

    println!("Launching a simple ticker daemon...");
    println!("Logs will be written to: {:?}", pwd.join("ticker.log"));

    Daemon::new(config, Ticker).start()?;
    Ok(())
}
