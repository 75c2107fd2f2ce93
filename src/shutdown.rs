//! Cooperative shutdown driven by SIGTERM / SIGINT.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::SigId;

/// Longest single sleep inside [`Shutdown::wait_timeout`].
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Cancellation token handed to [`Task::run`](crate::Task::run).
///
/// The signal handler only flips an atomic flag; the task polls it and
/// returns, which sends control down the same cleanup path as a normal exit.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Asks the task to stop, as a termination signal would.
    pub fn request(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Sleeps up to `timeout`, waking early on shutdown.
    /// Returns `true` if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(WAIT_SLICE.min(deadline - now));
        }
    }
}

/// SIGTERM and SIGINT handlers feeding a [`Shutdown`].
///
/// Dropping the registration removes the actions; signal-hook keeps its
/// trampoline installed, so the signals are not reset to their defaults and
/// are ignored from then on.
pub(crate) struct SignalRegistration {
    ids: Vec<SigId>,
}

impl SignalRegistration {
    pub(crate) fn register(shutdown: &Shutdown) -> io::Result<Self> {
        let mut ids = Vec::with_capacity(2);
        for signal in [SIGTERM, SIGINT] {
            ids.push(signal_hook::flag::register(signal, Arc::clone(&shutdown.flag))?);
        }
        Ok(SignalRegistration { ids })
    }
}

impl Drop for SignalRegistration {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn request_is_shared_between_clones() {
        let shutdown = Shutdown::new();
        let clone = shutdown.clone();
        assert!(!clone.is_requested());
        shutdown.request();
        assert!(clone.is_requested());
    }

    #[test]
    fn wait_times_out_without_request() {
        let shutdown = Shutdown::new();
        let start = Instant::now();
        assert!(!shutdown.wait_timeout(Duration::from_millis(120)));
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn wait_wakes_on_request() {
        let shutdown = Shutdown::new();
        let remote = shutdown.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.request();
        });
        assert!(shutdown.wait_timeout(Duration::from_secs(10)));
        handle.join().unwrap();
    }

    #[test]
    #[serial(signals)]
    fn sigterm_sets_flag() {
        let shutdown = Shutdown::new();
        let registration = SignalRegistration::register(&shutdown).unwrap();

        signal_hook::low_level::raise(SIGTERM).unwrap();
        assert!(shutdown.wait_timeout(Duration::from_secs(5)));
        drop(registration);
    }

    #[test]
    #[serial(signals)]
    fn sigterm_is_ignored_after_unregistering() {
        let shutdown = Shutdown::new();
        drop(SignalRegistration::register(&shutdown).unwrap());

        signal_hook::low_level::raise(SIGTERM).unwrap();
        thread::sleep(Duration::from_millis(100));
        // Still here, and nobody saw the signal.
        assert!(!shutdown.is_requested());
    }
}
