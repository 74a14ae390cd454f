use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Internal marker unwound through the long-running loops when the token
/// fires. Converted to [`crate::Error::Timeout`] at the public boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Cancelled;

/// A cooperative cancellation flag shared between one check and its
/// watchdog. Every long-running loop polls the token between iterations;
/// the token is per-call state, not a process-wide global.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Returns an error exactly when the token has fired; loop heads call
    /// this with `?`.
    pub(crate) fn guard(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        Ok(())
    }
}

/// A watchdog thread that cancels the token after a deadline unless it is
/// disarmed first. Disarming drops the sender half of a channel, so the
/// watchdog wakes immediately and exits without firing; there is no window
/// in which a finished check can still be cancelled by a stale timer.
pub struct Watchdog {
    disarm: Sender<()>,
    handle: JoinHandle<()>,
}

impl Watchdog {
    pub fn spawn(token: CancelToken, timeout: Duration) -> Self {
        let (disarm, armed) = mpsc::channel::<()>();
        let handle = std::thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = armed.recv_timeout(timeout) {
                token.cancel();
            }
        });
        Self { disarm, handle }
    }

    /// Stops the watchdog without cancelling and waits for it to exit.
    pub fn disarm(self) {
        drop(self.disarm);
        let _ = self.handle.join();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CancelToken, Watchdog};

    #[test]
    fn token_starts_clear() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.guard().is_ok());
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        token.cancel();
        assert!(other.is_cancelled());
        assert!(other.guard().is_err());
    }

    #[test]
    fn watchdog_fires_after_deadline() {
        let token = CancelToken::new();
        let watchdog = Watchdog::spawn(token.clone(), Duration::from_millis(1));
        while !token.is_cancelled() {
            std::thread::yield_now();
        }
        watchdog.disarm();
        assert!(token.is_cancelled());
    }

    #[test]
    fn disarmed_watchdog_never_fires() {
        let token = CancelToken::new();
        let watchdog = Watchdog::spawn(token.clone(), Duration::from_secs(3600));
        watchdog.disarm();
        assert!(!token.is_cancelled());
    }
}
