// Resettable deadline used to supervise the event stream.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep, sleep};

/// Fires once `timeout` has passed since the last [`reset`](Self::reset).
/// A watchdog without a timeout never fires.
pub(crate) struct Watchdog {
    timeout: Option<Duration>,
    deadline: Pin<Box<Sleep>>,
}

impl Watchdog {
    pub(crate) fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            deadline: Box::pin(sleep(timeout.unwrap_or(Duration::ZERO))),
        }
    }

    pub(crate) fn reset(&mut self) {
        if let Some(timeout) = self.timeout {
            self.deadline.as_mut().reset(Instant::now() + timeout);
        }
    }

    /// Cancel-safe; usable as a `tokio::select!` branch.
    pub(crate) async fn expired(&mut self) {
        if self.timeout.is_some() {
            self.deadline.as_mut().await;
        } else {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_timeout() {
        let start = Instant::now();
        let mut watchdog = Watchdog::new(Some(Duration::from_secs(90)));
        watchdog.expired().await;
        assert_eq!(start.elapsed(), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_pushes_the_deadline() {
        let start = Instant::now();
        let mut watchdog = Watchdog::new(Some(Duration::from_secs(10)));

        tokio::time::sleep(Duration::from_secs(8)).await;
        watchdog.reset();
        watchdog.expired().await;

        assert_eq!(start.elapsed(), Duration::from_secs(18));
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_watchdog_never_fires() {
        let mut watchdog = Watchdog::new(None);
        let fired = tokio::time::timeout(Duration::from_secs(3600), watchdog.expired()).await;
        assert!(fired.is_err());
    }
}
