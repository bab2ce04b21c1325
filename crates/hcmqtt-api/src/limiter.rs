//! Client-side request limiter.
//!
//! The vendor API enforces both a concurrency cap and a per-minute quota and
//! answers with 429 when either is exceeded. [`RequestLimiter`] keeps us
//! under both and can be told to stop admitting anything for a cooldown
//! window after a 429.
//!
//! The quota is a sliding log of admission instants, so no rolling window of
//! [`LimiterConfig::window`] ever holds more than
//! [`LimiterConfig::requests_per_window`] admissions. Waiters park on a
//! [`Notify`] and a deadline, never spinning.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

pub const MAX_CONCURRENT_REQUESTS: usize = 20;
pub const REQUESTS_PER_MINUTE: usize = 50;

// ── LimiterConfig ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LimiterConfig {
    pub max_concurrent: usize,
    pub requests_per_window: usize,
    pub window: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent: MAX_CONCURRENT_REQUESTS,
            requests_per_window: REQUESTS_PER_MINUTE,
            window: Duration::from_secs(60),
        }
    }
}

// ── RequestLimiter ───────────────────────────────────────────────────

#[derive(Debug)]
pub struct RequestLimiter {
    config: LimiterConfig,
    state: Mutex<LimiterState>,
    released: Notify,
}

#[derive(Debug, Default)]
struct LimiterState {
    active: usize,
    admissions: VecDeque<Instant>,
    disabled_until: Option<Instant>,
}

enum Admission {
    Granted,
    /// Blocked until a deadline passes (cooldown or quota window).
    WaitUntil(Instant),
    /// Blocked until an in-flight request finishes.
    WaitForRelease,
}

impl LimiterState {
    fn try_admit(&mut self, now: Instant, config: &LimiterConfig) -> Admission {
        if let Some(until) = self.disabled_until {
            if until > now {
                return Admission::WaitUntil(until);
            }
            self.disabled_until = None;
        }

        while self
            .admissions
            .front()
            .is_some_and(|&at| at + config.window <= now)
        {
            self.admissions.pop_front();
        }

        if self.admissions.len() >= config.requests_per_window {
            if let Some(&oldest) = self.admissions.front() {
                return Admission::WaitUntil(oldest + config.window);
            }
        }

        if self.active >= config.max_concurrent {
            return Admission::WaitForRelease;
        }

        self.admissions.push_back(now);
        self.active += 1;
        Admission::Granted
    }
}

/// An admitted request. Dropping it frees the concurrency slot.
#[derive(Debug)]
pub struct Permit<'a> {
    limiter: &'a RequestLimiter,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.limiter.state.lock().expect("limiter lock poisoned");
            state.active = state.active.saturating_sub(1);
        }
        self.limiter.released.notify_waiters();
    }
}

impl Default for RequestLimiter {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}

impl RequestLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
            released: Notify::new(),
        }
    }

    /// Run `task` once admitted, holding a slot until it completes.
    pub async fn perform<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        task.await
    }

    /// Wait for admission. The returned permit holds one concurrency slot.
    pub async fn acquire(&self) -> Permit<'_> {
        loop {
            // Register interest before inspecting state so a release between
            // the check and the await is not missed.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let admission = {
                let mut state = self.state.lock().expect("limiter lock poisoned");
                state.try_admit(Instant::now(), &self.config)
            };

            match admission {
                Admission::Granted => return Permit { limiter: self },
                Admission::WaitUntil(deadline) => {
                    tokio::select! {
                        () = &mut notified => {}
                        () = tokio::time::sleep_until(deadline) => {}
                    }
                }
                Admission::WaitForRelease => notified.await,
            }
        }
    }

    /// Suspend all admissions for `duration`, e.g. after a 429.
    pub fn disable_requests(&self, duration: Duration) {
        let until = Instant::now() + duration;
        {
            let mut state = self.state.lock().expect("limiter lock poisoned");
            if state.disabled_until.is_none_or(|current| current < until) {
                state.disabled_until = Some(until);
            }
        }
        warn!(cooldown_secs = duration.as_secs(), "request limiter disabled");
        self.released.notify_waiters();
    }

    /// Number of requests currently holding a slot.
    pub fn active_requests(&self) -> usize {
        self.state.lock().expect("limiter lock poisoned").active
    }

    /// Whether admissions are currently suspended.
    pub fn is_disabled(&self) -> bool {
        let state = self.state.lock().expect("limiter lock poisoned");
        state.disabled_until.is_some_and(|until| until > Instant::now())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_concurrency_cap() {
        let limiter = Arc::new(RequestLimiter::default());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..30 {
            let limiter = Arc::clone(&limiter);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                limiter
                    .perform(async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), MAX_CONCURRENT_REQUESTS);
        assert_eq!(limiter.active_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_holds_over_every_rolling_window() {
        let limiter = Arc::new(RequestLimiter::default());
        let start = Instant::now();
        let admitted = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..120 {
            let limiter = Arc::clone(&limiter);
            let admitted = Arc::clone(&admitted);
            handles.push(tokio::spawn(async move {
                limiter
                    .perform(async {
                        admitted.lock().unwrap().push(Instant::now());
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut times = admitted.lock().unwrap().clone();
        times.sort();
        assert_eq!(times.len(), 120);
        for (i, &at) in times.iter().enumerate() {
            let in_window = times[i..]
                .iter()
                .take_while(|&&other| other < at + Duration::from_secs(60))
                .count();
            assert!(in_window <= REQUESTS_PER_MINUTE, "window at {i} held {in_window}");
        }
        assert!(times[49] - start < Duration::from_secs(1));
        assert!(times[50] - start >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn disable_blocks_until_cooldown_expires() {
        let limiter = RequestLimiter::default();
        let start = Instant::now();
        limiter.disable_requests(Duration::from_secs(10));
        assert!(limiter.is_disabled());

        limiter.perform(async {}).await;

        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(!limiter.is_disabled());
    }

    #[tokio::test(start_paused = true)]
    async fn shorter_disable_does_not_shorten_cooldown() {
        let limiter = RequestLimiter::default();
        let start = Instant::now();
        limiter.disable_requests(Duration::from_secs(30));
        limiter.disable_requests(Duration::from_secs(5));

        limiter.perform(async {}).await;

        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_proceeds_when_slot_frees() {
        let limiter = Arc::new(RequestLimiter::new(LimiterConfig {
            max_concurrent: 1,
            ..LimiterConfig::default()
        }));

        let held = limiter.acquire().await;
        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.perform(async { 7 }).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn release_wakes_a_parked_acquire() {
        let limiter = RequestLimiter::new(LimiterConfig {
            max_concurrent: 1,
            ..LimiterConfig::default()
        });
        let held = limiter.acquire().await;

        let mut waiting = tokio_test::task::spawn(limiter.acquire());
        tokio_test::assert_pending!(waiting.poll());

        drop(held);
        assert!(waiting.is_woken());
        let _permit = tokio_test::assert_ready!(waiting.poll());
        assert_eq!(limiter.active_requests(), 1);
    }
}
