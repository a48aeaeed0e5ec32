use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

pub const HOUR: Duration = Duration::from_secs(3600);

/// Sliding-window counter: at most `limit` acquisitions within any `window`.
///
/// Uses tokio's clock so tests can move time with `tokio::time::advance`.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    window: Duration,
    sent: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            sent: Mutex::new(VecDeque::new()),
        }
    }

    pub fn hourly() -> Self {
        Self::new(HOUR)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn prune(&self, sent: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = sent.front() {
            if now.duration_since(oldest) >= self.window {
                sent.pop_front();
            } else {
                break;
            }
        }
    }

    /// Take one slot, or return how long until the oldest slot frees up.
    pub fn try_acquire(&self, limit: u32) -> Result<(), Duration> {
        let now = Instant::now();
        let mut sent = match self.sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.prune(&mut sent, now);

        if sent.len() >= limit as usize {
            let retry_after = sent
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            return Err(retry_after);
        }

        sent.push_back(now);
        Ok(())
    }

    /// Acquisitions still counted in the current window.
    pub fn in_window(&self) -> usize {
        let mut sent = match self.sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.prune(&mut sent, Instant::now());
        sent.len()
    }

    pub fn remaining(&self, limit: u32) -> usize {
        (limit as usize).saturating_sub(self.in_window())
    }

    pub fn reset(&self) {
        match self.sent.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::hourly()
    }
}
