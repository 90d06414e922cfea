//! Sliding-window limit on job starts.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Allows at most `max_starts` job starts in any `window`, independent of
/// how many workers are free.
#[derive(Debug)]
pub struct StartRateLimiter {
    max_starts: usize,
    window: Duration,
    starts: VecDeque<Instant>,
}

impl StartRateLimiter {
    pub fn new(max_starts: usize, window: Duration) -> Self {
        Self {
            max_starts: max_starts.max(1),
            window,
            starts: VecDeque::new(),
        }
    }

    /// Wait until a start is allowed, then record it.
    pub async fn acquire(&mut self) {
        loop {
            let now = Instant::now();
            while self
                .starts
                .front()
                .is_some_and(|t| now.duration_since(*t) >= self.window)
            {
                self.starts.pop_front();
            }

            if self.starts.len() < self.max_starts {
                self.starts.push_back(now);
                return;
            }

            let Some(oldest) = self.starts.front().copied() else {
                continue;
            };
            let resume_at = oldest + self.window;
            debug!(
                wait_ms = resume_at.saturating_duration_since(now).as_millis() as u64,
                "start rate limit reached"
            );
            tokio::time::sleep_until(resume_at).await;
        }
    }
}
