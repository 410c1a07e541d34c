//! Scoped timing for session flows.
//!
//! Every wait in this crate is bounded by a [`Deadline`] owned by the
//! session that created it. Dropping the session drops its deadlines,
//! so nothing keeps ticking for a session that no longer exists.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(d: Duration) -> Self {
        Self {
            at: Instant::now() + d,
        }
    }

    pub fn after_ms(ms: u64) -> Self {
        Self::after(Duration::from_millis(ms))
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Whole seconds left, rounded up so a countdown reads 1 right until
    /// the deadline actually passes.
    pub fn secs_left(&self) -> u64 {
        let ms = self.remaining().as_millis() as u64;
        (ms + 999) / 1000
    }

    pub async fn sleep(&self) {
        tokio::time::sleep_until(self.at).await;
    }
}

/// 1 Hz countdown over a deadline. `tick` yields the whole seconds
/// remaining, or `None` once the deadline has passed. Cancel-safe: a
/// tick abandoned inside `select!` re-arms at the same instant.
pub struct Ticker {
    deadline: Deadline,
    next: Instant,
}

impl Ticker {
    pub fn secondly(deadline: Deadline) -> Self {
        Self {
            deadline,
            next: Instant::now(),
        }
    }

    pub async fn tick(&mut self) -> Option<u64> {
        if self.deadline.expired() {
            return None;
        }
        tokio::time::sleep_until(self.next).await;
        if self.deadline.expired() {
            return None;
        }
        self.next += Duration::from_secs(1);
        Some(self.deadline.secs_left())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_expires_after_sleep() {
        let d = Deadline::after_ms(1500);
        assert!(!d.expired());
        assert_eq!(d.secs_left(), 2);
        d.sleep().await;
        assert!(d.expired());
        assert_eq!(d.secs_left(), 0);
        assert_eq!(d.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn secs_left_rounds_up() {
        let d = Deadline::after_ms(2001);
        assert_eq!(d.secs_left(), 3);
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(d.secs_left(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_counts_down_then_stops() {
        let d = Deadline::after(Duration::from_secs(3));
        let mut t = Ticker::secondly(d);
        let mut seen = Vec::new();
        while let Some(s) = t.tick().await {
            seen.push(s);
        }
        assert_eq!(seen, vec![3, 2, 1]);
        assert!(t.tick().await.is_none());
    }
}
