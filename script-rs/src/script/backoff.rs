//! Bounded exponential backoff for section retries.

use std::time::Duration;

/// Yields `initial`, `2 * initial`, `4 * initial`, … capped at `max`.
///
/// The n-th delay is `min(initial * 2^(n-1), max)`; no delay ever exceeds
/// `max`, even when `initial` does.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { next: initial.min(max), max }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let d = self.next;
        self.next = self.next.checked_mul(2).map_or(self.max, |n| n.min(self.max));
        Some(d)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn doubles_until_capped() {
        let delays: Vec<_> = Backoff::new(ms(100), ms(500)).take(5).collect();
        assert_eq!(delays, vec![ms(100), ms(200), ms(400), ms(500), ms(500)]);
    }

    #[test]
    fn initial_above_max_is_capped() {
        let mut b = Backoff::new(ms(900), ms(500));
        assert_eq!(b.next(), Some(ms(500)));
        assert_eq!(b.next(), Some(ms(500)));
    }

    #[test]
    fn huge_intervals_saturate() {
        let mut b = Backoff::new(Duration::MAX / 2 + ms(1), Duration::MAX);
        b.next();
        assert_eq!(b.next(), Some(Duration::MAX));
    }

    #[test]
    fn zero_initial_stays_zero() {
        let delays: Vec<_> = Backoff::new(Duration::ZERO, ms(10)).take(3).collect();
        assert_eq!(delays, vec![Duration::ZERO; 3]);
    }
}
