// rust/w2v-core/src/metrics.rs

//! Training progress counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic count of finished training rounds.
///
/// Purely advisory: it drives periodic progress logging and nothing else,
/// so relaxed ordering is enough.
#[derive(Debug)]
pub struct RoundCounter {
    rounds: AtomicU64,
    log_interval: u64,
}

impl RoundCounter {
    pub fn new(log_interval: u64) -> Self {
        Self {
            rounds: AtomicU64::new(0),
            log_interval: log_interval.max(1),
        }
    }

    /// Counts one finished round and returns the new total.
    pub fn increment(&self) -> u64 {
        let rounds = self.rounds.fetch_add(1, Ordering::Relaxed) + 1;
        if rounds % self.log_interval == 0 {
            tracing::info!("{} training rounds finished...", rounds);
        }
        rounds
    }

    pub fn get(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }
}

impl Default for RoundCounter {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_increment() {
        let counter = RoundCounter::new(2);
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let counter = RoundCounter::new(1000);
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..500 {
                        counter.increment();
                    }
                });
            }
        });
        assert_eq!(counter.get(), 2000);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let counter = RoundCounter::new(0);
        assert_eq!(counter.increment(), 1);
    }
}
