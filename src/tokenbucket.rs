// SPDX-License-Identifier: Apache-2.0

//! Lock-free capacity store for the token bucket algorithm.
//!
//! Tokens are bytes. The bucket holds at most one second's worth of tokens
//! and is shared between the refill task (producer) and any number of
//! concurrent writers (consumers). All operations are non-blocking.

use crate::config::Limit;
use crate::Error;
use std::sync::atomic::{AtomicU64, Ordering};

/// A bounded counter of available byte-tokens.
///
/// `0 <= available <= capacity` holds at every observation point: additions
/// past capacity are dropped and reservations never take more than is
/// present.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum number of tokens, equal to the bytes-per-second rate.
    capacity: u64,
    /// Tokens currently available.
    available: AtomicU64,
}

impl TokenBucket {
    /// Creates a bucket for the given limit. The bucket starts full.
    pub fn new(limit: Limit) -> Self {
        let capacity = limit.bytes_per_second();
        TokenBucket {
            capacity,
            available: AtomicU64::new(capacity),
        }
    }

    /// Returns the maximum number of tokens the bucket holds.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the number of tokens available now.
    pub fn available(&self) -> u64 {
        self.available.load(Ordering::Acquire)
    }

    /// Adds up to `amount` tokens, saturating at capacity.
    ///
    /// Returns the number of tokens actually added.
    pub fn refill(&self, amount: u64) -> u64 {
        let capacity = self.capacity;
        match self
            .available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current >= capacity {
                    None
                } else {
                    Some(current.saturating_add(amount).min(capacity))
                }
            }) {
            Ok(previous) => previous.saturating_add(amount).min(capacity) - previous,
            Err(_) => 0,
        }
    }

    /// Reserves exactly `n` tokens, or none at all.
    ///
    /// A rejected attempt leaves the bucket untouched, so there is never a
    /// partial reservation to hand back.
    ///
    /// # Errors
    ///
    /// Returns `Error::Throttled` if fewer than `n` tokens are available.
    pub fn try_acquire(&self, n: u64) -> Result<(), Error> {
        if n == 0 {
            return Ok(());
        }

        // Cheap rejection without touching the cache line for writing.
        let observed = self.available();
        if observed < n {
            return Err(Error::Throttled {
                requested: n,
                available: observed,
            });
        }

        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(n)
            })
            .map(|_| ())
            .map_err(|available| Error::Throttled {
                requested: n,
                available,
            })
    }

    /// Returns `n` previously reserved tokens to the bucket.
    ///
    /// Saturates at capacity. Returns the number of tokens put back.
    pub fn refund(&self, n: u64) -> u64 {
        self.refill(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn bucket(rate: u64) -> TokenBucket {
        TokenBucket::new(Limit::new(rate).unwrap())
    }

    #[test]
    fn test_bucket_starts_full() {
        let bucket = bucket(100);
        assert_eq!(bucket.capacity(), 100);
        assert_eq!(bucket.available(), 100);
    }

    #[test]
    fn test_acquire_drains() {
        let bucket = bucket(100);

        bucket.try_acquire(30).unwrap();
        assert_eq!(bucket.available(), 70);

        bucket.try_acquire(70).unwrap();
        assert_eq!(bucket.available(), 0);

        assert!(matches!(
            bucket.try_acquire(1),
            Err(Error::Throttled {
                requested: 1,
                available: 0
            })
        ));
    }

    #[test]
    fn test_failed_acquire_leaves_tokens() {
        let bucket = bucket(10);
        bucket.try_acquire(4).unwrap();

        assert!(bucket.try_acquire(7).is_err());
        assert_eq!(bucket.available(), 6);

        assert!(bucket.try_acquire(11).is_err());
        assert_eq!(bucket.available(), 6);
    }

    #[test]
    fn test_zero_acquire_is_free() {
        let bucket = bucket(5);
        bucket.try_acquire(5).unwrap();
        assert!(bucket.try_acquire(0).is_ok());
        assert_eq!(bucket.available(), 0);
    }

    #[test]
    fn test_refill_saturates() {
        let bucket = bucket(50);
        assert_eq!(bucket.refill(50), 0);

        bucket.try_acquire(20).unwrap();
        assert_eq!(bucket.refill(50), 20);
        assert_eq!(bucket.available(), 50);

        bucket.try_acquire(50).unwrap();
        assert_eq!(bucket.refill(10), 10);
        assert_eq!(bucket.available(), 10);
    }

    #[test]
    fn test_refund_respects_capacity() {
        let bucket = bucket(10);
        bucket.try_acquire(8).unwrap();

        assert_eq!(bucket.refund(8), 8);
        assert_eq!(bucket.available(), 10);

        bucket.try_acquire(3).unwrap();
        let _ = bucket.refill(10);
        assert_eq!(bucket.refund(3), 0);
        assert_eq!(bucket.available(), 10);
    }

    #[test]
    fn test_huge_rate_does_not_overflow() {
        let bucket = bucket(u64::MAX);
        bucket.try_acquire(1).unwrap();
        assert_eq!(bucket.refill(u64::MAX), 1);
        assert_eq!(bucket.available(), u64::MAX);
    }

    #[test]
    fn test_concurrent_refill_and_drain_stay_bounded() {
        let bucket = bucket(64);
        let rounds = 10_000;

        thread::scope(|s| {
            for _ in 0..4 {
                let _ = s.spawn(|| {
                    for i in 0..rounds {
                        let _ = bucket.try_acquire(1 + (i % 16) as u64);
                        let available = bucket.available();
                        assert!(available <= 64);
                    }
                });
            }
            let _ = s.spawn(|| {
                for _ in 0..rounds {
                    let _ = bucket.refill(64);
                    assert!(bucket.available() <= 64);
                }
            });
        });

        assert!(bucket.available() <= 64);
    }

    #[test]
    fn test_concurrent_acquire_never_double_spends() {
        let rate = 100;
        for _ in 0..200 {
            let bucket = bucket(rate);
            let barrier = Barrier::new(2);

            let successes = thread::scope(|s| {
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        s.spawn(|| {
                            let _ = barrier.wait();
                            bucket.try_acquire(rate / 2 + 1).is_ok()
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap())
                    .filter(|ok| *ok)
                    .count()
            });

            assert_eq!(successes, 1);
            assert_eq!(bucket.available(), rate / 2 - 1);
        }
    }
}
