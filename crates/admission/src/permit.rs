//! RAII admission guard.
//!
//! A [`Permit`] stands for one admitted caller. It gives its slot back exactly
//! once: explicitly through [`Permit::release`] or implicitly on drop.

use std::fmt;
use std::time::{Duration, Instant};

use crate::error::LimiterError;
use crate::limiter::Limiter;

#[must_use = "dropping a permit immediately gives its slot back"]
pub struct Permit {
    limiter: Option<Limiter>,
    acquired_at: Instant,
}

impl Permit {
    pub(crate) fn new(limiter: Limiter) -> Self {
        Self {
            limiter: Some(limiter),
            acquired_at: Instant::now(),
        }
    }

    /// How long this caller has held its slot.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Give the slot back now.
    pub fn release(mut self) -> Result<(), LimiterError> {
        match self.limiter.take() {
            Some(limiter) => limiter.exit(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("held_for", &self.held_for())
            .finish()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(limiter) = self.limiter.take()
            && let Err(e) = limiter.exit()
        {
            tracing::error!(error = %e, "Permit dropped but slot could not be released");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Entry, Limiter, LimiterOptions, PolicyKind};

    fn limiter(capacity: usize) -> Limiter {
        Limiter::new(&LimiterOptions::new(capacity).with_policy(PolicyKind::Fifo)).unwrap()
    }

    #[tokio::test]
    async fn drop_returns_slot() {
        let limiter = limiter(1);
        {
            let _permit = limiter.acquire().await.unwrap();
            assert_eq!(limiter.available(), 0);
        }
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn release_returns_slot_once() {
        let limiter = limiter(2);
        let first = limiter.acquire().await.unwrap();
        let _second = limiter.acquire().await.unwrap();

        first.release().unwrap();
        assert_eq!(limiter.available(), 1);
        assert_eq!(limiter.in_flight(), 1);
    }

    #[tokio::test]
    async fn drop_hands_slot_to_waiter() {
        let limiter = limiter(1);
        let permit = limiter.acquire().await.unwrap();

        let Entry::Queued(waiting) = limiter.try_enter() else {
            panic!("expected queued entry");
        };
        drop(permit);

        assert!(waiting.await);
        assert_eq!(limiter.available(), 0);
        limiter.exit().unwrap();
    }

    #[tokio::test]
    async fn held_for_advances() {
        let limiter = limiter(1);
        let permit = limiter.acquire().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(permit.held_for() >= std::time::Duration::from_millis(5));
    }
}
