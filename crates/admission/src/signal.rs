//! Reusable single-waiter completion signal.
//!
//! A [`ResettableSignal`] carries exactly one boolean result per *occupancy*.
//! Each occupancy is tagged with a version; a [`SignalToken`] remembers the
//! version it was issued for, so once a signal has been observed and recycled
//! an old token can neither read nor deliver a result meant for the new
//! occupant.
//!
//! Completing a signal never runs the waiter's continuation. It returns a
//! [`Wakeup`] that the completer fires after leaving its critical section.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    #[error("stale signal token: token is for version {found}, signal is at version {expected}")]
    StaleToken { expected: u64, found: u64 },
    #[error("signal already completed for version {version}")]
    AlreadyCompleted { version: u64 },
}

/// Non-blocking view of an occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalStatus {
    Pending,
    Completed,
}

#[derive(Debug, Default)]
struct Occupancy {
    version: u64,
    result: Option<bool>,
    waker: Option<Waker>,
}

impl Occupancy {
    fn check(&self, version: u64) -> Result<(), SignalError> {
        if self.version == version {
            Ok(())
        } else {
            Err(SignalError::StaleToken {
                expected: self.version,
                found: version,
            })
        }
    }

    fn reset(&mut self) {
        self.version = self.version.wrapping_add(1);
        self.result = None;
        self.waker = None;
    }
}

/// Single-shot, resettable future over a boolean.
#[derive(Debug, Default)]
pub struct ResettableSignal {
    occupancy: Mutex<Occupancy>,
}

impl ResettableSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Occupancy> {
        self.occupancy.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Signal mutex poisoned - recovering occupancy");
            poisoned.into_inner()
        })
    }

    /// Version of the current occupancy.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Issue a token bound to the current occupancy.
    pub fn token(self: &Arc<Self>) -> SignalToken {
        SignalToken {
            signal: Arc::clone(self),
            version: self.version(),
        }
    }

    /// Deliver the result for `version`.
    ///
    /// The waiter is not woken until the returned [`Wakeup`] is fired.
    pub fn complete(&self, version: u64, result: bool) -> Result<Wakeup, SignalError> {
        let mut occupancy = self.lock();
        occupancy.check(version)?;
        if occupancy.result.is_some() {
            return Err(SignalError::AlreadyCompleted { version });
        }
        occupancy.result = Some(result);
        Ok(Wakeup(occupancy.waker.take()))
    }

    pub fn status(&self, version: u64) -> Result<SignalStatus, SignalError> {
        let occupancy = self.lock();
        occupancy.check(version)?;
        Ok(match occupancy.result {
            Some(_) => SignalStatus::Completed,
            None => SignalStatus::Pending,
        })
    }

    /// Poll for the result of `version`.
    ///
    /// Observing a result ends the occupancy: the signal resets and its version
    /// advances, so any further use of `version` fails with
    /// [`SignalError::StaleToken`].
    pub fn poll_result(&self, version: u64, cx: &mut Context<'_>) -> Poll<Result<bool, SignalError>> {
        let mut occupancy = self.lock();
        if let Err(e) = occupancy.check(version) {
            return Poll::Ready(Err(e));
        }
        match occupancy.result {
            Some(result) => {
                occupancy.reset();
                Poll::Ready(Ok(result))
            }
            None => {
                let registered = occupancy
                    .waker
                    .as_ref()
                    .is_some_and(|waker| waker.will_wake(cx.waker()));
                if !registered {
                    occupancy.waker = Some(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }

    /// Observe the result of `version` without registering a waker.
    ///
    /// Returns `Ok(None)` while pending. A delivered result is consumed exactly
    /// as [`poll_result`](Self::poll_result) would consume it.
    pub fn try_take(&self, version: u64) -> Result<Option<bool>, SignalError> {
        let mut occupancy = self.lock();
        occupancy.check(version)?;
        let result = occupancy.result;
        if result.is_some() {
            occupancy.reset();
        }
        Ok(result)
    }

    /// End the current occupancy without a result being observed.
    pub(crate) fn abandon(&self) {
        self.lock().reset();
    }

    /// True when no result or waiter is attached to the current occupancy.
    pub fn is_idle(&self) -> bool {
        let occupancy = self.lock();
        occupancy.result.is_none() && occupancy.waker.is_none()
    }
}

/// Handle to one occupancy of a [`ResettableSignal`].
///
/// Awaiting the token yields the delivered result once.
#[derive(Debug, Clone)]
pub struct SignalToken {
    signal: Arc<ResettableSignal>,
    version: u64,
}

impl SignalToken {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn signal(&self) -> &Arc<ResettableSignal> {
        &self.signal
    }

    pub fn complete(&self, result: bool) -> Result<Wakeup, SignalError> {
        self.signal.complete(self.version, result)
    }

    pub fn status(&self) -> Result<SignalStatus, SignalError> {
        self.signal.status(self.version)
    }

    pub fn try_take(&self) -> Result<Option<bool>, SignalError> {
        self.signal.try_take(self.version)
    }

    pub fn into_signal(self) -> Arc<ResettableSignal> {
        self.signal
    }
}

impl Future for SignalToken {
    type Output = Result<bool, SignalError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.signal.poll_result(self.version, cx)
    }
}

/// Deferred wake of a completed signal's waiter.
#[must_use = "the waiter only resumes once the wakeup is fired"]
#[derive(Debug, Default)]
pub struct Wakeup(Option<Waker>);

impl Wakeup {
    pub fn wake(self) {
        if let Some(waker) = self.0 {
            waker.wake();
        }
    }

    /// True if no task was parked on the signal when it completed.
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

/// Wakeups collected inside a critical section.
///
/// Declare before taking the lock so the guard is released first; anything
/// still held is woken on drop.
#[derive(Debug, Default)]
pub struct Wakeups(Vec<Waker>);

impl Wakeups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, wakeup: Wakeup) {
        if let Some(waker) = wakeup.0 {
            self.0.push(waker);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn wake_all(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        for waker in self.0.drain(..) {
            waker.wake();
        }
    }
}

impl Drop for Wakeups {
    fn drop(&mut self) {
        self.fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use futures::task::{ArcWake, waker};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingWaker {
        wakes: AtomicUsize,
    }

    impl ArcWake for CountingWaker {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            arc_self.wakes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn complete_then_await_observes_result() {
        let signal = ResettableSignal::new();
        let token = signal.token();

        token.complete(true).unwrap().wake();
        assert_eq!(token.await, Ok(true));
    }

    #[test]
    fn pending_until_completed() {
        let signal = ResettableSignal::new();
        let token = signal.token();

        assert_eq!(token.status(), Ok(SignalStatus::Pending));
        assert!(token.clone().now_or_never().is_none());

        let _ = token.complete(false).unwrap();
        assert_eq!(token.status(), Ok(SignalStatus::Completed));
    }

    #[test]
    fn observing_advances_version() {
        let signal = ResettableSignal::new();
        let token = signal.token();
        let before = signal.version();

        let _ = token.complete(true).unwrap();
        assert_eq!(token.try_take(), Ok(Some(true)));

        assert_eq!(signal.version(), before + 1);
        assert!(signal.is_idle());
    }

    #[test]
    fn second_observation_is_stale() {
        let signal = ResettableSignal::new();
        let token = signal.token();
        let _ = token.complete(true).unwrap();

        assert_eq!(token.clone().now_or_never(), Some(Ok(true)));
        assert_eq!(
            token.now_or_never(),
            Some(Err(SignalError::StaleToken {
                expected: 1,
                found: 0
            }))
        );
    }

    #[test]
    fn double_complete_is_rejected() {
        let signal = ResettableSignal::new();
        let token = signal.token();

        let _ = token.complete(true).unwrap();
        assert_eq!(
            token.complete(false).unwrap_err(),
            SignalError::AlreadyCompleted { version: 0 }
        );
        // The first result is the one delivered.
        assert_eq!(token.try_take(), Ok(Some(true)));
    }

    #[test]
    fn complete_defers_wake_to_caller() {
        let counter = Arc::new(CountingWaker::default());
        let task_waker = waker(Arc::clone(&counter));
        let mut cx = Context::from_waker(&task_waker);

        let signal = ResettableSignal::new();
        let mut token = signal.token();
        assert!(Pin::new(&mut token).poll(&mut cx).is_pending());

        let wakeup = token.complete(true).unwrap();
        assert!(!wakeup.is_empty());
        assert_eq!(counter.wakes.load(Ordering::SeqCst), 0);

        wakeup.wake();
        assert_eq!(counter.wakes.load(Ordering::SeqCst), 1);
        assert_eq!(Pin::new(&mut token).poll(&mut cx), Poll::Ready(Ok(true)));
    }

    #[test]
    fn wakeups_fire_on_drop() {
        let counter = Arc::new(CountingWaker::default());
        let task_waker = waker(Arc::clone(&counter));
        let mut cx = Context::from_waker(&task_waker);

        let signal = ResettableSignal::new();
        let mut token = signal.token();
        assert!(Pin::new(&mut token).poll(&mut cx).is_pending());

        {
            let mut wakeups = Wakeups::new();
            wakeups.push(token.complete(false).unwrap());
            assert_eq!(wakeups.len(), 1);
            assert_eq!(counter.wakes.load(Ordering::SeqCst), 0);
        }
        assert_eq!(counter.wakes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reused_signal_isolates_occupancies() {
        let signal = ResettableSignal::new();

        let first = signal.token();
        let _ = first.complete(true).unwrap();
        assert_eq!(first.try_take(), Ok(Some(true)));

        let second = signal.token();
        assert!(matches!(
            first.complete(true),
            Err(SignalError::StaleToken { .. })
        ));
        assert!(matches!(first.status(), Err(SignalError::StaleToken { .. })));

        let _ = second.complete(false).unwrap();
        assert_eq!(second.try_take(), Ok(Some(false)));
    }

    #[test]
    fn abandon_detaches_waiter() {
        let signal = ResettableSignal::new();
        let mut token = signal.token();
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        assert!(Pin::new(&mut token).poll(&mut cx).is_pending());
        assert!(!signal.is_idle());

        signal.abandon();
        assert!(signal.is_idle());
        assert!(matches!(token.try_take(), Err(SignalError::StaleToken { .. })));
    }
}
