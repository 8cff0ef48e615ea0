//! Admission-control limiter.
//!
//! A [`Limiter`] admits at most `capacity` callers at a time. Callers arriving
//! while it is saturated are parked in its [`QueuePolicy`] and resumed in that
//! policy's order as admitted callers exit. A freed slot is handed straight to
//! the next waiter; it never passes back through `available`.
//!
//! All bookkeeping sits behind one mutex that is never held across an await.
//! Waiters resolved inside it are woken only after it is released.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, LimiterError};
use crate::options::{LimiterOptions, PolicyKind};
use crate::permit::Permit;
use crate::policy::{self, QueuePolicy, WaiterId};
use crate::signal::{SignalStatus, SignalToken, Wakeups};
use crate::stats::{Counters, Gauges, LimiterStats};

/// Outcome of [`Limiter::try_enter`].
#[derive(Debug)]
pub enum Entry {
    /// A slot was free and is now held by the caller.
    Admitted,
    /// The caller is queued; await to learn whether it was admitted.
    Queued(Waiting),
    /// No slot and no room in the queue.
    Rejected,
}

impl Entry {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected)
    }
}

struct State {
    available: usize,
    /// Admitted and not yet exited, including waiters granted a slot but not
    /// yet polled. `available + in_flight == capacity` at all times.
    in_flight: usize,
    policy: Box<dyn QueuePolicy>,
}

impl State {
    /// Pass a vacated slot to the next waiter, or return it to the budget.
    ///
    /// Returns `true` if a waiter inherited the slot.
    fn vacate(&mut self, wakeups: &mut Wakeups) -> bool {
        if self.policy.release_one(wakeups) {
            return true;
        }
        self.in_flight -= 1;
        self.available += 1;
        false
    }
}

struct Shared {
    capacity: usize,
    queue_limit: usize,
    state: Mutex<State>,
    counters: Counters,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Limiter mutex poisoned - recovering state");
            poisoned.into_inner()
        })
    }
}

/// Bounded-concurrency admission gate. Cloning shares the same budget.
#[derive(Clone)]
pub struct Limiter {
    shared: Arc<Shared>,
}

impl fmt::Debug for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("capacity", &self.shared.capacity)
            .field("queue_limit", &self.shared.queue_limit)
            .finish_non_exhaustive()
    }
}

impl Limiter {
    pub fn new(options: &LimiterOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        Self::with_policy(
            options.max_concurrent_requests,
            options.request_queue_limit,
            policy::from_kind(options.policy),
        )
    }

    /// Build a limiter around a caller-supplied policy.
    pub fn with_policy(
        capacity: usize,
        queue_limit: usize,
        policy: Box<dyn QueuePolicy>,
    ) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        tracing::debug!(capacity, queue_limit, policy = %policy.kind(), "Limiter created");
        Ok(Self {
            shared: Arc::new(Shared {
                capacity,
                queue_limit,
                state: Mutex::new(State {
                    available: capacity,
                    in_flight: 0,
                    policy,
                }),
                counters: Counters::default(),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn queue_limit(&self) -> usize {
        self.shared.queue_limit
    }

    pub fn policy_kind(&self) -> PolicyKind {
        self.shared.lock_state().policy.kind()
    }

    pub fn available(&self) -> usize {
        self.shared.lock_state().available
    }

    pub fn in_flight(&self) -> usize {
        self.shared.lock_state().in_flight
    }

    pub fn queue_len(&self) -> usize {
        self.shared.lock_state().policy.len()
    }

    /// Try to take a slot, queueing the caller if none is free.
    ///
    /// [`Entry::Admitted`] and a queued entry that resolves to `true` must each
    /// be paired with exactly one [`exit`](Self::exit).
    pub fn try_enter(&self) -> Entry {
        let mut wakeups = Wakeups::new();
        let mut state = self.shared.lock_state();

        if state.available > 0 {
            state.available -= 1;
            state.in_flight += 1;
            self.shared.counters.record_immediate();
            tracing::debug!(available = state.available, "Admitted immediately");
            return Entry::Admitted;
        }

        let queue_limit = self.shared.queue_limit;
        let has_room = queue_limit > 0
            && (state.policy.len() < queue_limit || state.policy.evict_for_newcomer(&mut wakeups));
        if !has_room {
            self.shared.counters.record_rejected();
            tracing::warn!(
                policy = %state.policy.kind(),
                queue_limit,
                "No slot available and queue full - rejecting"
            );
            return Entry::Rejected;
        }

        let (id, token) = state.policy.enqueue();
        self.shared.counters.record_queued();
        tracing::debug!(waiter = %id, queued = state.policy.len(), "Queued for admission");
        Entry::Queued(Waiting {
            shared: Arc::clone(&self.shared),
            pending: Some(Pending { id, token }),
            enqueued_at: Instant::now(),
        })
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut state = self.shared.lock_state();
        if state.available == 0 {
            return None;
        }
        state.available -= 1;
        state.in_flight += 1;
        self.shared.counters.record_immediate();
        Some(Permit::new(self.clone()))
    }

    /// Give back a slot. The next waiter in policy order inherits it directly.
    ///
    /// Slots are not tied to callers, so an unmatched call is only caught when
    /// nothing is in flight ([`LimiterError::ExitWithoutAdmission`]). While
    /// other callers hold slots it releases one of theirs. Use [`Permit`]
    /// (via [`acquire`](Self::acquire)) when pairing cannot be guaranteed by
    /// hand.
    pub fn exit(&self) -> Result<(), LimiterError> {
        let mut wakeups = Wakeups::new();
        let mut state = self.shared.lock_state();

        if state.in_flight == 0 {
            tracing::error!(
                capacity = self.shared.capacity,
                "Bug: exit called without a matching admission"
            );
            return Err(LimiterError::ExitWithoutAdmission {
                capacity: self.shared.capacity,
            });
        }

        let handed_off = state.vacate(&mut wakeups);
        tracing::debug!(
            available = state.available,
            queued = state.policy.len(),
            handed_off,
            "Slot released"
        );
        Ok(())
    }

    /// Wait for admission. Returns whether the caller was admitted.
    pub async fn enter(&self) -> bool {
        match self.try_enter() {
            Entry::Admitted => true,
            Entry::Queued(waiting) => waiting.await,
            Entry::Rejected => false,
        }
    }

    /// Wait for admission and wrap the slot in a [`Permit`].
    pub async fn acquire(&self) -> Result<Permit, LimiterError> {
        let waiting = match self.try_enter() {
            Entry::Admitted => return Ok(Permit::new(self.clone())),
            Entry::Queued(waiting) => waiting,
            Entry::Rejected => return Err(LimiterError::Rejected),
        };
        self.into_permit(waiting.await)
    }

    /// Like [`acquire`](Self::acquire), but gives up when `cancel` fires.
    ///
    /// A waiter released at the same moment as the cancellation keeps its slot.
    pub async fn acquire_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Permit, LimiterError> {
        let mut waiting = match self.try_enter() {
            Entry::Admitted => return Ok(Permit::new(self.clone())),
            Entry::Queued(waiting) => waiting,
            Entry::Rejected => return Err(LimiterError::Rejected),
        };

        let admitted = tokio::select! {
            admitted = &mut waiting => admitted,
            _ = cancel.cancelled() => {
                if waiting.cancel() {
                    tracing::warn!("Cancelled while waiting for admission");
                    return Err(LimiterError::Cancelled);
                }
                waiting.await
            }
        };
        self.into_permit(admitted)
    }

    /// Like [`acquire`](Self::acquire), but gives up after `timeout`.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Permit, LimiterError> {
        let mut waiting = match self.try_enter() {
            Entry::Admitted => return Ok(Permit::new(self.clone())),
            Entry::Queued(waiting) => waiting,
            Entry::Rejected => return Err(LimiterError::Rejected),
        };

        let admitted = match tokio::time::timeout(timeout, &mut waiting).await {
            Ok(admitted) => admitted,
            Err(_) => {
                if waiting.cancel() {
                    tracing::warn!(timeout = ?timeout, "Timeout waiting for admission");
                    return Err(LimiterError::Timeout { timeout });
                }
                waiting.await
            }
        };
        self.into_permit(admitted)
    }

    fn into_permit(&self, admitted: bool) -> Result<Permit, LimiterError> {
        if admitted {
            Ok(Permit::new(self.clone()))
        } else {
            Err(LimiterError::Rejected)
        }
    }

    pub fn stats(&self) -> LimiterStats {
        let gauges = {
            let state = self.shared.lock_state();
            Gauges {
                policy: state.policy.kind(),
                capacity: self.shared.capacity,
                available: state.available,
                in_flight: state.in_flight,
                queued: state.policy.len(),
                queue_limit: self.shared.queue_limit,
            }
        };
        self.shared.counters.snapshot(gauges)
    }
}

struct Pending {
    id: WaiterId,
    token: SignalToken,
}

/// A queued caller's claim on the limiter.
///
/// Resolves to `true` once the caller has been handed a slot (which it must
/// later give back with [`Limiter::exit`]) or `false` if it was rejected.
/// Dropping it before it resolves withdraws the caller; a slot granted in the
/// meantime is passed on to the next waiter.
pub struct Waiting {
    shared: Arc<Shared>,
    pending: Option<Pending>,
    enqueued_at: Instant,
}

impl fmt::Debug for Waiting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiting")
            .field("id", &self.id())
            .field("waited", &self.enqueued_at.elapsed())
            .finish()
    }
}

impl Waiting {
    /// `None` once the outcome has been observed.
    pub fn id(&self) -> Option<WaiterId> {
        self.pending.as_ref().map(|p| p.id)
    }

    pub fn status(&self) -> SignalStatus {
        match &self.pending {
            Some(pending) => pending.token.status().unwrap_or(SignalStatus::Completed),
            None => SignalStatus::Completed,
        }
    }

    /// Withdraw the caller if it is still queued, resolving it to `false`.
    ///
    /// Returns `false` if the caller had already been resolved; awaiting then
    /// yields that earlier outcome.
    pub fn cancel(&self) -> bool {
        let Some(pending) = &self.pending else {
            return false;
        };

        let mut wakeups = Wakeups::new();
        let mut state = self.shared.lock_state();
        let Some(token) = state.policy.remove(pending.id) else {
            return false;
        };
        match token.complete(false) {
            Ok(wakeup) => wakeups.push(wakeup),
            Err(e) => {
                tracing::error!(waiter = %pending.id, error = %e, "Bug: queued waiter signal already resolved");
            }
        }
        tracing::debug!(waiter = %pending.id, queued = state.policy.len(), "Waiter cancelled");
        true
    }
}

impl Future for Waiting {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        let Some(pending) = self.pending.as_mut() else {
            debug_assert!(false, "Waiting polled after completion");
            tracing::error!("Bug: Waiting polled after completion");
            return Poll::Ready(false);
        };

        let result = match Pin::new(&mut pending.token).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(result) => result,
        };

        let Some(pending) = self.pending.take() else {
            return Poll::Ready(false);
        };
        let waited = self.enqueued_at.elapsed();
        let admitted = match result {
            Ok(admitted) => {
                self.shared.lock_state().policy.recycle(pending.token.into_signal());
                admitted
            }
            Err(e) => {
                tracing::error!(waiter = %pending.id, error = %e, "Bug: waiter signal observed with stale token");
                false
            }
        };
        self.shared.counters.record_dequeued(admitted, waited);
        tracing::debug!(waiter = %pending.id, admitted, waited = ?waited, "Left admission queue");
        Poll::Ready(admitted)
    }
}

impl Drop for Waiting {
    fn drop(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        let mut wakeups = Wakeups::new();
        let mut state = self.shared.lock_state();

        let admitted = if let Some(token) = state.policy.remove(pending.id) {
            token.signal().abandon();
            false
        } else {
            match pending.token.try_take() {
                Ok(Some(admitted)) => admitted,
                Ok(None) => {
                    debug_assert!(false, "waiter missing from queue but unresolved");
                    tracing::error!(waiter = %pending.id, "Bug: waiter missing from queue but unresolved");
                    pending.token.signal().abandon();
                    false
                }
                Err(e) => {
                    tracing::error!(waiter = %pending.id, error = %e, "Bug: dropped waiter holds stale token");
                    self.shared
                        .counters
                        .record_dequeued(false, self.enqueued_at.elapsed());
                    return;
                }
            }
        };

        if admitted {
            tracing::debug!(waiter = %pending.id, "Admitted waiter dropped before observing - passing slot on");
            state.vacate(&mut wakeups);
        } else {
            tracing::debug!(waiter = %pending.id, "Waiter dropped while queued");
        }
        state.policy.recycle(pending.token.into_signal());
        // The caller never ran, whether or not a slot reached it.
        self.shared
            .counters
            .record_dequeued(false, self.enqueued_at.elapsed());
    }
}
