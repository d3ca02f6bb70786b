//! Admission control for outstanding streams shared by every session of a host.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ChatError;

pub const DEFAULT_MAX_ACTIVE_STREAMS: usize = 3;
pub const DEFAULT_MAX_QUEUED_STREAMS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionLimits {
    /// Streams allowed to be open at once. Values below one are raised to one.
    pub max_active: usize,
    /// Requests allowed to wait for an active slot before `LimitReached`.
    pub max_queued: usize,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            max_active: DEFAULT_MAX_ACTIVE_STREAMS,
            max_queued: DEFAULT_MAX_QUEUED_STREAMS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionControl {
    inner: Arc<AdmissionInner>,
}

#[derive(Debug)]
struct AdmissionInner {
    limits: AdmissionLimits,
    permits: Arc<Semaphore>,
    waiting: AtomicUsize,
}

impl Default for AdmissionControl {
    fn default() -> Self {
        Self::new(AdmissionLimits::default())
    }
}

impl AdmissionControl {
    pub fn new(limits: AdmissionLimits) -> Self {
        let limits = AdmissionLimits {
            max_active: limits.max_active.max(1),
            ..limits
        };
        Self {
            inner: Arc::new(AdmissionInner {
                limits,
                permits: Arc::new(Semaphore::new(limits.max_active)),
                waiting: AtomicUsize::new(0),
            }),
        }
    }

    pub fn limits(&self) -> AdmissionLimits {
        self.inner.limits
    }

    /// Streams currently holding an active slot.
    pub fn active(&self) -> usize {
        self.inner.limits.max_active - self.inner.permits.available_permits()
    }

    /// Requests currently waiting for an active slot.
    pub fn queued(&self) -> usize {
        self.inner.waiting.load(Ordering::Acquire)
    }

    /// Reserve a slot without waiting.
    ///
    /// Takes an active slot when one is free, otherwise a place in the wait
    /// queue. Fails with [`ChatError::LimitReached`] when the queue is full.
    pub fn reserve(&self) -> Result<AdmissionTicket, ChatError> {
        if let Ok(permit) = Arc::clone(&self.inner.permits).try_acquire_owned() {
            return Ok(AdmissionTicket::Ready(permit));
        }

        let max_queued = self.inner.limits.max_queued;
        self.inner
            .waiting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |waiting| {
                (waiting < max_queued).then_some(waiting + 1)
            })
            .map(|_| {
                AdmissionTicket::Queued(QueuedSlot {
                    inner: Arc::clone(&self.inner),
                })
            })
            .map_err(|queued| ChatError::LimitReached { queued })
    }
}

/// A reserved place: either an active slot or a position in the wait queue.
#[derive(Debug)]
pub enum AdmissionTicket {
    Ready(OwnedSemaphorePermit),
    Queued(QueuedSlot),
}

impl AdmissionTicket {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }

    /// Wait for an active slot. The returned guard holds it until dropped.
    pub async fn admit(self) -> Result<Admitted, ChatError> {
        match self {
            Self::Ready(permit) => Ok(Admitted { _permit: permit }),
            Self::Queued(slot) => {
                let permit = Arc::clone(&slot.inner.permits)
                    .acquire_owned()
                    .await
                    .map_err(|_| ChatError::Runtime("admission semaphore closed".to_string()))?;
                drop(slot);
                Ok(Admitted { _permit: permit })
            }
        }
    }
}

/// Position in the wait queue, released on drop.
#[derive(Debug)]
pub struct QueuedSlot {
    inner: Arc<AdmissionInner>,
}

impl Drop for QueuedSlot {
    fn drop(&mut self) {
        self.inner.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}

/// An active stream slot, released on drop.
#[derive(Debug)]
pub struct Admitted {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::{AdmissionControl, AdmissionLimits};
    use crate::error::ChatError;

    fn control(max_active: usize, max_queued: usize) -> AdmissionControl {
        AdmissionControl::new(AdmissionLimits {
            max_active,
            max_queued,
        })
    }

    #[test]
    fn reserve_queues_then_signals_limit_reached() {
        let control = control(1, 1);

        let first = control.reserve().expect("active slot");
        assert!(!first.is_queued());
        assert_eq!(control.active(), 1);

        let second = control.reserve().expect("queued slot");
        assert!(second.is_queued());
        assert_eq!(control.queued(), 1);

        let third = control.reserve().expect_err("queue is full");
        assert!(matches!(third, ChatError::LimitReached { queued: 1 }));

        drop(second);
        assert_eq!(control.queued(), 0);
        drop(first);
        assert_eq!(control.active(), 0);
    }

    #[test]
    fn zero_active_limit_is_raised_to_one() {
        let control = control(0, 0);
        assert_eq!(control.limits().max_active, 1);
        assert!(control.reserve().is_ok());
    }

    #[tokio::test]
    async fn queued_ticket_is_admitted_when_slot_frees() {
        let control = control(1, 4);
        let first = control.reserve().expect("active slot").admit().await.expect("admit");
        let queued = control.reserve().expect("queued slot");

        let waiter = tokio::spawn(async move { queued.admit().await.map(|_| ()) });
        tokio::task::yield_now().await;
        assert_eq!(control.queued(), 1);

        drop(first);
        waiter
            .await
            .expect("join waiter")
            .expect("queued ticket admitted");
        assert_eq!(control.queued(), 0);
    }
}
