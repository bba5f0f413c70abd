//! Capture arbitration
//!
//! At most one capture session may hold an open camera across all recorder
//! instances. The arbiter is created by the composition root and shared by
//! reference with every session.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Identity of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(Uuid);

impl OwnerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something that can hold the arbitration token
pub trait CaptureOwner: Send + Sync {
    fn owner_id(&self) -> OwnerId;

    /// Stop the live source and drop the render surface, synchronously.
    /// Called with the token already taken away.
    fn release_for_preemption(&self);
}

struct Holder {
    id: OwnerId,
    owner: Weak<dyn CaptureOwner>,
}

/// Process-wide exclusivity token for the camera
#[derive(Default)]
pub struct CaptureArbiter {
    holder: Mutex<Option<Holder>>,
}

impl CaptureArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self) -> Option<OwnerId> {
        self.holder.lock().as_ref().map(|h| h.id)
    }

    pub fn is_held_by(&self, id: OwnerId) -> bool {
        self.holder() == Some(id)
    }

    /// Take the token if it is free (or its holder is gone) or already ours
    pub fn try_acquire(&self, owner: &Arc<dyn CaptureOwner>) -> bool {
        let id = owner.owner_id();
        let mut holder = self.holder.lock();
        if let Some(current) = holder.as_ref() {
            if current.id != id && current.owner.strong_count() > 0 {
                return false;
            }
        }
        *holder = Some(Holder {
            id,
            owner: Arc::downgrade(owner),
        });
        true
    }

    /// Give the token back. Only the holder can release it.
    pub fn release(&self, id: OwnerId) -> bool {
        let mut holder = self.holder.lock();
        if holder.as_ref().is_some_and(|h| h.id == id) {
            *holder = None;
            true
        } else {
            false
        }
    }

    /// Take the token away from any other holder and make it release its
    /// resources. Returns the evicted owner once its release has completed.
    pub fn preempt(&self, challenger: OwnerId) -> Option<OwnerId> {
        let evicted = {
            let mut holder = self.holder.lock();
            match holder.take() {
                Some(current) if current.id != challenger => Some(current),
                other => {
                    *holder = other;
                    None
                }
            }
        };

        evicted.map(|current| {
            if let Some(owner) = current.owner.upgrade() {
                tracing::info!("Pre-empting capture session {}", current.id);
                owner.release_for_preemption();
            }
            current.id
        })
    }

    /// Acquire the token, pre-empting whoever holds it
    pub fn claim(&self, owner: &Arc<dyn CaptureOwner>) -> Option<OwnerId> {
        let id = owner.owner_id();
        let evicted = {
            let mut holder = self.holder.lock();
            let previous = holder.replace(Holder {
                id,
                owner: Arc::downgrade(owner),
            });
            previous.filter(|p| p.id != id)
        };

        evicted.map(|current| {
            if let Some(previous) = current.owner.upgrade() {
                tracing::info!("Capture session {} displaced {}", id, current.id);
                previous.release_for_preemption();
            }
            current.id
        })
    }
}

impl std::fmt::Debug for CaptureArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureArbiter")
            .field("holder", &self.holder())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Owner {
        id: OwnerId,
        arbiter: Arc<CaptureArbiter>,
        released: AtomicUsize,
    }

    impl Owner {
        fn new(arbiter: &Arc<CaptureArbiter>) -> Arc<Self> {
            Arc::new(Self {
                id: OwnerId::new(),
                arbiter: arbiter.clone(),
                released: AtomicUsize::new(0),
            })
        }
    }

    impl CaptureOwner for Owner {
        fn owner_id(&self) -> OwnerId {
            self.id
        }

        fn release_for_preemption(&self) {
            // Re-entrant release must not deadlock
            self.arbiter.release(self.id);
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_single_holder() {
        let arbiter = Arc::new(CaptureArbiter::new());
        let a = Owner::new(&arbiter);
        let b = Owner::new(&arbiter);
        let a_dyn: Arc<dyn CaptureOwner> = a.clone();
        let b_dyn: Arc<dyn CaptureOwner> = b.clone();

        assert!(arbiter.try_acquire(&a_dyn));
        assert!(arbiter.try_acquire(&a_dyn));
        assert!(!arbiter.try_acquire(&b_dyn));
        assert!(!arbiter.release(b.id));
        assert!(arbiter.release(a.id));
        assert!(arbiter.try_acquire(&b_dyn));
    }

    #[test]
    fn test_preempt_releases_other_holder() {
        let arbiter = Arc::new(CaptureArbiter::new());
        let a = Owner::new(&arbiter);
        let b = Owner::new(&arbiter);
        let a_dyn: Arc<dyn CaptureOwner> = a.clone();

        arbiter.try_acquire(&a_dyn);
        assert_eq!(arbiter.preempt(b.id), Some(a.id));
        assert_eq!(a.released.load(Ordering::SeqCst), 1);
        assert_eq!(arbiter.holder(), None);

        // Nothing left to pre-empt
        assert_eq!(arbiter.preempt(b.id), None);
    }

    #[test]
    fn test_preempt_keeps_own_token() {
        let arbiter = Arc::new(CaptureArbiter::new());
        let a = Owner::new(&arbiter);
        let a_dyn: Arc<dyn CaptureOwner> = a.clone();

        arbiter.try_acquire(&a_dyn);
        assert_eq!(arbiter.preempt(a.id), None);
        assert!(arbiter.is_held_by(a.id));
        assert_eq!(a.released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_claim_displaces_holder() {
        let arbiter = Arc::new(CaptureArbiter::new());
        let a = Owner::new(&arbiter);
        let b = Owner::new(&arbiter);
        let a_dyn: Arc<dyn CaptureOwner> = a.clone();
        let b_dyn: Arc<dyn CaptureOwner> = b.clone();

        arbiter.try_acquire(&a_dyn);
        assert_eq!(arbiter.claim(&b_dyn), Some(a.id));
        assert!(arbiter.is_held_by(b.id));
        assert_eq!(a.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_holder_does_not_block() {
        let arbiter = Arc::new(CaptureArbiter::new());
        let b = Owner::new(&arbiter);
        {
            let a = Owner::new(&arbiter);
            let a_dyn: Arc<dyn CaptureOwner> = a;
            arbiter.try_acquire(&a_dyn);
        }
        let b_dyn: Arc<dyn CaptureOwner> = b;
        assert!(arbiter.try_acquire(&b_dyn));
    }
}
