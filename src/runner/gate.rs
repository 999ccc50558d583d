//! Process-wide admission control for task executions.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded token pool shared by every job in the process.
///
/// Capacity 0 disables gating: `acquire()` returns immediately.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    capacity: usize,
    semaphore: Option<Arc<Semaphore>>,
}

/// Slot held for the duration of one execution. Released on drop.
#[derive(Debug)]
pub struct GatePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        let semaphore = (capacity > 0).then(|| Arc::new(Semaphore::new(capacity)));
        Self {
            capacity,
            semaphore,
        }
    }

    /// A gate that admits everything.
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Configured capacity; 0 means unbounded.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots, or `None` when the gate is disabled.
    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> GatePermit {
        let permit = match &self.semaphore {
            // The semaphore is never closed, so this only waits.
            Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
            None => None,
        };
        GatePermit { _permit: permit }
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn unbounded_never_blocks() {
        let gate = ConcurrencyGate::unbounded();
        let _a = gate.acquire().await;
        let _b = gate.acquire().await;
        assert_eq!(gate.available(), None);
        assert_eq!(gate.capacity(), 0);
    }

    #[tokio::test]
    async fn permit_released_on_drop() {
        let gate = ConcurrencyGate::new(1);
        let permit = gate.acquire().await;
        assert_eq!(gate.available(), Some(0));

        let blocked = tokio::time::timeout(Duration::from_millis(50), gate.acquire()).await;
        assert!(blocked.is_err());

        drop(permit);
        assert_eq!(gate.available(), Some(1));
        let _again = gate.acquire().await;
    }

    #[tokio::test]
    async fn permit_released_when_holder_panics() {
        let gate = ConcurrencyGate::new(1);
        let inner = gate.clone();
        let handle = tokio::spawn(async move {
            let _permit = inner.acquire().await;
            panic!("boom");
        });
        assert!(handle.await.unwrap_err().is_panic());
        assert_eq!(gate.available(), Some(1));
    }

    #[tokio::test]
    async fn clones_share_capacity() {
        let gate = ConcurrencyGate::new(2);
        let other = gate.clone();
        let _a = gate.acquire().await;
        let _b = other.acquire().await;
        assert_eq!(gate.available(), Some(0));
    }
}
