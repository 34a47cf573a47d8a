//! Concurrency gate: a counting semaphore with live capacity adjustment.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, watch};

/// Errors from gate operations.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("gate capacity must be at least 1")]
    CapacityInvalid,
}

/// A slot in the gate. Dropping it releases the slot.
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    in_flight: watch::Sender<usize>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Counting semaphore bounding live workers.
///
/// `set_capacity` drains before swapping: acquires that began before the
/// resize finish against the old capacity, acquires issued after it observe
/// the new one.
pub struct ConcurrencyGate {
    slots: Mutex<Arc<Semaphore>>,
    capacity: AtomicUsize,
    in_flight: watch::Sender<usize>,
}

impl ConcurrencyGate {
    /// Create a gate with `capacity` slots.
    pub fn new(capacity: usize) -> Result<Self, GateError> {
        if capacity == 0 {
            return Err(GateError::CapacityInvalid);
        }
        let (in_flight, _) = watch::channel(0);
        Ok(Self {
            slots: Mutex::new(Arc::new(Semaphore::new(capacity))),
            capacity: AtomicUsize::new(capacity),
            in_flight,
        })
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> GatePermit {
        let slots = self.slots.lock().await.clone();
        let permit = slots
            .acquire_owned()
            .await
            .expect("gate semaphore is never closed");
        self.in_flight.send_modify(|n| *n += 1);
        GatePermit {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        }
    }

    /// Take a slot if one is free right now.
    pub async fn try_acquire(&self) -> Option<GatePermit> {
        let slots = self.slots.lock().await.clone();
        let permit = slots.try_acquire_owned().ok()?;
        self.in_flight.send_modify(|n| *n += 1);
        Some(GatePermit {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        })
    }

    /// Reallocate the gate with a new capacity.
    ///
    /// Blocks new acquires, waits until every outstanding permit is back,
    /// then swaps in the new slot count.
    pub async fn set_capacity(&self, capacity: usize) -> Result<(), GateError> {
        if capacity == 0 {
            return Err(GateError::CapacityInvalid);
        }
        let mut slots = self.slots.lock().await;
        let mut idle = self.in_flight.subscribe();
        while *idle.borrow_and_update() != 0 {
            if idle.changed().await.is_err() {
                break;
            }
        }
        *slots = Arc::new(Semaphore::new(capacity));
        self.capacity.store(capacity, Ordering::SeqCst);
        Ok(())
    }

    /// Configured slot count.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    /// Outstanding permits.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Whether no permits are outstanding.
    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }
}
