//! Concurrency gate
//!
//! A fixed number of slots. One loop iteration holds one slot from before
//! its first pop until its job (if any) is done, so the gate bounds idle
//! polls as well as running handlers.

use crate::error::{DispatchError, DispatchResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Default)]
struct Occupancy {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Bounded counting gate.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    occupancy: Arc<Occupancy>,
}

impl ConcurrencyGate {
    /// Create a gate with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            occupancy: Arc::new(Occupancy::default()),
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> DispatchResult<GatePermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::GateClosed)?;

        let current = self.occupancy.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.occupancy.peak.fetch_max(current, Ordering::SeqCst);

        Ok(GatePermit {
            _permit: permit,
            occupancy: Arc::clone(&self.occupancy),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.occupancy.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of slots ever held at once.
    pub fn peak(&self) -> usize {
        self.occupancy.peak.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// A held slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    occupancy: Arc<Occupancy>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.occupancy.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
