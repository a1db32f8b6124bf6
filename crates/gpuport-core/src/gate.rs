//! Bounded concurrency gate for outstanding network calls.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded counting semaphore limiting simultaneous in-flight operations
/// for one provider. Acquire before each network call; the permit releases
/// on drop regardless of how the call exits.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    width: usize,
}

impl ConcurrencyGate {
    pub const DEFAULT_WIDTH: usize = 3;

    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(width)),
            width,
        }
    }

    pub const fn width(&self) -> usize {
        self.width
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Suspends until a permit is free.
    pub async fn acquire(&self) -> GatePermit {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("gate semaphore is never closed");
        GatePermit { _permit: permit }
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WIDTH)
    }
}

/// RAII permit. Dropping it returns capacity to the gate.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn width_has_a_floor_of_one() {
        assert_eq!(ConcurrencyGate::new(0).width(), 1);
        assert_eq!(ConcurrencyGate::new(5).width(), 5);
    }

    #[tokio::test]
    async fn permit_release_restores_capacity() {
        let gate = ConcurrencyGate::new(2);
        let first = gate.acquire().await;
        let _second = gate.acquire().await;
        assert_eq!(gate.available(), 0);

        drop(first);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn in_flight_count_never_exceeds_width() {
        const WIDTH: usize = 3;
        const TASKS: usize = 24;

        let gate = ConcurrencyGate::new(WIDTH);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(TASKS);
        for _ in 0..TASKS {
            let gate = gate.clone();
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await;
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= WIDTH);
        assert_eq!(gate.available(), WIDTH);
    }
}
