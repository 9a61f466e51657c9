//! System-wide bound on concurrent inference.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::{TtsError, TtsResult};

/// Counting gate in front of the inference backend.
///
/// Waiters are admitted in FIFO order. A slot is held by the returned
/// [`AdmissionPermit`] and given back when the permit is dropped, whichever
/// way the guarded work ends.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    timeout: Option<Duration>,
}

/// RAII slot in the admission gate.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionController {
    pub fn new(capacity: usize, timeout: Option<Duration>) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            timeout,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.semaphore.available_permits())
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> TtsResult<AdmissionPermit> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        let permit = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, acquire).await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(timeout_ms = limit.as_millis() as u64, "admission wait timed out");
                    return Err(TtsError::CapacityTimeout(limit));
                }
            },
            None => acquire.await,
        }
        .map_err(|_| TtsError::ShutDown)?;

        debug!(in_flight = self.in_flight(), capacity = self.capacity, "admitted synthesis");
        Ok(AdmissionPermit { _permit: permit })
    }

    /// Refuse all current and future waiters.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_admits_more_than_capacity() {
        let gate = AdmissionController::new(2, None);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let gate = gate.clone();
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let _permit = gate.acquire().await.unwrap();
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn permit_released_on_drop() {
        let gate = AdmissionController::new(1, None);
        let permit = gate.acquire().await.unwrap();
        assert_eq!(gate.in_flight(), 1);
        drop(permit);
        assert_eq!(gate.in_flight(), 0);
        assert!(gate.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn wait_times_out_when_configured() {
        let gate = AdmissionController::new(1, Some(Duration::from_millis(10)));
        let _held = gate.acquire().await.unwrap();
        let err = gate.acquire().await.unwrap_err();
        assert!(matches!(err, TtsError::CapacityTimeout(_)));
    }

    #[tokio::test]
    async fn closed_gate_refuses_waiters() {
        let gate = AdmissionController::new(2, None);
        gate.close();
        assert!(gate.is_closed());
        assert!(matches!(gate.acquire().await, Err(TtsError::ShutDown)));
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        assert_eq!(AdmissionController::new(0, None).capacity(), 1);
    }
}
