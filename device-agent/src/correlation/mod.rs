//! # Correlation Store
//!
//! Single-slot, write-once response containers. Transport callbacks
//! deliver accepted or rejected payloads on the I/O task; the driving
//! task polls with a bounded wait. One slot exists per pending request,
//! and a slot is fulfilled at most once per provisioning attempt.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use shared::error::{ProvisionError, ProvisionResult};
use shared::types::ErrorResponse;

/// What a response handler delivers into a slot: the parsed accepted
/// payload, or the service's rejection.
pub type SlotOutcome<T> = Result<T, ErrorResponse>;

struct SlotInner<T> {
    /// Operation the pending request belongs to, used in diagnostics
    operation: String,
    state: Mutex<Option<SlotOutcome<T>>>,
}

/// Write-once container for one pending response.
///
/// Clones share the same slot, so one clone can live inside a transport
/// handler while the driving task waits on another.
pub struct ResponseSlot<T> {
    inner: Arc<SlotInner<T>>,
}

impl<T> Clone for ResponseSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> ResponseSlot<T> {
    /// Create an empty slot for the named operation
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SlotInner {
                operation: operation.into(),
                state: Mutex::new(None),
            }),
        }
    }

    /// Operation this slot belongs to
    pub fn operation(&self) -> &str {
        &self.inner.operation
    }

    /// Fulfill the slot exactly once.
    ///
    /// A second call is a protocol violation: the first outcome is kept
    /// and `DuplicateResponse` is returned for the caller to log.
    pub fn fulfill(&self, outcome: SlotOutcome<T>) -> ProvisionResult<()> {
        let mut state = self.inner.state.lock();
        if state.is_some() {
            return Err(ProvisionError::DuplicateResponse {
                operation: self.inner.operation.clone(),
            });
        }
        *state = Some(outcome);
        Ok(())
    }

    /// Non-blocking snapshot of the slot
    pub fn poll(&self) -> Option<SlotOutcome<T>> {
        self.inner.state.lock().clone()
    }

    /// Bounded wait for the slot to be fulfilled.
    ///
    /// Checks `poll()` before each sleep; after `max_attempts` empty
    /// checks the wait fails with `Timeout` naming the expected response.
    /// A rejection outcome is surfaced as `ServiceRejected`.
    pub async fn wait(&self, max_attempts: u32, interval: Duration) -> ProvisionResult<T> {
        for attempt in 1..=max_attempts {
            if let Some(outcome) = self.poll() {
                return match outcome {
                    Ok(value) => Ok(value),
                    Err(rejection) => Err(rejection.into_rejection(&self.inner.operation)),
                };
            }
            debug!(
                operation = %self.inner.operation,
                attempt,
                max_attempts,
                "No response yet, waiting"
            );
            tokio::time::sleep(interval).await;
        }
        Err(ProvisionError::Timeout {
            expected: self.inner.operation.clone(),
            attempts: max_attempts,
        })
    }
}
