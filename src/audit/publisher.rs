// Audit publisher - fans events out to subscribed observers

use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use super::{AuditEvent, Observer};

/// Default limit of notifications in flight across all observers
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Keeps the observer list and spawns one bounded task per notification
///
/// An event that finds no free permit is dropped for that observer with a
/// warning. Nothing is retried or queued.
pub struct AuditPublisher {
    observers: RwLock<Vec<Arc<dyn Observer>>>,
    permits: Arc<Semaphore>,
}

impl Default for AuditPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}

impl AuditPublisher {
    pub fn new(max_in_flight: usize) -> Self {
        AuditPublisher {
            observers: RwLock::new(Vec::new()),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer>) {
        debug!(observer = observer.name(), "Audit observer subscribed");
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn unsubscribe(&self, observer: &Arc<dyn Observer>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    pub fn has_observers(&self) -> bool {
        !self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Hands `event` to every observer without waiting for delivery.
    ///
    /// Must be called from within a tokio runtime.
    pub fn publish(&self, event: AuditEvent) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if observers.is_empty() {
            return;
        }

        let event = Arc::new(event);
        for observer in observers {
            let permit = match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(
                        observer = observer.name(),
                        metrics = event.metrics.len(),
                        "Audit backlog full, dropping event"
                    );
                    continue;
                }
            };

            let event = Arc::clone(&event);
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = observer.notify(&event).await {
                    error!(observer = observer.name(), error = %e, "Audit notification failed");
                }
            });
        }
    }
}
