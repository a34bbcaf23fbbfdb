//! Request coalescing: one upstream call per fingerprint at a time.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::fingerprint::RequestFingerprint;
use crate::{Error, Result};

type Slot<T> = watch::Receiver<Option<Result<T>>>;

/// Removes the in-flight entry when the producer task ends, including by panic.
struct InFlightGuard<T> {
    in_flight: Arc<DashMap<String, Slot<T>>>,
    key: String,
}

impl<T> Drop for InFlightGuard<T> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// Shares one producer execution between concurrent identical requests.
///
/// The producer runs on its own task. Callers that give up waiting do not
/// cancel it; the remaining waiters still receive the result.
pub struct RequestCoalescer<T> {
    in_flight: Arc<DashMap<String, Slot<T>>>,
}

impl<T> RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Run `producer` unless a call for `fingerprint` is already in flight,
    /// in which case wait for that call's result instead.
    ///
    /// Every waiter observes the same outcome. Failures are not remembered:
    /// once the entry is gone the next caller starts a fresh call.
    pub async fn run_exclusive<F, Fut>(&self, fingerprint: &RequestFingerprint, producer: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let key = fingerprint.as_str().to_string();
        let mut rx = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(slot) => {
                debug!(fingerprint = fingerprint.short(), "joining in-flight request");
                slot.get().clone()
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(None);
                slot.insert(rx.clone());
                let guard = InFlightGuard {
                    in_flight: Arc::clone(&self.in_flight),
                    key,
                };
                let fut = producer();
                tokio::spawn(async move {
                    let outcome = fut.await;
                    drop(guard);
                    let _ = tx.send(Some(outcome));
                });
                rx
            }
        };

        let outcome = {
            let settled = rx.wait_for(Option::is_some).await.map_err(|_| {
                Error::coalescing(format!(
                    "producer for {} ended without a result",
                    fingerprint.short()
                ))
            })?;
            (*settled).clone()
        };
        outcome.unwrap_or_else(|| Err(Error::coalescing("settled slot held no result")))
    }

    /// Number of distinct fingerprints currently being produced.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl<T> Default for RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
