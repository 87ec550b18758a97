//! Per-path request cache with in-flight de-duplication
//!
//! Each slot is either a pending shared future or a settled value with an
//! optional expiry. Lookup order is fixed:
//! 1. a pending flight for the key is joined, never duplicated
//! 2. `bypass` discards any settled value
//! 3. an unexpired settled value is returned without a request
//! 4. otherwise a new flight is started and parked in the slot
//!
//! A flight only settles its own slot: every flight carries a ticket and a
//! completion whose ticket no longer matches the slot (the key was invalidated
//! meanwhile) is ignored.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use lmio_common::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A request shared by every caller that asked for the same key while it ran
pub type Flight<T> = Shared<BoxFuture<'static, Result<T>>>;

/// Value produced by a fetch plus the instant it stops being valid
pub type Fetched<T> = (T, Option<DateTime<Utc>>);

/// What happens to a slot once its flight succeeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Keep the value (listings, media URLs)
    Keep,
    /// Forget it; the cache only coalesces concurrent requests (decoded images)
    InFlightOnly,
}

enum Slot<T> {
    Pending { ticket: u64, flight: Flight<T> },
    Ready { value: T, expires: Option<DateTime<Utc>> },
}

/// Observable slot state, for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Pending,
    Ready { expires: Option<DateTime<Utc>> },
}

pub struct FlightCache<T> {
    name: &'static str,
    retention: Retention,
    slots: Mutex<HashMap<String, Slot<T>>>,
    tickets: AtomicU64,
}

impl<T> FlightCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, retention: Retention) -> Arc<Self> {
        Arc::new(Self {
            name,
            retention,
            slots: Mutex::new(HashMap::new()),
            tickets: AtomicU64::new(0),
        })
    }

    /// Resolve `key` through the cache, calling `fetch` only when a new flight is needed
    pub async fn get_or_fetch<F, Fut>(self: &Arc<Self>, key: &str, bypass: bool, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Fetched<T>>> + Send + 'static,
    {
        let flight = {
            let mut slots = self.lock();

            match slots.get(key) {
                Some(Slot::Pending { flight, .. }) => {
                    debug!(cache = self.name, key = %key, "Joining in-flight request");
                    flight.clone()
                }
                Some(Slot::Ready { value, expires }) if !bypass && is_fresh(*expires) => {
                    debug!(cache = self.name, key = %key, "Cache hit");
                    return Ok(value.clone());
                }
                existing => {
                    if existing.is_some() {
                        debug!(cache = self.name, key = %key, bypass, "Discarding cached entry");
                    }

                    let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
                    let flight = self.start_flight(key.to_string(), ticket, fetch());
                    slots.insert(
                        key.to_string(),
                        Slot::Pending {
                            ticket,
                            flight: flight.clone(),
                        },
                    );
                    flight
                }
            }
        };

        flight.await
    }

    fn start_flight<Fut>(self: &Arc<Self>, key: String, ticket: u64, fetch: Fut) -> Flight<T>
    where
        Fut: Future<Output = Result<Fetched<T>>> + Send + 'static,
    {
        let cache = Arc::clone(self);
        async move {
            let outcome = fetch.await;
            cache.settle(&key, ticket, &outcome);
            outcome.map(|(value, _)| value)
        }
        .boxed()
        .shared()
    }

    fn settle(&self, key: &str, ticket: u64, outcome: &Result<Fetched<T>>) {
        let mut slots = self.lock();

        let owns_slot = matches!(
            slots.get(key),
            Some(Slot::Pending { ticket: t, .. }) if *t == ticket
        );
        if !owns_slot {
            debug!(cache = self.name, key = %key, "Ignoring completion of invalidated request");
            return;
        }

        match (outcome, self.retention) {
            (Ok((value, expires)), Retention::Keep) => {
                slots.insert(
                    key.to_string(),
                    Slot::Ready {
                        value: value.clone(),
                        expires: *expires,
                    },
                );
            }
            _ => {
                slots.remove(key);
            }
        }
    }

    /// Drop whatever the slot for `key` holds; a running flight finishes but is not stored
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn state(&self, key: &str) -> Option<SlotState> {
        self.lock().get(key).map(|slot| match slot {
            Slot::Pending { .. } => SlotState::Pending,
            Slot::Ready { expires, .. } => SlotState::Ready { expires: *expires },
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot<T>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_fresh(expires: Option<DateTime<Utc>>) -> bool {
    expires.map_or(true, |at| Utc::now() < at)
}
