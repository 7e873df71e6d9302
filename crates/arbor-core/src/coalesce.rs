//! In-flight request sharing for tree reads.
//!
//! The first caller for a key runs the query; callers arriving while it is
//! outstanding block on the same slot and receive a copy of its result. The
//! slot is removed as soon as the leader finishes, whether it succeeded or
//! not, so a failed read is never cached.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{ArborError, Result};

enum SlotState<V> {
    Pending,
    Done(std::result::Result<V, Arc<ArborError>>),
}

struct Slot<V> {
    state: Mutex<SlotState<V>>,
    cv: Condvar,
    followers: Mutex<usize>,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            cv: Condvar::new(),
            followers: Mutex::new(0),
        }
    }
}

pub(crate) struct RequestCoalescer<V> {
    slots: Arc<Mutex<HashMap<String, Arc<Slot<V>>>>>,
}

impl<V> Clone for RequestCoalescer<V> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<V> Default for RequestCoalescer<V> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<V> std::fmt::Debug for RequestCoalescer<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoalescer").finish_non_exhaustive()
    }
}

/// Publishes the leader's outcome even if the query panics, so followers
/// never wait on a slot nobody will fill.
struct LeaderGuard<'a, V> {
    slots: &'a Mutex<HashMap<String, Arc<Slot<V>>>>,
    key: &'a str,
    slot: Arc<Slot<V>>,
    published: bool,
}

impl<V> LeaderGuard<'_, V> {
    fn publish(&mut self, outcome: std::result::Result<V, Arc<ArborError>>) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.remove(self.key);
        }
        if let Ok(mut state) = self.slot.state.lock() {
            *state = SlotState::Done(outcome);
        }
        self.slot.cv.notify_all();
        self.published = true;
    }
}

impl<V> Drop for LeaderGuard<'_, V> {
    fn drop(&mut self) {
        if !self.published {
            self.publish(Err(Arc::new(ArborError::Internal(format!(
                "coalesced request aborted: {}",
                self.key
            )))));
        }
    }
}

impl<V: Clone> RequestCoalescer<V> {
    pub(crate) fn run<F>(&self, key: &str, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        let (slot, leader) = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| ArborError::lock_poisoned("coalescer"))?;
            match slots.get(key) {
                Some(slot) => (Arc::clone(slot), false),
                None => {
                    let slot = Arc::new(Slot::new());
                    slots.insert(key.to_string(), Arc::clone(&slot));
                    (slot, true)
                }
            }
        };

        if !leader {
            return Self::follow(&slot);
        }

        let mut guard = LeaderGuard {
            slots: &self.slots,
            key,
            slot,
            published: false,
        };
        match fetch() {
            Ok(value) => {
                guard.publish(Ok(value.clone()));
                Ok(value)
            }
            Err(err) => {
                guard.publish(Err(Arc::new(err.replicate())));
                Err(err)
            }
        }
    }

    fn follow(slot: &Slot<V>) -> Result<V> {
        {
            let mut followers = slot
                .followers
                .lock()
                .map_err(|_| ArborError::lock_poisoned("coalescer slot"))?;
            *followers += 1;
        }
        let mut state = slot
            .state
            .lock()
            .map_err(|_| ArborError::lock_poisoned("coalescer slot"))?;
        loop {
            match &*state {
                SlotState::Done(Ok(value)) => return Ok(value.clone()),
                SlotState::Done(Err(err)) => return Err(err.replicate()),
                SlotState::Pending => {
                    state = slot
                        .cv
                        .wait(state)
                        .map_err(|_| ArborError::lock_poisoned("coalescer slot"))?;
                }
            }
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    /// Callers currently blocked on `key`'s leader.
    #[cfg(test)]
    pub(crate) fn followers(&self, key: &str) -> usize {
        let Ok(slots) = self.slots.lock() else {
            return 0;
        };
        slots
            .get(key)
            .and_then(|slot| slot.followers.lock().ok().map(|count| *count))
            .unwrap_or(0)
    }
}
