use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::archive::AssetObject;
use crate::status::{deliver, LoadCallback, LoadEvent, LoadStatus};

/// State of one cached asset id.
enum Slot {
    /// Fill in flight, with the callbacks waiting on its result
    Filling(Vec<LoadCallback>),
    Ready(Arc<AssetObject>),
}

/// What a `load_cached` request should do next.
pub(crate) enum Join {
    /// The payload is cached; deliver it right away.
    Hit(Arc<AssetObject>, LoadCallback),
    /// Parked on an in-flight fill.
    Waiting,
    /// Nothing in flight; the caller starts the fill.
    Lead(LoadCallback),
}

/// Queues a fresh fill for an asset, ending with the given callback.
pub(crate) type Refill = Arc<dyn Fn(LoadCallback) + Send + Sync>;

/// Single-flight payload cache keyed by lowercase asset id.
///
/// Callbacks are never invoked while the slot table is locked.
#[derive(Clone, Default)]
pub(crate) struct PayloadCache {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl PayloadCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Join the fill for `id`. A request that finds a fill in flight is sent
    /// `Caching` and parked until the fill completes.
    pub(crate) fn join(&self, id: &str, name: &str, mut callback: LoadCallback) -> Join {
        let key = id.to_ascii_lowercase();
        let mut announced = false;
        loop {
            {
                let mut slots = self.slots.lock();
                match slots.get_mut(&key) {
                    Some(Slot::Ready(asset)) => return Join::Hit(Arc::clone(asset), callback),
                    Some(Slot::Filling(waiters)) if announced => {
                        waiters.push(callback);
                        debug!("{} waiting on fill ({} waiters)", name, waiters.len());
                        return Join::Waiting;
                    }
                    Some(Slot::Filling(_)) => {}
                    None => {
                        slots.insert(key, Slot::Filling(Vec::new()));
                        return Join::Lead(callback);
                    }
                }
            }
            // The fill may finish while Caching is delivered; look again.
            deliver(0, &mut callback, LoadEvent::new(LoadStatus::Caching, name, 0.0));
            announced = true;
        }
    }

    /// Settle the fill for `id` with its terminal event and hand back the
    /// parked callbacks. Only a loaded payload leaves a slot behind.
    pub(crate) fn complete(&self, id: &str, event: &LoadEvent) -> Vec<LoadCallback> {
        let key = id.to_ascii_lowercase();
        let mut slots = self.slots.lock();
        let waiters = match slots.remove(&key) {
            Some(Slot::Filling(waiters)) => waiters,
            Some(ready) => {
                slots.insert(key.clone(), ready);
                Vec::new()
            }
            None => Vec::new(),
        };
        if event.status == LoadStatus::AssetLoaded {
            if let Some(asset) = event.asset() {
                slots.insert(key, Slot::Ready(Arc::clone(asset)));
            }
        }
        waiters
    }

    /// Wrap the leading request's callback so that its terminal event also
    /// reaches every parked waiter.
    ///
    /// Cancelling the lead only cancels the lead: if anyone is still waiting,
    /// the first waiter takes over and `refill` queues the load again.
    pub(crate) fn fill_callback(&self, id: &str, mut lead: LoadCallback, refill: Refill) -> LoadCallback {
        let cache = self.clone();
        let id = id.to_string();
        Box::new(move |event: LoadEvent| {
            if event.terminal && event.status == LoadStatus::Cancelled {
                if let Some(next) = cache.promote(&id) {
                    debug!("Fill of {} handed to a waiter after cancellation", id);
                    refill(cache.fill_callback(&id, next, Arc::clone(&refill)));
                    lead(event);
                    return;
                }
            }
            if event.terminal {
                let waiters = cache.complete(&id, &event);
                for mut waiter in waiters {
                    deliver(0, &mut waiter, event.clone());
                }
            }
            lead(event);
        })
    }

    /// Take the first waiter on the fill for `id`, keeping the slot filling.
    fn promote(&self, id: &str) -> Option<LoadCallback> {
        let mut slots = self.slots.lock();
        match slots.get_mut(&id.to_ascii_lowercase()) {
            Some(Slot::Filling(waiters)) if !waiters.is_empty() => Some(waiters.remove(0)),
            _ => None,
        }
    }

    /// Forget every loaded payload. Fills in flight are kept.
    pub(crate) fn clear_ready(&self) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| matches!(slot, Slot::Filling(_)));
        before - slots.len()
    }

    pub(crate) fn is_ready(&self, id: &str) -> bool {
        matches!(self.slots.lock().get(&id.to_ascii_lowercase()), Some(Slot::Ready(_)))
    }
}
