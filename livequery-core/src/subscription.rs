use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use crate::cache::{DeliverySink, QueryCache};
use crate::differ::{Diff, IndexedRow};
use crate::engine::Engine;
use crate::errors::LiveQueryError;
use crate::model::QueryIdentity;

/// Callback-based delivery sink, §6: `subscription.on('update', ...)` /
/// `subscription.on('error', ...)`.
pub struct CallbackSink {
    pub on_update: Box<dyn Fn(&Diff, &[IndexedRow]) + Send + Sync>,
    pub on_error: Box<dyn Fn(&LiveQueryError) + Send + Sync>,
}

impl DeliverySink for CallbackSink {
    fn on_update(&self, diff: &Diff, data: &[IndexedRow]) {
        (self.on_update)(diff, data);
    }

    fn on_error(&self, err: &LiveQueryError) {
        (self.on_error)(err);
    }
}

/// §4.5: a client-visible handle binding a `QueryCache` to triggers and a
/// delivery sink. Holds only a weak (lookup-only) reference to its cache and
/// to the owning engine (§9 design note: no cyclic ownership between cache
/// and subscription).
pub struct Subscription {
    id: u64,
    identity: QueryIdentity,
    cache: Weak<QueryCache>,
    engine: Weak<Engine>,
    stopped: Arc<AtomicBool>,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        identity: QueryIdentity,
        cache: Weak<QueryCache>,
        engine: Weak<Engine>,
        stopped: Arc<AtomicBool>,
    ) -> Self {
        Self { id, identity, cache, engine, stopped }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current snapshot of the bound cache's result set, if it still exists.
    pub async fn current_data(&self) -> Option<Vec<IndexedRow>> {
        let cache = self.cache.upgrade()?;
        Some(cache.result_set().await)
    }

    /// §4.5/§5: idempotent. Prevents any further delivery to this
    /// subscription even if a re-evaluation is already running; detaches
    /// from the cache on the first call only, and if this was the cache's
    /// last subscriber, asks the engine to drop it from the registry (§3
    /// invariant 4) and republish the interest-set (§3 invariant 5).
    pub async fn stop(&self) {
        if self.stopped.swap(true, AtomicOrdering::SeqCst) {
            return; // already stopped
        }
        if let Some(cache) = self.cache.upgrade() {
            let emptied = cache.detach(self.id).await;
            if emptied {
                if let Some(engine) = self.engine.upgrade() {
                    engine.remove_if_empty(&self.identity).await;
                }
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(AtomicOrdering::SeqCst)
    }
}
