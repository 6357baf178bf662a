use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::differ::{diff, index_rows, Diff, IndexedRow};
use crate::errors::{LiveQueryError, LiveQueryResult};
use crate::incremental::{incremental_diff, IncrementalOutcome};
use crate::matcher::{matches_any_trigger, CandidateRow};
use crate::model::{KeySelector, ParsedQuery, QueryIdentity, Row, RowEvent, Trigger};

/// External collaborator (§1, §6): re-issues the underlying query and
/// returns fresh rows. The SQL execution/connection pool is out of scope.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &ParsedQuery, params: &Value) -> LiveQueryResult<Vec<Row>>;
}

/// Delivery sink a `Subscription` registers with its cache. Implementations
/// must not block (§5): hand heavy work off to another task.
pub trait DeliverySink: Send + Sync {
    fn on_update(&self, diff: &Diff, data: &[IndexedRow]);
    fn on_error(&self, err: &LiveQueryError);
}

struct Subscriber {
    stopped: Arc<AtomicBool>,
    sink: Arc<dyn DeliverySink>,
    triggers: Vec<Trigger>,
}

/// §4.4 rate-limit state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RateLimitState {
    Idle,
    Scheduled,
    Running,
}

struct Inner {
    result_set: Vec<IndexedRow>,
    subscribers: HashMap<u64, Subscriber>,
    state: RateLimitState,
    deferred: bool,
    last_update: Option<Instant>,
    min_interval: Option<Duration>,
    pending_events: Vec<CandidateRow>,
}

/// §3/§4.4: one per distinct `(query, params, keySelector)` identity.
pub struct QueryCache {
    pub identity: QueryIdentity,
    pub query_text: String,
    pub params: Value,
    pub parsed: ParsedQuery,
    #[allow(dead_code)]
    pub key_selector: KeySelector,
    executor: Arc<dyn QueryExecutor>,
    inner: Mutex<Inner>,
    next_subscriber_id: AtomicU64,
}

impl QueryCache {
    pub fn new(
        identity: QueryIdentity,
        query_text: String,
        params: Value,
        parsed: ParsedQuery,
        key_selector: KeySelector,
        executor: Arc<dyn QueryExecutor>,
        min_interval: Option<Duration>,
    ) -> Self {
        Self {
            identity,
            query_text,
            params,
            parsed,
            key_selector,
            executor,
            inner: Mutex::new(Inner {
                result_set: Vec::new(),
                subscribers: HashMap::new(),
                state: RateLimitState::Idle,
                deferred: false,
                last_update: None,
                min_interval,
                pending_events: Vec::new(),
            }),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    pub async fn result_set(&self) -> Vec<IndexedRow> {
        self.inner.lock().await.result_set.clone()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    pub async fn aggregate_triggers(&self) -> Vec<Trigger> {
        self.inner
            .lock()
            .await
            .subscribers
            .values()
            .flat_map(|s| s.triggers.iter().cloned())
            .collect()
    }

    pub async fn subscriber_sinks(&self) -> Vec<Arc<dyn DeliverySink>> {
        self.inner.lock().await.subscribers.values().map(|s| s.sink.clone()).collect()
    }

    /// Deliver a diff to exactly one subscriber (§4.6 initial-snapshot
    /// delivery), bypassing the broadcast-to-all-subscribers path `update()`
    /// uses.
    pub async fn deliver_to(&self, subscriber_id: u64, diff: &Diff, data: &[IndexedRow]) {
        let inner = self.inner.lock().await;
        if let Some(sub) = inner.subscribers.get(&subscriber_id) {
            if !sub.stopped.load(AtomicOrdering::SeqCst) {
                sub.sink.on_update(diff, data);
            }
        }
    }

    /// §4.4: pure, side-effect free.
    pub fn match_row_event(event: &RowEvent, triggers: &[Trigger]) -> bool {
        matches_any_trigger(event, triggers)
    }

    /// Bookkeeping for a new `Subscription`. Returns its subscriber id and,
    /// if this is the first subscriber, whether `min_interval` was adopted
    /// from this attach call (§4.5: promoted only if the cache has none yet).
    pub async fn attach(
        &self,
        triggers: Vec<Trigger>,
        sink: Arc<dyn DeliverySink>,
        stopped: Arc<AtomicBool>,
        min_interval: Option<Duration>,
    ) -> u64 {
        let id = self.next_subscriber_id.fetch_add(1, AtomicOrdering::SeqCst);
        let mut inner = self.inner.lock().await;
        if inner.min_interval.is_none() {
            inner.min_interval = min_interval;
        }
        inner.subscribers.insert(id, Subscriber { stopped, sink, triggers });
        id
    }

    /// Returns `true` iff this was the last subscriber (cache should be disposed).
    pub async fn detach(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().await;
        inner.subscribers.remove(&id);
        inner.subscribers.is_empty()
    }

    pub async fn push_pending_event(&self, event: CandidateRow) {
        self.inner.lock().await.pending_events.push(event);
    }

    /// §4.4 `invalidate()`: marks the cache dirty, subject to `minInterval`.
    pub async fn invalidate(self: &Arc<Self>) {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        match inner.state {
            RateLimitState::Running => {
                inner.deferred = true;
            }
            RateLimitState::Scheduled => {
                // coalesce: timer already armed, nothing to do.
            }
            RateLimitState::Idle => {
                let due = match (inner.min_interval, inner.last_update) {
                    (Some(min_interval), Some(last)) => now.duration_since(last) >= min_interval,
                    _ => true,
                };
                if due {
                    inner.state = RateLimitState::Running;
                    drop(inner);
                    self.spawn_run_update();
                } else {
                    let min_interval = inner.min_interval.unwrap();
                    let elapsed = now.duration_since(inner.last_update.unwrap());
                    let delay = min_interval - elapsed;
                    inner.state = RateLimitState::Scheduled;
                    drop(inner);
                    self.spawn_timer(delay);
                }
            }
        }
    }

    fn spawn_timer(self: &Arc<Self>, delay: Duration) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            cache.on_timer().await;
        });
    }

    async fn on_timer(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if inner.state == RateLimitState::Scheduled {
            inner.state = RateLimitState::Running;
            drop(inner);
            self.spawn_run_update();
        }
    }

    fn spawn_run_update(self: &Arc<Self>) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            cache.update().await;
            cache.on_run_complete().await;
        });
    }

    async fn on_run_complete(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if inner.deferred {
            inner.deferred = false;
            let delay = inner.min_interval.unwrap_or(Duration::ZERO);
            inner.state = RateLimitState::Scheduled;
            drop(inner);
            self.spawn_timer(delay);
        } else {
            inner.state = RateLimitState::Idle;
        }
    }

    /// §4.4 re-evaluation protocol. Never panics on executor failure: the
    /// error is delivered to every live subscriber and the cache state is
    /// left untouched (§7 propagation policy).
    pub async fn update(&self) {
        let (old_data, old_hashes, has_pending) = {
            let inner = self.inner.lock().await;
            let old_hashes: Vec<String> = inner.result_set.iter().map(|r| r.hash.clone()).collect();
            (inner.result_set.clone(), old_hashes, !inner.pending_events.is_empty())
        };

        let outcome = if has_pending {
            let pending = {
                let mut inner = self.inner.lock().await;
                std::mem::take(&mut inner.pending_events)
            };
            match incremental_diff(&old_data, &pending, &self.parsed) {
                IncrementalOutcome::Applied { diff, new_data } => Ok((diff, new_data)),
                IncrementalOutcome::Refused => self.full_requery(&old_hashes).await,
            }
        } else {
            self.full_requery(&old_hashes).await
        };

        match outcome {
            Ok((computed_diff, new_data)) => {
                let mut inner = self.inner.lock().await;
                inner.last_update = Some(Instant::now());
                if computed_diff.is_empty() {
                    return;
                }
                inner.result_set = new_data.clone();
                let subscribers: Vec<&Subscriber> = inner.subscribers.values().collect();
                for sub in subscribers {
                    if !sub.stopped.load(AtomicOrdering::SeqCst) {
                        sub.sink.on_update(&computed_diff, &new_data);
                    }
                }
            }
            Err(err) => {
                tracing::error!(cache = %self.identity, "re-evaluation failed: {err}");
                let inner = self.inner.lock().await;
                for sub in inner.subscribers.values() {
                    if !sub.stopped.load(AtomicOrdering::SeqCst) {
                        sub.sink.on_error(&err);
                    }
                }
            }
        }
    }

    async fn full_requery(&self, old_hashes: &[String]) -> LiveQueryResult<(Diff, Vec<IndexedRow>)> {
        let rows = self.executor.execute(&self.parsed, &self.params).await?;
        let new_rows = index_rows(rows);
        let computed = diff(old_hashes, &new_rows);
        Ok((computed, new_rows))
    }
}
