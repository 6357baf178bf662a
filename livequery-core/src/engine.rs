use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;

use crate::backend::BackendAdapter;
use crate::cache::{DeliverySink, QueryCache, QueryExecutor};
use crate::config::EngineConfig;
use crate::differ::{AddedRow, Diff};
use crate::errors::{LiveQueryError, LiveQueryResult};
use crate::matcher::CandidateRow;
use crate::model::{InterestSet, KeySelector, ParsedQuery, QueryIdentity, RowEvent, Trigger};
use crate::subscription::{CallbackSink, Subscription};

type Parser = dyn Fn(&str) -> LiveQueryResult<ParsedQuery> + Send + Sync;

/// §4.6: the top-level object. Owns the backend connection, event ingress,
/// schema interest-set, and the `{identity -> QueryCache}` registry.
pub struct Engine {
    backend: Arc<dyn BackendAdapter>,
    executor: Arc<dyn QueryExecutor>,
    parser: Arc<Parser>,
    config: EngineConfig,
    registry: DashMap<QueryIdentity, Arc<QueryCache>>,
    /// Deterministic iteration order for event ingress (§4.6), independent of
    /// the registry's hash-map iteration order.
    registration_order: RwLock<Vec<QueryIdentity>>,
    /// Tables registered against each identity, to recompute the union
    /// interest-set on attach/detach (§3 invariant 5).
    tables_by_identity: DashMap<QueryIdentity, Vec<(Option<String>, String)>>,
    ended: AtomicBool,
    paused: AtomicBool,
}

impl Engine {
    pub fn new(
        backend: Arc<dyn BackendAdapter>,
        executor: Arc<dyn QueryExecutor>,
        parser: Arc<Parser>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            executor,
            parser,
            config,
            registry: DashMap::new(),
            registration_order: RwLock::new(Vec::new()),
            tables_by_identity: DashMap::new(),
            ended: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// §5/§7: bounded backend initialization. Must be called once before any
    /// `select()` is expected to receive upstream events; on timeout the
    /// backend is left as-is (not stopped — the caller decides whether to
    /// retry) and `BackendInitTimeout` is returned.
    pub async fn start(&self) -> LiveQueryResult<()> {
        let interest = self.full_interest_set();
        tokio::time::timeout(self.config.backend_init_timeout, self.backend.start(interest))
            .await
            .map_err(|_| LiveQueryError::BackendInitTimeout(self.config.backend_init_timeout))??;
        tracing::info!("backend initialized");
        Ok(())
    }

    /// §6 `engine.select(...)`: validates inputs synchronously (§7
    /// `ConfigurationError`), finds-or-creates the cache, republishes the
    /// interest-set, attaches a subscription bound to `on_update`/`on_error`,
    /// and returns it.
    pub async fn select(
        self: &Arc<Self>,
        query_text: &str,
        params: Value,
        key_selector: KeySelector,
        triggers: Vec<Trigger>,
        min_interval: Option<Duration>,
        on_update: impl Fn(&Diff, &[crate::differ::IndexedRow]) + Send + Sync + 'static,
        on_error: impl Fn(&LiveQueryError) + Send + Sync + 'static,
    ) -> LiveQueryResult<Subscription> {
        if self.ended.load(AtomicOrdering::SeqCst) {
            return Err(LiveQueryError::EngineStopped);
        }
        self.validate_select(query_text, &triggers)?;

        let parsed = (self.parser)(query_text)?;
        let identity = QueryIdentity::new(query_text, &params, &key_selector.tag);
        let min_interval = min_interval.or(self.config.default_min_interval);

        let mut created = false;
        let cache = self
            .registry
            .entry(identity.clone())
            .or_insert_with(|| {
                created = true;
                self.registration_order.write().unwrap().push(identity.clone());
                Arc::new(QueryCache::new(
                    identity.clone(),
                    query_text.to_string(),
                    params.clone(),
                    parsed.clone(),
                    key_selector.clone(),
                    self.executor.clone(),
                    min_interval,
                ))
            })
            .clone();

        self.register_tables(&identity, &triggers);
        self.republish_interest().await?;

        let resolved_triggers = self.resolve_trigger_databases(triggers);
        let stopped = Arc::new(AtomicBool::new(false));
        let sink: Arc<dyn DeliverySink> = Arc::new(CallbackSink {
            on_update: Box::new(on_update),
            on_error: Box::new(on_error),
        });
        let sub_id = cache.attach(resolved_triggers, sink, stopped.clone(), min_interval).await;

        if created {
            // §4.6: freshly created cache — force an immediate re-evaluation.
            cache.invalidate().await;
        } else {
            self.deliver_initial_snapshot(&cache, sub_id).await;
        }

        Ok(Subscription::new(sub_id, identity, Arc::downgrade(&cache), Arc::downgrade(self), stopped))
    }

    async fn deliver_initial_snapshot(&self, cache: &Arc<QueryCache>, sub_id: u64) {
        // §4.6: the newly attached subscription receives the current result
        // set as an all-added diff "on next scheduler tick".
        tokio::task::yield_now().await;
        let data = cache.result_set().await;
        if data.is_empty() {
            return;
        }
        let added: Vec<AddedRow> = data
            .iter()
            .map(|r| AddedRow { index: r.index, fields: r.fields.clone(), hash: r.hash.clone() })
            .collect();
        let snapshot_diff = Diff { added, removed: vec![], moved: vec![], copied: vec![] };
        cache.deliver_to(sub_id, &snapshot_diff, &data).await;
    }

    fn validate_select(&self, query_text: &str, triggers: &[Trigger]) -> LiveQueryResult<()> {
        if query_text.trim().is_empty() {
            return Err(LiveQueryError::Configuration("query must be non-empty".into()));
        }
        if triggers.is_empty() {
            return Err(LiveQueryError::Configuration("triggers must be a non-empty list".into()));
        }
        for t in triggers {
            if t.table.trim().is_empty() {
                return Err(LiveQueryError::Configuration("trigger.table must be non-empty".into()));
            }
            if t.database.is_none() && self.config.default_database.is_none() {
                return Err(LiveQueryError::Configuration(format!(
                    "trigger on table '{}' has no resolvable database",
                    t.table
                )));
            }
        }
        Ok(())
    }

    fn resolve_trigger_databases(&self, triggers: Vec<Trigger>) -> Vec<Trigger> {
        triggers
            .into_iter()
            .map(|mut t| {
                if t.database.is_none() {
                    t.database = self.config.default_database.clone();
                }
                t
            })
            .collect()
    }

    fn register_tables(&self, identity: &QueryIdentity, triggers: &[Trigger]) {
        let resolved: Vec<(Option<String>, String)> = triggers
            .iter()
            .map(|t| (t.database.clone().or_else(|| self.config.default_database.clone()), t.table.clone()))
            .collect();
        self.tables_by_identity
            .entry(identity.clone())
            .and_modify(|v| v.extend(resolved.clone()))
            .or_insert(resolved);
    }

    /// §3 invariant 5: the published interest-set is exactly the union of
    /// `(db, table)` pairs across every live trigger.
    fn full_interest_set(&self) -> InterestSet {
        let mut set = InterestSet::new();
        for entry in self.tables_by_identity.iter() {
            for (db, table) in entry.value() {
                let db_key = db.clone().unwrap_or_default();
                set.entry(db_key).or_default().insert(table.clone());
            }
        }
        set
    }

    async fn republish_interest(&self) -> LiveQueryResult<()> {
        if self.paused.load(AtomicOrdering::SeqCst) {
            return Ok(());
        }
        self.backend.set_interest(self.full_interest_set()).await
    }

    /// §4.6 event ingress (replication backend): deterministic iteration
    /// order over the registry, trigger-matching mode (§4.3).
    pub async fn ingest(&self, event: RowEvent) {
        if self.ended.load(AtomicOrdering::SeqCst) || self.paused.load(AtomicOrdering::SeqCst) {
            return;
        }
        let order = self.registration_order.read().unwrap().clone();
        for identity in order {
            let Some(cache) = self.registry.get(&identity).map(|e| e.clone()) else { continue };
            let triggers = cache.aggregate_triggers().await;
            if QueryCache::match_row_event(&event, &triggers) {
                cache.invalidate().await;
            }
        }
    }

    /// Notify-backend ingress: push a candidate row into every affected
    /// cache's pending queue and invalidate it (§4.3 supplied-payload mode).
    pub async fn ingest_candidate(&self, database: &str, table: &str, candidate: CandidateRow) {
        if self.ended.load(AtomicOrdering::SeqCst) || self.paused.load(AtomicOrdering::SeqCst) {
            return;
        }
        let order = self.registration_order.read().unwrap().clone();
        for identity in order {
            let Some(cache) = self.registry.get(&identity).map(|e| e.clone()) else { continue };
            let tables = self.tables_by_identity.get(&identity);
            let interested = tables
                .map(|v| v.iter().any(|(db, t)| t == table && db.as_deref().map(|d| d == database).unwrap_or(true)))
                .unwrap_or(false);
            if interested {
                cache.push_pending_event(candidate.clone()).await;
                cache.invalidate().await;
            }
        }
    }

    /// §4.6 `pause()`: publish an empty interest-set; in-flight events keep
    /// draining but no new ones are produced.
    pub async fn pause(&self) -> LiveQueryResult<()> {
        self.paused.store(true, AtomicOrdering::SeqCst);
        self.backend.set_interest(InterestSet::new()).await
    }

    /// §4.6 `resume()`: republish the full interest-set and force
    /// reconciliation of every live cache.
    pub async fn resume(&self) -> LiveQueryResult<()> {
        self.paused.store(false, AtomicOrdering::SeqCst);
        self.backend.set_interest(self.full_interest_set()).await?;
        let order = self.registration_order.read().unwrap().clone();
        for identity in order {
            if let Some(cache) = self.registry.get(&identity).map(|e| e.clone()) {
                cache.invalidate().await;
            }
        }
        Ok(())
    }

    /// §4.6 `end()`: terminal. Stops ingress, closes the backend connection,
    /// fails all in-flight re-evaluations with a terminal error. Subsequent
    /// calls are no-ops (§6 exit behavior).
    pub async fn end(&self) -> LiveQueryResult<()> {
        if self.ended.swap(true, AtomicOrdering::SeqCst) {
            return Ok(());
        }
        self.backend.stop().await?;
        for entry in self.registry.iter() {
            let cache = entry.value().clone();
            for sink in cache.subscriber_sinks().await {
                sink.on_error(&LiveQueryError::EngineStopped);
            }
        }
        self.registry.clear();
        self.registration_order.write().unwrap().clear();
        Ok(())
    }

    pub fn cache_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(AtomicOrdering::SeqCst)
    }

    /// Spawns a task that drains `rx` and feeds every event to [`Self::ingest`],
    /// the "construct with a sender, spawn a forwarder task" shape backend
    /// adapters use to hand events to the engine (§6, §5).
    pub fn spawn_ingress(self: &Arc<Self>, mut rx: tokio::sync::mpsc::Receiver<RowEvent>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                engine.ingest(event).await;
            }
        });
    }

    /// Same shape as [`Self::spawn_ingress`] for the NOTIFY/supplied-payload
    /// path: drains `rx` and feeds every `(database, table, candidate)`
    /// triple to [`Self::ingest_candidate`].
    pub fn spawn_candidate_ingress(
        self: &Arc<Self>,
        mut rx: tokio::sync::mpsc::Receiver<(String, String, CandidateRow)>,
    ) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some((database, table, candidate)) = rx.recv().await {
                engine.ingest_candidate(&database, &table, candidate).await;
            }
        });
    }

    /// §3 invariant 4 maintenance: called by `Subscription::stop()` once a
    /// cache's last subscriber detaches, so the cache stops existing in the
    /// registry and its tables drop out of the published interest-set.
    pub(crate) async fn remove_if_empty(&self, identity: &QueryIdentity) {
        self.registry.remove(identity);
        self.registration_order.write().unwrap().retain(|i| i != identity);
        self.tables_by_identity.remove(identity);
        let _ = self.republish_interest().await;
    }
}
