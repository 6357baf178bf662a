use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use livequery_core::backend::NullBackend;
use livequery_core::cache::QueryExecutor;
use livequery_core::config::EngineConfig;
use livequery_core::engine::Engine;
use livequery_core::errors::LiveQueryResult;
use livequery_core::model::{KeySelector, OrderDirection, OrderKey, ParsedQuery, Row, SelectField, TableRef, Trigger};
use serde_json::json;

/// Returns whatever row set is queued, one call per invocation; the last
/// entry repeats once exhausted.
struct ScriptedExecutor {
    calls: AtomicUsize,
    responses: Vec<Vec<Row>>,
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, _query: &ParsedQuery, _params: &serde_json::Value) -> LiveQueryResult<Vec<Row>> {
        let i = self.calls.fetch_add(1, Ordering::SeqCst);
        let idx = i.min(self.responses.len() - 1);
        Ok(self.responses[idx].clone())
    }
}

fn row(v: serde_json::Value) -> Row {
    v.as_object().unwrap().clone()
}

fn select_star(table: &str) -> ParsedQuery {
    ParsedQuery {
        tables: vec![TableRef { database: None, name: table.into() }],
        fields: vec![SelectField::Star],
        r#where: None,
        order: vec![OrderKey { column: "id".into(), direction: OrderDirection::Asc }],
        limit: None,
    }
}

fn noop_parser(table: &'static str) -> Arc<dyn Fn(&str) -> LiveQueryResult<ParsedQuery> + Send + Sync> {
    Arc::new(move |_text| Ok(select_star(table)))
}

#[tokio::test]
async fn coalescing_collapses_rapid_events_into_one_delivery() {
    let executor = Arc::new(ScriptedExecutor {
        calls: AtomicUsize::new(0),
        responses: vec![
            vec![row(json!({"id": 1}))],
            vec![row(json!({"id": 1})), row(json!({"id": 2}))],
        ],
    });
    let engine = Engine::new(
        Arc::new(NullBackend),
        executor,
        noop_parser("orders"),
        EngineConfig { default_min_interval: Some(Duration::from_millis(100)), ..Default::default() },
    );

    let deliveries = Arc::new(AtomicUsize::new(0));
    let d = deliveries.clone();
    let sub = engine
        .select(
            "SELECT * FROM orders",
            json!({}),
            KeySelector::new("id", |r| r.get("id").map(|v| v.to_string()).unwrap_or_default()),
            vec![Trigger::new("orders").with_database("db")],
            Some(Duration::from_millis(100)),
            move |_diff, _data| {
                d.fetch_add(1, Ordering::SeqCst);
            },
            |_err| {},
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;

    // Three matching events within 30ms, well under minInterval.
    for _ in 0..3 {
        engine
            .ingest(livequery_core::model::RowEvent::new(
                livequery_core::model::RowOp::Insert,
                "db",
                "orders",
                vec!["id".into()],
                vec![livequery_core::model::RowImage { new: Some(row(json!({"id": 2}))), old: None }],
            ))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(
        deliveries.load(Ordering::SeqCst) <= 1,
        "three coalesced invalidations must yield at most one delivery, got {}",
        deliveries.load(Ordering::SeqCst)
    );
    sub.stop().await;
}

#[tokio::test]
async fn subscription_isolation_stop_during_reevaluation() {
    let executor = Arc::new(ScriptedExecutor {
        calls: AtomicUsize::new(0),
        responses: vec![
            vec![row(json!({"id": 1}))],
            vec![row(json!({"id": 1})), row(json!({"id": 2}))],
        ],
    });
    let engine = Engine::new(Arc::new(NullBackend), executor, noop_parser("orders"), EngineConfig::default());

    let sub1_updates = Arc::new(AtomicUsize::new(0));
    let sub2_updates = Arc::new(AtomicUsize::new(0));
    let s1 = sub1_updates.clone();
    let s2 = sub2_updates.clone();

    let sub1 = engine
        .select(
            "SELECT * FROM orders",
            json!({}),
            KeySelector::new("id", |r| r.get("id").map(|v| v.to_string()).unwrap_or_default()),
            vec![Trigger::new("orders").with_database("db")],
            None,
            move |_diff, _data| {
                s1.fetch_add(1, Ordering::SeqCst);
            },
            |_err| {},
        )
        .await
        .unwrap();

    let sub2 = engine
        .select(
            "SELECT * FROM orders",
            json!({}),
            KeySelector::new("id", |r| r.get("id").map(|v| v.to_string()).unwrap_or_default()),
            vec![Trigger::new("orders").with_database("db")],
            None,
            move |_diff, _data| {
                s2.fetch_add(1, Ordering::SeqCst);
            },
            |_err| {},
        )
        .await
        .unwrap();

    assert_eq!(engine.cache_count(), 1, "identical query/params/keySelector share one cache");

    sub1.stop().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    engine
        .ingest(livequery_core::model::RowEvent::new(
            livequery_core::model::RowOp::Insert,
            "db",
            "orders",
            vec!["id".into()],
            vec![livequery_core::model::RowImage { new: Some(row(json!({"id": 2}))), old: None }],
        ))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(sub1_updates.load(Ordering::SeqCst), 0, "stopped subscription receives nothing further");
    assert!(sub2_updates.load(Ordering::SeqCst) >= 1, "live subscription still receives the diff");
    assert_eq!(engine.cache_count(), 1, "cache stays alive while sub2 is attached");

    sub2.stop().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.cache_count(), 0, "cache is removed once its last subscriber detaches");
}

#[tokio::test]
async fn pause_then_resume_reconciles_every_live_cache() {
    let orders_executor = Arc::new(ScriptedExecutor {
        calls: AtomicUsize::new(0),
        responses: vec![
            vec![row(json!({"id": 1}))],
            vec![row(json!({"id": 1})), row(json!({"id": 2}))],
        ],
    });
    let engine = Engine::new(Arc::new(NullBackend), orders_executor, noop_parser("orders"), EngineConfig::default());

    let orders_updates = Arc::new(Mutex::new(Vec::new()));
    let ou = orders_updates.clone();
    let sub = engine
        .select(
            "SELECT * FROM orders",
            json!({}),
            KeySelector::new("id", |r| r.get("id").map(|v| v.to_string()).unwrap_or_default()),
            vec![Trigger::new("orders").with_database("db")],
            None,
            move |diff, _data| {
                ou.lock().unwrap().push(diff.clone());
            },
            |_err| {},
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    orders_updates.lock().unwrap().clear();

    engine.pause().await.unwrap();

    // Events during the pause window must not trigger a re-evaluation.
    engine
        .ingest(livequery_core::model::RowEvent::new(
            livequery_core::model::RowOp::Insert,
            "db",
            "orders",
            vec!["id".into()],
            vec![livequery_core::model::RowImage { new: Some(row(json!({"id": 2}))), old: None }],
        ))
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(orders_updates.lock().unwrap().is_empty(), "paused engine must not deliver updates");

    engine.resume().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let deliveries = orders_updates.lock().unwrap().len();
    assert_eq!(deliveries, 1, "resume reconciles each live cache exactly once, got {deliveries}");

    sub.stop().await;
}
