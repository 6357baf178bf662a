use serde::{Deserialize, Serialize};

use crate::model::{ParsedQuery, Row, RowEvent, Trigger};

/// §4.3 trigger-matching mode (replication backend): the cache is affected
/// iff any trigger attached to it matches the event.
pub fn matches_any_trigger(event: &RowEvent, triggers: &[Trigger]) -> bool {
    triggers.iter().any(|t| t.matches(event))
}

/// A row surfaced by the NOTIFY backend, tagged with the operation that
/// produced it and, for `Update`, which image it represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKey {
    NewData,
    OldData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRow {
    pub op: crate::model::RowOp,
    pub key: Option<NotifyKey>,
    pub fields: Row,
}

/// §4.3 supplied-payload mode: the subset of candidate rows whose column
/// values satisfy the query's `WHERE` clause.
pub fn matches_supplied(query: &ParsedQuery, candidates: &[CandidateRow]) -> Vec<CandidateRow> {
    candidates
        .iter()
        .filter(|c| query.matches_where(&c.fields))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RowImage, RowOp};
    use serde_json::json;

    #[test]
    fn trigger_requires_matching_table_and_database() {
        let event = RowEvent::new(
            RowOp::Update,
            "shop",
            "orders",
            vec!["id".into()],
            vec![RowImage {
                new: Some(json!({"id": 1}).as_object().unwrap().clone()),
                old: None,
            }],
        );

        let t_ok = Trigger::new("orders").with_database("shop");
        let t_wrong_db = Trigger::new("orders").with_database("other");
        let t_wrong_table = Trigger::new("users").with_database("shop");

        assert!(t_ok.matches(&event));
        assert!(!t_wrong_db.matches(&event));
        assert!(!t_wrong_table.matches(&event));
    }

    #[test]
    fn trigger_condition_sees_old_and_new_for_update() {
        let event = RowEvent::new(
            RowOp::Update,
            "shop",
            "orders",
            vec!["status".into()],
            vec![RowImage {
                new: Some(json!({"status": "shipped"}).as_object().unwrap().clone()),
                old: Some(json!({"status": "pending"}).as_object().unwrap().clone()),
            }],
        );

        let trigger = Trigger::new("orders").with_condition(|new_row, old_row| {
            new_row.get("status").and_then(|v| v.as_str()) == Some("shipped")
                || old_row.and_then(|r| r.get("status")).and_then(|v| v.as_str()) == Some("shipped")
        });
        assert!(trigger.matches(&event));
    }
}
