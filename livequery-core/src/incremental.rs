use std::cmp::Ordering;

use crate::differ::{diff, index_rows, Diff, IndexedRow};
use crate::matcher::{matches_supplied, CandidateRow, NotifyKey};
use crate::model::{OrderDirection, ParsedQuery, RowOp};

/// §4.7 outcome: either the incremental path produced a result, or it
/// refused to guess (step 7) and the caller must fall back to a full
/// re-query, §4.4 path (b).
pub enum IncrementalOutcome {
    Applied { diff: Diff, new_data: Vec<IndexedRow> },
    Refused,
}

/// §4.7: incremental diff from supplied NOTIFY payloads, avoiding a re-query.
pub fn incremental_diff(
    old_data: &[IndexedRow],
    pending: &[CandidateRow],
    query: &ParsedQuery,
) -> IncrementalOutcome {
    let old_hashes: Vec<String> = old_data.iter().map(|r| r.hash.clone()).collect();

    // steps 2-3: filter, short-circuit on nothing matched.
    let matched = matches_supplied(query, pending);
    if matched.is_empty() {
        return IncrementalOutcome::Applied {
            diff: Diff::default(),
            new_data: old_data.to_vec(),
        };
    }

    // step 4: project each matched candidate onto the select-list and hash it.
    // Removal is tracked per-hash by remaining count, not by set membership:
    // a query result can legitimately hold several rows that hash identically
    // (their projected fields coincide), and deleting one of them must not
    // remove every row sharing that hash.
    let mut existing_counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for h in &old_hashes {
        *existing_counts.entry(h.as_str()).or_default() += 1;
    }
    let mut removal_counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut appended: Vec<crate::model::Row> = Vec::new();
    let mut any_deletion = false;

    for m in &matched {
        let projected = query.project(&m.fields);
        let hash = crate::differ::row_hash(&projected);

        let is_delete_or_old = matches!(m.op, RowOp::Delete) || matches!(m.key, Some(NotifyKey::OldData));
        let is_insert_or_new = matches!(m.op, RowOp::Insert) || matches!(m.key, Some(NotifyKey::NewData));

        if is_delete_or_old {
            // step 5: never remove more occurrences than actually exist.
            let existing = existing_counts.get(hash.as_str()).copied().unwrap_or(0);
            let already_removing = removal_counts.get(&hash).copied().unwrap_or(0);
            if already_removing < existing {
                *removal_counts.entry(hash.clone()).or_default() += 1;
                any_deletion = true;
            }
        }
        if is_insert_or_new {
            // step 6
            appended.push(projected);
        }
    }

    // step 7: refusal-to-guess rule.
    if any_deletion {
        if let Some(limit) = query.limit {
            if limit == old_data.len() as u64 {
                return IncrementalOutcome::Refused;
            }
        }
    }

    // step 8: drop removed, keep survivors, append new rows, order, limit, renumber.
    // Consumes `removal_counts` by decrementing per matched occurrence so only
    // the requested number of duplicate-hash rows are dropped, not all of them.
    let mut remaining_removals = removal_counts;
    let mut candidate_rows: Vec<crate::model::Row> = Vec::with_capacity(old_data.len());
    for r in old_data {
        let remove = match remaining_removals.get_mut(&r.hash) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        };
        if !remove {
            candidate_rows.push(r.fields.clone());
        }
    }
    candidate_rows.extend(appended);

    candidate_rows.sort_by(|a, b| order_by(query, a, b));
    if let Some(limit) = query.limit {
        candidate_rows.truncate(limit as usize);
    }

    let new_rows = index_rows(candidate_rows);
    let new_diff = diff(&old_hashes, &new_rows);

    IncrementalOutcome::Applied {
        diff: new_diff,
        new_data: new_rows,
    }
}

fn order_by(query: &ParsedQuery, a: &crate::model::Row, b: &crate::model::Row) -> Ordering {
    for key in &query.order {
        let av = a.get(&key.column);
        let bv = b.get(&key.column);
        let ord = compare_values(av, bv);
        let ord = match key.direction {
            OrderDirection::Asc => ord,
            OrderDirection::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Stable lexicographic comparison: numbers by value, everything else by its
/// string rendering, `None` (missing column) sorting last.
fn compare_values(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            }
            let sa = a.as_str().map(str::to_string).unwrap_or_else(|| a.to_string());
            let sb = b.as_str().map(str::to_string).unwrap_or_else(|| b.to_string());
            sa.cmp(&sb)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderKey, TableRef, WhereExpr};
    use serde_json::json;

    fn query(limit: Option<u64>) -> ParsedQuery {
        ParsedQuery {
            tables: vec![TableRef { database: None, name: "t".into() }],
            fields: vec![crate::model::SelectField::Star],
            r#where: Some(WhereExpr::Eq("active".into(), json!(true))),
            order: vec![OrderKey { column: "name".into(), direction: OrderDirection::Asc }],
            limit,
        }
    }

    fn candidate(op: RowOp, key: Option<NotifyKey>, fields: serde_json::Value) -> CandidateRow {
        CandidateRow { op, key, fields: fields.as_object().unwrap().clone() }
    }

    #[test]
    fn insert_is_appended_and_ordered() {
        let old = index_rows(vec![json!({"name": "b", "active": true}).as_object().unwrap().clone()]);
        let pending = vec![candidate(RowOp::Insert, None, json!({"name": "a", "active": true}))];

        match incremental_diff(&old, &pending, &query(None)) {
            IncrementalOutcome::Applied { new_data, .. } => {
                assert_eq!(new_data.len(), 2);
                assert_eq!(new_data[0].fields.get("name").unwrap(), "a");
            }
            IncrementalOutcome::Refused => panic!("should not refuse"),
        }
    }

    #[test]
    fn delete_at_full_limit_refuses() {
        let old = index_rows(vec![
            json!({"name": "a", "active": true}).as_object().unwrap().clone(),
            json!({"name": "b", "active": true}).as_object().unwrap().clone(),
            json!({"name": "c", "active": true}).as_object().unwrap().clone(),
        ]);
        let pending = vec![candidate(
            RowOp::Delete,
            Some(NotifyKey::OldData),
            json!({"name": "b", "active": true}),
        )];

        match incremental_diff(&old, &pending, &query(Some(3))) {
            IncrementalOutcome::Refused => {}
            IncrementalOutcome::Applied { .. } => panic!("should refuse at LIMIT == |oldData|"),
        }
    }

    #[test]
    fn deleting_one_duplicate_hash_row_removes_only_one() {
        let old = index_rows(vec![
            json!({"name": "dup", "active": true}).as_object().unwrap().clone(),
            json!({"name": "dup", "active": true}).as_object().unwrap().clone(),
        ]);
        let pending = vec![candidate(RowOp::Delete, Some(NotifyKey::OldData), json!({"name": "dup", "active": true}))];

        match incremental_diff(&old, &pending, &query(None)) {
            IncrementalOutcome::Applied { new_data, .. } => {
                assert_eq!(new_data.len(), 1, "only one of the two duplicate-hash rows should be removed");
            }
            IncrementalOutcome::Refused => panic!("should not refuse"),
        }
    }

    #[test]
    fn no_matches_yields_no_change() {
        let old = index_rows(vec![json!({"name": "a", "active": true}).as_object().unwrap().clone()]);
        let pending = vec![candidate(RowOp::Insert, None, json!({"name": "z", "active": false}))];

        match incremental_diff(&old, &pending, &query(None)) {
            IncrementalOutcome::Applied { diff, new_data } => {
                assert!(diff.is_empty());
                assert_eq!(new_data.len(), 1);
            }
            IncrementalOutcome::Refused => panic!("should not refuse"),
        }
    }
}
