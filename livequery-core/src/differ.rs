use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Row;

/// A row tagged with its 1-based position and content hash (§3 invariants 1-2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRow {
    pub index: usize,
    pub hash: String,
    pub fields: Row,
}

impl IndexedRow {
    pub fn new(index: usize, fields: Row) -> Self {
        let hash = row_hash(&fields);
        Self { index, hash, fields }
    }

    /// The row as delivered to subscribers: synthetic fields merged in.
    pub fn to_value(&self) -> Value {
        let mut obj = self.fields.clone();
        obj.insert("_index".to_string(), Value::from(self.index));
        obj.insert("_hash".to_string(), Value::from(self.hash.clone()));
        Value::Object(obj)
    }
}

/// MD5 of a row's canonical JSON projection (excludes synthetic fields).
/// `serde_json::Map` is BTreeMap-backed by default, so key order is already
/// canonical without an extra sort pass.
pub fn row_hash(fields: &Row) -> String {
    let canonical = serde_json::to_vec(fields).expect("row fields always serialize");
    let mut hasher = Md5::new();
    hasher.update(&canonical);
    format!("{:x}", hasher.finalize())
}

/// Renumber a sequence of rows to `_index = 1..N` and recompute `_hash`.
pub fn index_rows(rows: Vec<Row>) -> Vec<IndexedRow> {
    rows.into_iter()
        .enumerate()
        .map(|(i, fields)| IndexedRow::new(i + 1, fields))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddedRow {
    pub index: usize,
    pub fields: Row,
    pub hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedRow {
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovedRow {
    pub old_index: usize,
    pub new_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopiedRow {
    pub orig_index: usize,
    pub new_index: usize,
}

/// §4.1 output: four possibly-empty mutation lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub added: Vec<AddedRow>,
    pub removed: Vec<RemovedRow>,
    pub moved: Vec<MovedRow>,
    pub copied: Vec<CopiedRow>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.moved.is_empty() && self.copied.is_empty()
    }
}

/// §4.1: compute the structural diff between the prior hash sequence and the
/// freshly-indexed new result set.
///
/// For a hash present in both sequences, occurrences are paired positionally
/// up to `min(old_count, new_count)`: each pair preserves identity (a move
/// only if its position actually changed). Only the surplus beyond that
/// shared count is a genuine mutation — extra new occurrences are copies of
/// the first original occurrence, extra old occurrences are removed. This
/// keeps `diff(x, x) == no change` even when `x` holds duplicate-hash rows.
/// A hash absent from one side entirely has every occurrence on the other
/// side independently added or removed.
pub fn diff(old_hashes: &[String], new_rows: &[IndexedRow]) -> Diff {
    let mut old_positions: std::collections::HashMap<&str, Vec<usize>> = std::collections::HashMap::new();
    for (i, h) in old_hashes.iter().enumerate() {
        old_positions.entry(h.as_str()).or_default().push(i + 1);
    }
    let mut new_positions: std::collections::HashMap<&str, Vec<usize>> = std::collections::HashMap::new();
    for row in new_rows {
        new_positions.entry(row.hash.as_str()).or_default().push(row.index);
    }

    let mut result = Diff::default();

    for (hash, news) in &new_positions {
        match old_positions.get(hash) {
            None => {
                for &new_index in news {
                    let row = new_rows.iter().find(|r| r.index == new_index).expect("index present");
                    result.added.push(AddedRow {
                        index: new_index,
                        fields: row.fields.clone(),
                        hash: row.hash.clone(),
                    });
                }
            }
            Some(olds) => {
                // Pair up occurrences positionally, up to the shared count:
                // each pair preserves identity (a move only if its position
                // actually changed). Only the surplus beyond that overlap is
                // a genuine removal or copy, so `diff(x, x)` with duplicate
                // hashes reports no change.
                let overlap = olds.len().min(news.len());
                for i in 0..overlap {
                    let (old_index, new_index) = (olds[i], news[i]);
                    if old_index != new_index {
                        result.moved.push(MovedRow { old_index, new_index });
                    }
                }
                for &extra_new in &news[overlap..] {
                    result.copied.push(CopiedRow {
                        orig_index: olds[0],
                        new_index: extra_new,
                    });
                }
                for &extra_old in &olds[overlap..] {
                    result.removed.push(RemovedRow { index: extra_old });
                }
            }
        }
    }

    for (hash, olds) in &old_positions {
        if !new_positions.contains_key(hash) {
            for &old_index in olds {
                result.removed.push(RemovedRow { index: old_index });
            }
        }
    }

    result.added.sort_by_key(|r| r.index);
    result.moved.sort_by_key(|r| r.new_index);
    result.copied.sort_by_key(|r| r.new_index);
    result.removed.sort_by_key(|r| r.index);

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(fields: Value) -> Row {
        fields.as_object().unwrap().clone()
    }

    #[test]
    fn identical_sequences_produce_no_change() {
        let rows = index_rows(vec![row(json!({"id": 1})), row(json!({"id": 2}))]);
        let hashes: Vec<String> = rows.iter().map(|r| r.hash.clone()).collect();
        let d = diff(&hashes, &rows);
        assert!(d.is_empty());
    }

    #[test]
    fn insert_appends_added_row() {
        let old = index_rows(vec![row(json!({"id": 1}))]);
        let old_hashes: Vec<String> = old.iter().map(|r| r.hash.clone()).collect();
        let new = index_rows(vec![row(json!({"id": 1})), row(json!({"id": 2}))]);

        let d = diff(&old_hashes, &new);
        assert_eq!(d.added.len(), 1);
        assert_eq!(d.added[0].index, 2);
        assert!(d.removed.is_empty());
        assert!(d.moved.is_empty());
        assert!(d.copied.is_empty());
    }

    #[test]
    fn reorder_via_insert_at_front() {
        let old = index_rows(vec![row(json!({"name": "b"})), row(json!({"name": "c"}))]);
        let old_hashes: Vec<String> = old.iter().map(|r| r.hash.clone()).collect();
        let new = index_rows(vec![
            row(json!({"name": "a"})),
            row(json!({"name": "b"})),
            row(json!({"name": "c"})),
        ]);

        let d = diff(&old_hashes, &new);
        assert_eq!(d.added.len(), 1);
        assert_eq!(d.added[0].index, 1);
        assert_eq!(
            d.moved,
            vec![
                MovedRow { old_index: 1, new_index: 2 },
                MovedRow { old_index: 2, new_index: 3 },
            ]
        );
        assert!(d.removed.is_empty());
        assert!(d.copied.is_empty());
    }

    #[test]
    fn removal_emits_removed_entry() {
        let old = index_rows(vec![row(json!({"id": 1})), row(json!({"id": 2}))]);
        let old_hashes: Vec<String> = old.iter().map(|r| r.hash.clone()).collect();
        let new = index_rows(vec![row(json!({"id": 2}))]);

        let d = diff(&old_hashes, &new);
        assert_eq!(d.removed, vec![RemovedRow { index: 1 }]);
        assert!(d.moved.is_empty());
    }

    #[test]
    fn duplicate_new_row_without_old_counterpart_is_copied() {
        let old = index_rows(vec![row(json!({"id": 1}))]);
        let old_hashes: Vec<String> = old.iter().map(|r| r.hash.clone()).collect();
        let new = index_rows(vec![
            row(json!({"id": 1})),
            row(json!({"id": 1})),
            row(json!({"id": 1})),
        ]);

        let d = diff(&old_hashes, &new);
        assert!(d.moved.is_empty());
        assert_eq!(
            d.copied,
            vec![
                CopiedRow { orig_index: 1, new_index: 2 },
                CopiedRow { orig_index: 1, new_index: 3 },
            ]
        );
    }

    #[test]
    fn duplicate_hash_on_both_sides_unchanged_is_no_change() {
        let rows = index_rows(vec![
            row(json!({"kind": "x"})),
            row(json!({"kind": "x"})),
            row(json!({"id": 2})),
        ]);
        let hashes: Vec<String> = rows.iter().map(|r| r.hash.clone()).collect();
        let d = diff(&hashes, &rows);
        assert!(d.is_empty(), "identical duplicate-hash rows must not spuriously move/copy/remove: {d:?}");
    }

    #[test]
    fn row_hash_is_pure_function_of_fields() {
        let a = row_hash(&row(json!({"id": 1, "name": "x"})));
        let b = row_hash(&row(json!({"name": "x", "id": 1})));
        assert_eq!(a, b, "key order must not affect the hash");
    }
}
