use crate::differ::{Diff, IndexedRow};

/// §4.2: pure function `(oldData, diff) -> newData`.
///
/// The two-phase null-then-write order is load-bearing: some `moved` sources
/// are also some other row's `copied` source, so every read of `old_data`
/// must happen before any write lands in that same slot.
pub fn apply_diff(old_data: &[IndexedRow], diff: &Diff) -> Vec<IndexedRow> {
    let max_index = [
        old_data.len(),
        diff.added.iter().map(|r| r.index).max().unwrap_or(0),
        diff.moved.iter().map(|r| r.new_index).max().unwrap_or(0),
        diff.copied.iter().map(|r| r.new_index).max().unwrap_or(0),
    ]
    .into_iter()
    .max()
    .unwrap_or(0);

    let mut slots: Vec<Option<IndexedRow>> = vec![None; max_index];
    for row in old_data {
        if row.index >= 1 && row.index <= max_index {
            slots[row.index - 1] = Some(row.clone());
        }
    }

    // 1. null out removed positions
    for removed in &diff.removed {
        slots[removed.index - 1] = None;
    }
    // 2. null out moved source positions (frees slots before any writes)
    for moved in &diff.moved {
        slots[moved.old_index - 1] = None;
    }
    // 3. copied: clone old_data[orig_index-1], write at new_index
    for copied in &diff.copied {
        if let Some(source) = old_data.iter().find(|r| r.index == copied.orig_index) {
            let mut cloned = source.clone();
            cloned.index = copied.new_index;
            slots[copied.new_index - 1] = Some(cloned);
        }
    }
    // 4. moved: take old_data[old_index-1], write at new_index
    for moved in &diff.moved {
        if let Some(source) = old_data.iter().find(|r| r.index == moved.old_index) {
            let mut relocated = source.clone();
            relocated.index = moved.new_index;
            slots[moved.new_index - 1] = Some(relocated);
        }
    }
    // 5. added: write at its index
    for added in &diff.added {
        slots[added.index - 1] = Some(IndexedRow {
            index: added.index,
            hash: added.hash.clone(),
            fields: added.fields.clone(),
        });
    }

    // 6. compact, dropping null slots, preserving order, renumbering 1..N
    slots
        .into_iter()
        .flatten()
        .enumerate()
        .map(|(i, mut row)| {
            row.index = i + 1;
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::differ::{diff, index_rows};
    use serde_json::json;

    fn row(fields: serde_json::Value) -> crate::model::Row {
        fields.as_object().unwrap().clone()
    }

    #[test]
    fn apply_diff_reconstructs_new_data() {
        let old = index_rows(vec![row(json!({"name": "b"})), row(json!({"name": "c"}))]);
        let old_hashes: Vec<String> = old.iter().map(|r| r.hash.clone()).collect();
        let new = index_rows(vec![
            row(json!({"name": "a"})),
            row(json!({"name": "b"})),
            row(json!({"name": "c"})),
        ]);

        let d = diff(&old_hashes, &new);
        let applied = apply_diff(&old, &d);

        assert_eq!(applied.len(), new.len());
        for (a, b) in applied.iter().zip(new.iter()) {
            assert_eq!(a.hash, b.hash);
            assert_eq!(a.index, b.index);
        }
    }

    #[test]
    fn apply_diff_is_identity_on_no_change() {
        let data = index_rows(vec![row(json!({"id": 1})), row(json!({"id": 2}))]);
        let hashes: Vec<String> = data.iter().map(|r| r.hash.clone()).collect();
        let d = diff(&hashes, &data);
        let applied = apply_diff(&data, &d);
        assert_eq!(applied, data);
    }

    #[test]
    fn apply_diff_handles_swap_where_move_source_is_copy_source() {
        // Row at old index 1 is both moved to index 2 and copied to index 3.
        let old = index_rows(vec![row(json!({"id": "x"})), row(json!({"id": "y"}))]);
        let old_hashes: Vec<String> = old.iter().map(|r| r.hash.clone()).collect();
        let new = index_rows(vec![
            row(json!({"id": "y"})),
            row(json!({"id": "x"})),
            row(json!({"id": "x"})),
        ]);

        let d = diff(&old_hashes, &new);
        let applied = apply_diff(&old, &d);
        let applied_hashes: Vec<&str> = applied.iter().map(|r| r.hash.as_str()).collect();
        let new_hashes: Vec<&str> = new.iter().map(|r| r.hash.as_str()).collect();
        assert_eq!(applied_hashes, new_hashes);
    }
}
