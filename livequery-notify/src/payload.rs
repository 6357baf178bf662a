use livequery_core::{CandidateRow, LiveQueryError, LiveQueryResult, NotifyKey, RowOp};
use serde::Deserialize;

/// The JSON body a trigger function is expected to pass to `pg_notify`. The
/// function itself (and the `CREATE TRIGGER` that installs it) is out of
/// scope (§1); this is the wire contract the adapter requires of whatever
/// installs it.
#[derive(Debug, Deserialize)]
struct RawPayload {
    op: RowOp,
    database: String,
    table: String,
    key: Option<NotifyKey>,
    fields: serde_json::Map<String, serde_json::Value>,
}

/// Parse one `NOTIFY` payload into the `(database, table, CandidateRow)`
/// triple `Engine::ingest_candidate` expects.
pub fn parse_payload(payload: &str) -> LiveQueryResult<(String, String, CandidateRow)> {
    let raw: RawPayload = serde_json::from_str(payload).map_err(|e| {
        LiveQueryError::BackendIngress(format!("malformed NOTIFY payload: {e}"))
    })?;
    let candidate = CandidateRow { op: raw.op, key: raw.key, fields: raw.fields };
    Ok((raw.database, raw.table, candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_insert_payload() {
        let payload = r#"{"op":"insert","database":"shop","table":"orders","key":"new_data","fields":{"id":1}}"#;
        let (db, table, candidate) = parse_payload(payload).unwrap();
        assert_eq!(db, "shop");
        assert_eq!(table, "orders");
        assert_eq!(candidate.op, RowOp::Insert);
        assert_eq!(candidate.key, Some(NotifyKey::NewData));
    }

    #[test]
    fn rejects_malformed_payload() {
        assert!(parse_payload("not json").is_err());
    }
}
