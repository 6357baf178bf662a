use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single row's fields, non-synthetic (no `_hash` / `_index`).
pub type Row = serde_json::Map<String, Value>;

/// §3: normalized change record emitted by a backend adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOp {
    Insert,
    Update,
    Delete,
}

/// Pre- and post-image of one row touched by an event. `old` is absent for
/// `Insert`, `new` is absent for `Delete`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowImage {
    pub new: Option<Row>,
    pub old: Option<Row>,
}

/// §3 `RowEvent`. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowEvent {
    pub op: RowOp,
    pub database: String,
    pub table: String,
    pub column_names: Vec<String>,
    pub rows: Vec<RowImage>,
}

impl RowEvent {
    pub fn new(
        op: RowOp,
        database: impl Into<String>,
        table: impl Into<String>,
        column_names: Vec<String>,
        rows: Vec<RowImage>,
    ) -> Self {
        Self {
            op,
            database: database.into(),
            table: table.into(),
            column_names,
            rows,
        }
    }
}

/// Subscriber-supplied predicate, §3/§4.3 trigger-matching mode.
#[derive(Clone)]
pub struct Trigger {
    pub database: Option<String>,
    pub table: String,
    pub condition: Option<Arc<dyn Fn(&Row, Option<&Row>) -> bool + Send + Sync>>,
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("database", &self.database)
            .field("table", &self.table)
            .field("condition", &self.condition.is_some())
            .finish()
    }
}

impl Trigger {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            database: None,
            table: table.into(),
            condition: None,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_condition(
        mut self,
        condition: impl Fn(&Row, Option<&Row>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// §4.3: table (and database, if given) must agree, and the optional
    /// condition must accept at least one row of the event.
    pub fn matches(&self, event: &RowEvent) -> bool {
        if self.table != event.table {
            return false;
        }
        if let Some(db) = &self.database {
            if db != &event.database {
                return false;
            }
        }
        match &self.condition {
            None => true,
            Some(cond) => event.rows.iter().any(|image| match (&image.new, &image.old) {
                (Some(new_row), old_row) => cond(new_row, old_row.as_ref()),
                (None, Some(old_row)) => cond(old_row, None),
                (None, None) => false,
            }),
        }
    }
}

/// A deterministic `row -> string` function tagged by a stable identity
/// string. Two selectors with the same tag are considered equivalent.
#[derive(Clone)]
pub struct KeySelector {
    pub tag: String,
    select: Arc<dyn Fn(&Row) -> String + Send + Sync>,
}

impl KeySelector {
    pub fn new(tag: impl Into<String>, select: impl Fn(&Row) -> String + Send + Sync + 'static) -> Self {
        Self {
            tag: tag.into(),
            select: Arc::new(select),
        }
    }

    pub fn apply(&self, row: &Row) -> String {
        (self.select)(row)
    }
}

impl fmt::Debug for KeySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySelector").field("tag", &self.tag).finish()
    }
}

impl PartialEq for KeySelector {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
    }
}
impl Eq for KeySelector {}

/// §6 parser contract: what the (external) SQL parser hands back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRef {
    pub database: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SelectField {
    Star,
    Named { field: String, alias: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderKey {
    pub column: String,
    pub direction: OrderDirection,
}

/// The shape a parsed `WHERE` clause takes for matcher evaluation. The SQL
/// parser itself is out of scope (§1); this is the minimal AST its contract
/// is expected to produce (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WhereExpr {
    Eq(String, Value),
    Neq(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    And(Vec<WhereExpr>),
    Or(Vec<WhereExpr>),
    Not(Box<WhereExpr>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedQuery {
    pub tables: Vec<TableRef>,
    pub fields: Vec<SelectField>,
    pub r#where: Option<WhereExpr>,
    pub order: Vec<OrderKey>,
    pub limit: Option<u64>,
}

impl WhereExpr {
    /// Evaluate against a candidate row. Missing columns never match a
    /// comparison (three-valued SQL semantics, simplified to `false`).
    pub fn eval(&self, row: &Row) -> bool {
        fn cmp(row: &Row, column: &str, rhs: &Value) -> Option<std::cmp::Ordering> {
            let lhs = row.get(column)?;
            if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
                return a.partial_cmp(&b);
            }
            if let (Some(a), Some(b)) = (lhs.as_str(), rhs.as_str()) {
                return Some(a.cmp(b));
            }
            None
        }

        match self {
            WhereExpr::Eq(col, v) => row.get(col).map(|lhs| lhs == v).unwrap_or(false),
            WhereExpr::Neq(col, v) => row.get(col).map(|lhs| lhs != v).unwrap_or(false),
            WhereExpr::Gt(col, v) => cmp(row, col, v).is_some_and(|o| o.is_gt()),
            WhereExpr::Gte(col, v) => cmp(row, col, v).is_some_and(|o| o.is_ge()),
            WhereExpr::Lt(col, v) => cmp(row, col, v).is_some_and(|o| o.is_lt()),
            WhereExpr::Lte(col, v) => cmp(row, col, v).is_some_and(|o| o.is_le()),
            WhereExpr::And(exprs) => exprs.iter().all(|e| e.eval(row)),
            WhereExpr::Or(exprs) => exprs.iter().any(|e| e.eval(row)),
            WhereExpr::Not(expr) => !expr.eval(row),
        }
    }
}

impl ParsedQuery {
    pub fn is_select_star(&self) -> bool {
        matches!(self.fields.as_slice(), [SelectField::Star])
    }

    /// §4.3 supplied-payload mode: does this candidate row satisfy the
    /// query's `WHERE` clause? A query with no `WHERE` matches every row.
    pub fn matches_where(&self, row: &Row) -> bool {
        match &self.r#where {
            None => true,
            Some(expr) => expr.eval(row),
        }
    }

    /// Project a raw candidate row onto this query's select-list, honoring
    /// `AS` renames. `*` keeps every column.
    pub fn project(&self, row: &Row) -> Row {
        if self.is_select_star() {
            return row.clone();
        }
        let mut out = Row::new();
        for field in &self.fields {
            if let SelectField::Named { field, alias } = field {
                if let Some(value) = row.get(field) {
                    let key = alias.clone().unwrap_or_else(|| field.clone());
                    out.insert(key, value.clone());
                }
            }
        }
        out
    }
}

/// §3: canonical identity of a `(queryText, paramValues, keySelectorTag)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryIdentity(String);

impl QueryIdentity {
    pub fn new(query_text: &str, params: &Value, key_selector_tag: &str) -> Self {
        let canonical = serde_json::json!([query_text, params, key_selector_tag]);
        Self(serde_json::to_string(&canonical).expect("json values always serialize"))
    }
}

impl fmt::Display for QueryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `{database -> [table, ...]}` published to the backend adapter.
pub type InterestSet = std::collections::BTreeMap<String, std::collections::BTreeSet<String>>;
