//! Query filters for the event store
//!
//! A `Filter` is a conjunction of field comparisons. `id`, `time` and
//! `parser` map to columns; any other field is looked up inside the
//! attribute JSON with `json_extract`.

use crate::error::{StoreError, StoreResult};
use crate::id::SortableId;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    fn sql_op(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "!=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Comparison,
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, op: Comparison, value: impl Into<Value>) {
        self.conditions.push(Condition {
            field: field.into(),
            op,
            value: value.into(),
        });
    }

    fn with(mut self, field: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        self.push(field, op, value);
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Comparison::Eq, value)
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Comparison::Ne, value)
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Comparison::Gt, value)
    }

    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Comparison::Gte, value)
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Comparison::Lt, value)
    }

    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Comparison::Lte, value)
    }

    /// Narrow to events strictly after `id`
    pub fn after_id(self, id: SortableId) -> Self {
        self.gt("id", id.to_string())
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Render as a SQL `WHERE` body plus positional parameters.
    ///
    /// An empty filter renders as `1 = 1`.
    pub(crate) fn to_sql(&self) -> StoreResult<(String, Vec<SqlValue>)> {
        if self.conditions.is_empty() {
            return Ok(("1 = 1".to_string(), Vec::new()));
        }

        let mut clauses = Vec::with_capacity(self.conditions.len());
        let mut params = Vec::with_capacity(self.conditions.len());
        for (idx, condition) in self.conditions.iter().enumerate() {
            let column = column_expr(&condition.field)?;
            clauses.push(format!("{} {} ?{}", column, condition.op.sql_op(), idx + 1));
            params.push(to_sql_value(&condition.value));
        }
        Ok((clauses.join(" AND "), params))
    }
}

fn column_expr(field: &str) -> StoreResult<String> {
    match field {
        "id" | "time" | "parser" => Ok(field.to_string()),
        _ => {
            let valid = !field.is_empty()
                && !field.starts_with('.')
                && !field.ends_with('.')
                && field
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
            if !valid {
                return Err(StoreError::InvalidField(field.to_string()));
            }
            Ok(format!("json_extract(attrs_json, '$.{}')", field))
        }
    }
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    IdAsc,
    IdDesc,
    TimeAsc,
    TimeDesc,
}

impl SortOrder {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            SortOrder::IdAsc => "id ASC",
            SortOrder::IdDesc => "id DESC",
            SortOrder::TimeAsc => "time ASC, id ASC",
            SortOrder::TimeDesc => "time DESC, id DESC",
        }
    }
}

/// Filter + sort + row limit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    pub filter: Filter,
    pub sort: SortOrder,
    /// Maximum number of raw events scanned
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
