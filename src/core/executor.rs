use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use rusqlite::types::ValueRef;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::db::ConnectionFactory;
use crate::core::schema::{SchemaCache, SchemaContext};

/// Ordered result of a successful query: column names in select order,
/// each row a vector of values in the same order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Classified outcome of one execution attempt. Failures travel by value,
/// never as `Err`; the orchestrator's transitions consume the variants.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Success(RowSet),
    /// Zero rows where a string predicate was present but could not be
    /// checked against the schema. Not an error and not recoverable.
    Empty,
    /// A quoted literal in an equality/LIKE predicate does not exist in the
    /// implicated column. The only recoverable failure.
    ValueNotFound {
        table: String,
        column: String,
        literal: String,
    },
    SyntaxError(String),
    ConnectionError(String),
}

/// A quoted string predicate lifted from the query text.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub alias: Option<String>,
    pub column: String,
    pub literal: String,
    pub wildcard: bool,
}

/// Extract `col = 'lit'` and `col LIKE '%lit%'` predicates, with their
/// optional table qualifier. Purely textual; misses nothing-quoted
/// predicates by design.
pub fn extract_predicates(sql: &str) -> Vec<Predicate> {
    let re = Regex::new(r"(?i)\b(?:(\w+)\.)?(\w+)\s*(=|LIKE)\s*'([^']*)'").unwrap();
    let mut predicates = Vec::new();
    for caps in re.captures_iter(sql) {
        let op = caps.get(3).map(|m| m.as_str().to_uppercase()).unwrap_or_default();
        let raw = caps.get(4).map(|m| m.as_str()).unwrap_or_default();
        let wildcard = op == "LIKE" && raw.contains('%');
        let literal = if wildcard {
            raw.trim_matches('%').to_string()
        } else {
            raw.to_string()
        };
        if literal.is_empty() {
            continue;
        }
        predicates.push(Predicate {
            alias: caps.get(1).map(|m| m.as_str().to_string()),
            column: caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
            literal,
            wildcard,
        });
    }
    predicates
}

const SQL_KEYWORDS: &[&str] = &[
    "WHERE", "JOIN", "ON", "GROUP", "ORDER", "LEFT", "RIGHT", "INNER", "OUTER", "CROSS", "LIMIT",
    "UNION", "SET", "AS", "HAVING", "NATURAL", "USING",
];

/// Map of `(alias, table)` pairs in query order, one entry per FROM/JOIN
/// clause. The table name itself always works as its own alias.
pub fn table_aliases(sql: &str) -> Vec<(String, String)> {
    let re = Regex::new(r"(?i)\b(?:FROM|JOIN)\s+(\w+)(?:\s+(?:AS\s+)?(\w+))?").unwrap();
    let mut aliases = Vec::new();
    for caps in re.captures_iter(sql) {
        let table = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
        aliases.push((table.to_lowercase(), table.clone()));
        if let Some(alias) = caps.get(2) {
            let alias = alias.as_str();
            if !SQL_KEYWORDS.contains(&alias.to_uppercase().as_str()) {
                aliases.push((alias.to_lowercase(), table));
            }
        }
    }
    aliases
}

fn resolve_table(
    schema: &SchemaContext,
    aliases: &[(String, String)],
    predicate: &Predicate,
) -> Option<String> {
    let textual = |table: &str| {
        schema
            .column(table, &predicate.column)
            .is_some_and(|c| c.is_textual())
    };

    if let Some(alias) = &predicate.alias {
        let key = alias.to_lowercase();
        let table = aliases
            .iter()
            .find(|(a, _)| *a == key)
            .map(|(_, t)| t.clone())
            .or_else(|| schema.table(alias).map(|t| t.name.clone()))?;
        return textual(&table).then_some(table);
    }

    // Unqualified column: prefer tables the query actually references,
    // then fall back to the whole schema. First hit wins; with several
    // matching tables this is a heuristic and may misattribute.
    for (_, table) in aliases {
        if textual(table) {
            return Some(table.clone());
        }
    }
    schema
        .tables_with_column(&predicate.column)
        .into_iter()
        .find(|t| textual(t))
        .map(|t| t.to_string())
}

fn literal_present(values: &[String], predicate: &Predicate) -> bool {
    if predicate.wildcard {
        // LIKE matches ASCII case-insensitively, so fold before comparing.
        let needle = predicate.literal.to_uppercase();
        values.iter().any(|v| v.to_uppercase().contains(&needle))
    } else {
        // `=` compares text case-sensitively; a casing mismatch really did
        // return zero rows, and the matcher can supply the stored casing.
        values.iter().any(|v| v == &predicate.literal)
    }
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
    }
}

/// Executes a query against the data store and classifies the outcome.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> QueryOutcome;
}

pub struct ExecutionAdapter {
    factory: Arc<dyn ConnectionFactory>,
    cache: Arc<SchemaCache>,
}

impl ExecutionAdapter {
    pub fn new(factory: Arc<dyn ConnectionFactory>, cache: Arc<SchemaCache>) -> Self {
        Self { factory, cache }
    }

    /// Open a scoped connection, run the query, collect every row. The
    /// connection is dropped on every exit path.
    fn run_query(&self, sql: &str) -> Result<RowSet, QueryOutcome> {
        let conn = self
            .factory
            .connect()
            .map_err(|e| QueryOutcome::ConnectionError(e.to_string()))?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| QueryOutcome::SyntaxError(e.to_string()))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = Vec::new();
        let mut raw = stmt
            .query([])
            .map_err(|e| QueryOutcome::SyntaxError(e.to_string()))?;
        loop {
            match raw.next() {
                Ok(Some(row)) => {
                    let mut values = Vec::with_capacity(columns.len());
                    for idx in 0..columns.len() {
                        let value = row
                            .get_ref(idx)
                            .map_err(|e| QueryOutcome::ConnectionError(e.to_string()))?;
                        values.push(value_ref_to_json(value));
                    }
                    rows.push(values);
                }
                Ok(None) => break,
                Err(e) => return Err(QueryOutcome::ConnectionError(e.to_string())),
            }
        }
        Ok(RowSet { columns, rows })
    }

    /// Best-effort classification of a zero-row result: check every string
    /// predicate's literal against the cached column values and report the
    /// first one that is missing from its column.
    async fn classify_empty(&self, sql: &str, rowset: RowSet) -> QueryOutcome {
        let predicates = extract_predicates(sql);
        if predicates.is_empty() {
            return QueryOutcome::Success(rowset);
        }

        let schema = match self.cache.schema().await {
            Ok(schema) => schema,
            Err(e) => return QueryOutcome::ConnectionError(e.to_string()),
        };
        let aliases = table_aliases(sql);

        let mut unresolved = false;
        for predicate in predicates {
            let Some(table) = resolve_table(&schema, &aliases, &predicate) else {
                debug!(column = %predicate.column, "could not attribute predicate to a table");
                unresolved = true;
                continue;
            };
            let values = match self.cache.column_values(&table, &predicate.column).await {
                Ok(values) => values,
                Err(e) => return QueryOutcome::ConnectionError(e.to_string()),
            };
            if !literal_present(&values, &predicate) {
                warn!(
                    table = %table,
                    column = %predicate.column,
                    literal = %predicate.literal,
                    "literal not present in column values"
                );
                return QueryOutcome::ValueNotFound {
                    table,
                    column: predicate.column,
                    literal: predicate.literal,
                };
            }
        }

        if unresolved {
            QueryOutcome::Empty
        } else {
            QueryOutcome::Success(rowset)
        }
    }
}

#[async_trait]
impl QueryExecutor for ExecutionAdapter {
    async fn execute(&self, sql: &str) -> QueryOutcome {
        debug!(%sql, "executing query");
        let rowset = match self.run_query(sql) {
            Ok(rowset) => rowset,
            Err(outcome) => return outcome,
        };
        if !rowset.rows.is_empty() {
            return QueryOutcome::Success(rowset);
        }
        self.classify_empty(sql, rowset).await
    }
}
