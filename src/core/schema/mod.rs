mod sqlite;

pub use sqlite::SqliteCatalog;

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Default bound on DISTINCT values fetched per column.
pub const DEFAULT_MAX_COLUMN_VALUES: usize = 500;

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnInfo {
    /// True for columns that hold text, the only kind fuzzy recovery
    /// applies to. SQLite treats an empty declared type as dynamic, which
    /// we count as textual.
    pub fn is_textual(&self) -> bool {
        let ty = self.decl_type.to_uppercase();
        ty.is_empty() || ty.contains("CHAR") || ty.contains("TEXT") || ty.contains("CLOB")
    }

    pub fn is_numeric(&self) -> bool {
        let ty = self.decl_type.to_uppercase();
        ["INT", "REAL", "FLOA", "DOUB", "NUM", "DEC"]
            .iter()
            .any(|p| ty.contains(p))
    }
}

#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

/// Min/max/avg for a numeric column, surfaced in the statistics text so the
/// model knows the value ranges it can filter on.
#[derive(Debug, Clone)]
pub struct NumericColumnStats {
    pub column: String,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub foreign_keys: Vec<ForeignKey>,
    pub row_count: i64,
    pub numeric_stats: Vec<NumericColumnStats>,
}

/// Full snapshot of the catalog: tables in a stable order, each with its
/// columns, foreign-key edges, and row-count estimate.
#[derive(Debug, Clone, Default)]
pub struct SchemaContext {
    pub tables: Vec<TableInfo>,
}

impl SchemaContext {
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnInfo> {
        self.table(table)?
            .columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(column))
    }

    /// Names of every table declaring `column`, in schema order.
    pub fn tables_with_column(&self, column: &str) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.columns.iter().any(|c| c.name.eq_ignore_ascii_case(column)))
            .map(|t| t.name.as_str())
            .collect()
    }

    /// Compact per-table description used in the synthesis prompt.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            let _ = writeln!(out, "Table: {}", table.name);
            let _ = writeln!(out, "  Columns:");
            for col in &table.columns {
                let nullable = if col.nullable { "NULL" } else { "NOT NULL" };
                let pk = if col.primary_key { " [PK]" } else { "" };
                let ty = if col.decl_type.is_empty() {
                    "ANY".to_string()
                } else {
                    col.decl_type.to_uppercase()
                };
                let _ = writeln!(out, "    - {} ({}) {}{}", col.name, ty, nullable, pk);
            }
            if !table.foreign_keys.is_empty() {
                let _ = writeln!(out, "  Foreign Keys:");
                for fk in &table.foreign_keys {
                    let _ = writeln!(
                        out,
                        "    - {} -> {}({})",
                        fk.column, fk.ref_table, fk.ref_column
                    );
                }
            }
        }
        out
    }

    /// Row counts plus numeric column ranges, rendered for the prompt.
    pub fn statistics(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            let _ = writeln!(out, "{}: {} rows", table.name, table.row_count);
            for stat in &table.numeric_stats {
                let _ = writeln!(
                    out,
                    "  {}: min {}, max {}, avg {:.2}",
                    stat.column, stat.min, stat.max, stat.avg
                );
            }
        }
        out
    }
}

/// Read-only catalog access. The cache is the sole consumer; tests swap in
/// counting stubs.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn load_schema(&self) -> Result<SchemaContext>;

    /// Distinct non-null values of a column, stringified, at most `limit`.
    async fn load_column_values(&self, table: &str, column: &str, limit: usize)
    -> Result<Vec<String>>;
}

#[derive(Default)]
struct CacheInner {
    schema: Option<Arc<SchemaContext>>,
    values: HashMap<(String, String), Arc<Vec<String>>>,
}

/// Lazily populated, explicitly refreshed cache over a [`Catalog`].
///
/// The interior mutex is held across the underlying catalog call, so two
/// concurrent misses on the same key perform exactly one catalog query
/// (single-flight). Nothing is committed on a failed load.
pub struct SchemaCache {
    catalog: Arc<dyn Catalog>,
    max_column_values: usize,
    inner: Mutex<CacheInner>,
}

impl SchemaCache {
    pub fn new(catalog: Arc<dyn Catalog>, max_column_values: usize) -> Self {
        Self {
            catalog,
            max_column_values,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub async fn schema(&self) -> Result<Arc<SchemaContext>> {
        let mut inner = self.inner.lock().await;
        if let Some(schema) = &inner.schema {
            return Ok(schema.clone());
        }
        debug!("schema cache miss, loading catalog");
        let schema = Arc::new(self.catalog.load_schema().await?);
        info!(tables = schema.tables.len(), "schema context populated");
        inner.schema = Some(schema.clone());
        Ok(schema)
    }

    pub async fn schema_summary(&self) -> Result<String> {
        Ok(self.schema().await?.summary())
    }

    pub async fn statistics(&self) -> Result<String> {
        Ok(self.schema().await?.statistics())
    }

    pub async fn column_values(&self, table: &str, column: &str) -> Result<Arc<Vec<String>>> {
        let key = (table.to_lowercase(), column.to_lowercase());
        let mut inner = self.inner.lock().await;
        if let Some(values) = inner.values.get(&key) {
            return Ok(values.clone());
        }
        debug!(table, column, "column value cache miss");
        let values = Arc::new(
            self.catalog
                .load_column_values(table, column, self.max_column_values)
                .await?,
        );
        inner.values.insert(key, values.clone());
        Ok(values)
    }

    /// Drop every cached entry. The only invalidation path; there is no
    /// automatic expiry.
    pub async fn refresh(&self) {
        let mut inner = self.inner.lock().await;
        inner.schema = None;
        inner.values.clear();
        info!("schema cache cleared");
    }
}
