use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;

use super::{Catalog, ColumnInfo, ForeignKey, NumericColumnStats, SchemaContext, TableInfo};
use crate::core::db::ConnectionFactory;

/// Catalog reader over SQLite's own introspection surface
/// (`sqlite_master` + `PRAGMA table_info` / `foreign_key_list`).
pub struct SqliteCatalog {
    factory: Arc<dyn ConnectionFactory>,
}

impl SqliteCatalog {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self { factory }
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn load_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut tables = Vec::new();
    for row in rows {
        tables.push(row?);
    }
    Ok(tables)
}

fn load_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let rows = stmt.query_map([], |row| {
        Ok(ColumnInfo {
            name: row.get(1)?,
            decl_type: row.get(2)?,
            nullable: row.get::<_, i64>(3)? == 0,
            primary_key: row.get::<_, i64>(5)? > 0,
        })
    })?;
    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }
    Ok(columns)
}

fn load_foreign_keys(conn: &Connection, table: &str) -> Result<Vec<ForeignKey>> {
    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(table)))?;
    let rows = stmt.query_map([], |row| {
        Ok(ForeignKey {
            ref_table: row.get(2)?,
            column: row.get(3)?,
            // `to` is NULL when the FK references the parent's primary key.
            ref_column: row
                .get::<_, Option<String>>(4)?
                .unwrap_or_else(|| "rowid".to_string()),
        })
    })?;
    let mut fks = Vec::new();
    for row in rows {
        fks.push(row?);
    }
    Ok(fks)
}

fn load_numeric_stats(
    conn: &Connection,
    table: &str,
    columns: &[ColumnInfo],
) -> Result<Vec<NumericColumnStats>> {
    let mut stats = Vec::new();
    for col in columns.iter().filter(|c| c.is_numeric() && !c.primary_key) {
        let sql = format!(
            "SELECT MIN({c}), MAX({c}), AVG({c}) FROM {t} WHERE {c} IS NOT NULL",
            c = quote_ident(&col.name),
            t = quote_ident(table),
        );
        let row: (Option<f64>, Option<f64>, Option<f64>) =
            conn.query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        if let (Some(min), Some(max), Some(avg)) = row {
            stats.push(NumericColumnStats {
                column: col.name.clone(),
                min,
                max,
                avg,
            });
        }
    }
    Ok(stats)
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn load_schema(&self) -> Result<SchemaContext> {
        let conn = self.factory.connect()?;
        let mut tables = Vec::new();
        for name in load_tables(&conn)? {
            let columns = load_columns(&conn, &name)?;
            let foreign_keys = load_foreign_keys(&conn, &name)?;
            let row_count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_ident(&name)),
                [],
                |row| row.get(0),
            )?;
            let numeric_stats = load_numeric_stats(&conn, &name, &columns)?;
            tables.push(TableInfo {
                name,
                columns,
                foreign_keys,
                row_count,
                numeric_stats,
            });
        }
        Ok(SchemaContext { tables })
    }

    async fn load_column_values(
        &self,
        table: &str,
        column: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let conn = self.factory.connect()?;
        let sql = format!(
            "SELECT DISTINCT CAST({c} AS TEXT) FROM {t} WHERE {c} IS NOT NULL LIMIT ?1",
            c = quote_ident(column),
            t = quote_ident(table),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([limit as i64], |row| row.get::<_, String>(0))?;
        let mut values = Vec::new();
        for row in rows {
            values.push(row?);
        }
        Ok(values)
    }
}
