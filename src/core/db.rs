use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Capability for opening a connection to the data store. The orchestrator
/// and catalog receive this explicitly at construction; there is no
/// module-level default.
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self) -> Result<Connection>;
}

/// Opens scoped connections against a SQLite file. Each call returns a
/// fresh connection; callers drop it when the operation ends so no
/// connection outlives its query.
pub struct SqliteFactory {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteFactory {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectionFactory for SqliteFactory {
    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("failed to open database {}", self.path.display()))?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_opens_fresh_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db");
        let factory = SqliteFactory::new(&path);

        let conn = factory.connect().unwrap();
        conn.execute("CREATE TABLE t (x INTEGER)", []).unwrap();
        drop(conn);

        let conn = factory.connect().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn unreachable_database_is_an_error() {
        let factory = SqliteFactory::new("/definitely/not/a/real/dir/data.db");
        assert!(factory.connect().is_err());
    }
}
