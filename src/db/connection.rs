use std::path::Path;
use std::time::Duration;

use r2d2::{CustomizeConnection, Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::debug;

use crate::errors::{KnowledgeGraphError, Result};

/// The embedded SQL schema applied whenever a database is opened.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Connections kept by a file-backed pool.
const POOL_SIZE: u32 = 8;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Applies per-connection pragmas as the pool opens each connection.
#[derive(Debug)]
struct SqliteCustomizer;

impl CustomizeConnection<Connection, rusqlite::Error> for SqliteCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(())
    }
}

/// SQLite database backing the knowledge graph.
///
/// Every transport draws connections from one pool. Multi-statement
/// operations run inside SQLite transactions, so concurrent callers are
/// serialized by SQLite's own locking and nothing else.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Opens (or creates) the database at `db_path`, creating parent
    /// directories if needed, then switches it to WAL and applies the schema.
    pub fn initialize(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| KnowledgeGraphError::Database {
                    message: format!("failed to create database directory: {e}"),
                    operation: "initialize".to_string(),
                })?;
            }
        }

        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .connection_customizer(Box::new(SqliteCustomizer))
            .build(SqliteConnectionManager::file(db_path))?;

        let db = Self { pool };
        let mode: String = db
            .conn()?
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| KnowledgeGraphError::database("initialize", "failed to enable WAL", e))?;
        debug!(journal_mode = %mode, path = %db_path.display(), "database opened");
        db.apply_schema()?;
        Ok(db)
    }

    /// Opens a private in-memory database with the full schema applied.
    ///
    /// An in-memory database exists only inside the connection that created
    /// it, so this pool holds exactly one connection and never recycles it.
    pub fn open_in_memory() -> Result<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_customizer(Box::new(SqliteCustomizer))
            .build(SqliteConnectionManager::memory())?;

        let db = Self { pool };
        db.apply_schema()?;
        Ok(db)
    }

    fn apply_schema(&self) -> Result<()> {
        self.conn()?
            .execute_batch(SCHEMA_SQL)
            .map_err(|e| KnowledgeGraphError::database("initialize", "failed to apply schema", e))
    }

    /// Checks a connection out of the pool.
    pub(crate) fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }
}
