//! Whole-database export and import.
//!
//! Export goes through `VACUUM INTO`, so the image is a consistent snapshot
//! even while other pooled connections keep writing to the WAL. Import
//! attaches the uploaded image and copies its rows over the live tables in
//! one transaction.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, TransactionBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use super::connection::Database;
use crate::errors::{KnowledgeGraphError, Result};
use crate::types::GraphStats;

/// Every SQLite database file starts with this header.
const SQLITE_HEADER: &[u8] = b"SQLite format 3\0";

fn scratch_path(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "knowledge-graph-{label}-{}.db",
        Uuid::new_v4().simple()
    ))
}

fn remove_scratch(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove scratch file");
        }
    }
}

fn import_error(context: &str, err: rusqlite::Error) -> KnowledgeGraphError {
    KnowledgeGraphError::Import {
        message: format!("{context}: {err}"),
    }
}

impl Database {
    /// Returns a self-contained SQLite image of the whole graph.
    pub fn export_image(&self) -> Result<Vec<u8>> {
        let target = scratch_path("export");
        let image = self.vacuum_into(&target);
        remove_scratch(&target);
        image
    }

    fn vacuum_into(&self, target: &Path) -> Result<Vec<u8>> {
        self.conn()?
            .execute("VACUUM INTO ?1", params![target.to_string_lossy()])
            .map_err(|e| KnowledgeGraphError::database("export_db", "failed to snapshot database", e))?;
        Ok(std::fs::read(target)?)
    }

    /// Replaces the whole graph with the contents of a SQLite image produced
    /// by [`Database::export_image`] (or any file with the same tables).
    ///
    /// The swap is one transaction: an image that cannot be read, or whose
    /// rows break referential integrity, leaves the current graph untouched.
    pub fn import_image(&self, image: &[u8]) -> Result<GraphStats> {
        if !image.starts_with(SQLITE_HEADER) {
            return Err(KnowledgeGraphError::Import {
                message: "upload is not a SQLite database image".to_string(),
            });
        }

        let source = scratch_path("import");
        std::fs::write(&source, image)?;
        let replaced = self.replace_from(&source);
        remove_scratch(&source);
        replaced?;

        let stats = self.stats()?;
        info!(
            entities = stats.entity_count,
            relations = stats.relation_count,
            observations = stats.observation_count,
            "database imported"
        );
        Ok(stats)
    }

    fn replace_from(&self, source: &Path) -> Result<()> {
        let mut conn = self.conn()?;
        conn.execute(
            "ATTACH DATABASE ?1 AS incoming",
            params![source.to_string_lossy()],
        )
        .map_err(|e| import_error("failed to open uploaded image", e))?;

        let copied = copy_attached(&mut conn);

        if let Err(e) = conn.execute_batch("DETACH DATABASE incoming") {
            warn!(error = %e, "failed to detach imported image");
        }
        copied
    }
}

fn copy_attached(conn: &mut Connection) -> Result<()> {
    const OP: &str = "import_db";
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| KnowledgeGraphError::database(OP, "failed to begin transaction", e))?;

    tx.execute_batch(
        "DELETE FROM relations;
         DELETE FROM observations;
         DELETE FROM entities;",
    )
    .map_err(|e| KnowledgeGraphError::database(OP, "failed to clear graph", e))?;

    tx.execute_batch(
        "INSERT INTO entities (name, entity_type)
             SELECT name, entity_type FROM incoming.entities ORDER BY rowid;
         INSERT INTO relations (id, from_entity, to_entity, relation_type)
             SELECT id, from_entity, to_entity, relation_type FROM incoming.relations ORDER BY id;
         INSERT INTO observations (id, entity_name, content)
             SELECT id, entity_name, content FROM incoming.observations ORDER BY id;",
    )
    .map_err(|e| import_error("uploaded image is not a knowledge graph", e))?;

    tx.commit()
        .map_err(|e| KnowledgeGraphError::database(OP, "failed to commit transaction", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_sqlite_upload() {
        let db = Database::open_in_memory().unwrap();
        let err = db.import_image(b"definitely not sqlite").unwrap_err();
        assert!(matches!(err, KnowledgeGraphError::Import { .. }));
    }

    #[test]
    fn test_export_then_import_replaces_graph() {
        let source = Database::open_in_memory().unwrap();
        source.create_entity("Alice", "person").unwrap();
        source.create_entity("Acme", "company").unwrap();
        source.create_relation("Alice", "Acme", "works_at").unwrap();
        source.create_observation("Alice", "likes rust").unwrap();
        let image = source.export_image().unwrap();
        assert!(image.starts_with(SQLITE_HEADER));

        let target = Database::open_in_memory().unwrap();
        target.create_entity("Stale", "thing").unwrap();
        let stats = target.import_image(&image).unwrap();

        assert_eq!(stats.entity_count, 2);
        assert_eq!(stats.relation_count, 1);
        assert_eq!(stats.observation_count, 1);
        assert_eq!(target.read_graph().unwrap(), source.read_graph().unwrap());
    }

    #[test]
    fn test_foreign_image_leaves_graph_untouched() {
        let foreign = Database::open_in_memory().unwrap();
        foreign
            .conn()
            .unwrap()
            .execute_batch("DROP TABLE observations;")
            .unwrap();
        let image = foreign.export_image().unwrap();

        let target = Database::open_in_memory().unwrap();
        target.create_entity("Alice", "person").unwrap();
        let err = target.import_image(&image).unwrap_err();

        assert!(err.is_caller_error());
        assert_eq!(target.stats().unwrap().entity_count, 1);
    }
}
