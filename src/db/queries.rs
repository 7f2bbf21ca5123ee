use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};

use super::connection::Database;
use crate::errors::{KnowledgeGraphError, Result};
use crate::types::*;

// ---------------------------------------------------------------------------
// Helpers: row mapping and shared lookups
// ---------------------------------------------------------------------------

fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<Entity> {
    Ok(Entity {
        name: row.get("name")?,
        entity_type: row.get("entity_type")?,
    })
}

fn row_to_relation(row: &rusqlite::Row) -> rusqlite::Result<Relation> {
    Ok(Relation {
        id: row.get("id")?,
        from: row.get("from_entity")?,
        to: row.get("to_entity")?,
        relation_type: row.get("relation_type")?,
    })
}

fn row_to_observation(row: &rusqlite::Row) -> rusqlite::Result<Observation> {
    Ok(Observation {
        id: row.get("id")?,
        entity_name: row.get("entity_name")?,
        content: row.get("content")?,
    })
}

/// Returns `"?,?,?"` with `n` placeholders for an `IN (...)` clause.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

fn entity_exists(conn: &Connection, name: &str, operation: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM entities WHERE name = ?1)",
        params![name],
        |row| row.get::<_, bool>(0),
    )
    .map_err(|e| KnowledgeGraphError::database(operation, "failed to check entity existence", e))
}

/// Collects every row of `sql` mapped through `f`.
fn query_all<T, P, F>(conn: &Connection, sql: &str, params: P, f: F, operation: &str) -> Result<Vec<T>>
where
    P: rusqlite::Params,
    F: FnMut(&rusqlite::Row) -> rusqlite::Result<T>,
{
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| KnowledgeGraphError::database(operation, "failed to prepare query", e))?;

    let rows = stmt
        .query_map(params, f)
        .map_err(|e| KnowledgeGraphError::database(operation, "failed to run query", e))?;

    rows.collect::<rusqlite::Result<Vec<T>>>()
        .map_err(|e| KnowledgeGraphError::database(operation, "failed to read row", e))
}

/// Returns every relation whose `from` or `to` is one of `names`.
fn relations_touching(conn: &Connection, names: &[String], operation: &str) -> Result<Vec<Relation>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }

    let marks = placeholders(names.len());
    let sql = format!(
        "SELECT id, from_entity, to_entity, relation_type
         FROM relations
         WHERE from_entity IN ({marks}) OR to_entity IN ({marks})
         ORDER BY id"
    );

    query_all(
        conn,
        &sql,
        params_from_iter(names.iter().chain(names.iter())),
        row_to_relation,
        operation,
    )
}

fn insert_observation(conn: &Connection, entity_name: &str, content: &str, operation: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO observations (entity_name, content) VALUES (?1, ?2)",
        params![entity_name, content],
    )
    .map_err(|e| KnowledgeGraphError::database(operation, "failed to insert observation", e))?;
    Ok(conn.last_insert_rowid())
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

impl Database {
    /// Inserts an entity unless one with the same name already exists.
    ///
    /// Creating an existing name is a no-op, not an error; the stored type is
    /// left untouched.
    pub fn create_entity(&self, name: &str, entity_type: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR IGNORE INTO entities (name, entity_type) VALUES (?1, ?2)",
                params![name, entity_type],
            )
            .map_err(|e| KnowledgeGraphError::database("create_entity", "failed to insert entity", e))?;
        Ok(())
    }

    /// Inserts a relation between two existing entities and returns its id.
    ///
    /// Fails with a referential error if either endpoint is missing.
    pub fn create_relation(&self, from: &str, to: &str, relation_type: &str) -> Result<i64> {
        const OP: &str = "create_relation";
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| KnowledgeGraphError::database(OP, "failed to begin transaction", e))?;

        if !entity_exists(&tx, from, OP)? {
            return Err(KnowledgeGraphError::missing_entity(from, "source"));
        }
        if !entity_exists(&tx, to, OP)? {
            return Err(KnowledgeGraphError::missing_entity(to, "target"));
        }

        tx.execute(
            "INSERT INTO relations (from_entity, to_entity, relation_type) VALUES (?1, ?2, ?3)",
            params![from, to, relation_type],
        )
        .map_err(|e| KnowledgeGraphError::database(OP, "failed to insert relation", e))?;
        let id = tx.last_insert_rowid();

        tx.commit()
            .map_err(|e| KnowledgeGraphError::database(OP, "failed to commit transaction", e))?;
        Ok(id)
    }

    /// Attaches an observation to an existing entity and returns its id.
    pub fn create_observation(&self, entity_name: &str, content: &str) -> Result<i64> {
        const OP: &str = "create_observation";
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| KnowledgeGraphError::database(OP, "failed to begin transaction", e))?;

        if !entity_exists(&tx, entity_name, OP)? {
            return Err(KnowledgeGraphError::missing_entity(entity_name, "owning"));
        }
        let id = insert_observation(&tx, entity_name, content, OP)?;

        tx.commit()
            .map_err(|e| KnowledgeGraphError::database(OP, "failed to commit transaction", e))?;
        Ok(id)
    }

    /// Inserts a batch of observations as a single transaction.
    ///
    /// The first item naming a missing entity aborts the whole batch; nothing
    /// from the call is kept.
    pub fn add_observations(&self, batch: &[NewObservation]) -> Result<Vec<Observation>> {
        const OP: &str = "add_observations";
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| KnowledgeGraphError::database(OP, "failed to begin transaction", e))?;

        let mut added = Vec::with_capacity(batch.len());
        for item in batch {
            if !entity_exists(&tx, &item.entity_name, OP)? {
                return Err(KnowledgeGraphError::missing_entity(&item.entity_name, "owning"));
            }
            let id = insert_observation(&tx, &item.entity_name, &item.content, OP)?;
            added.push(Observation {
                id,
                entity_name: item.entity_name.clone(),
                content: item.content.clone(),
            });
        }

        tx.commit()
            .map_err(|e| KnowledgeGraphError::database(OP, "failed to commit transaction", e))?;
        Ok(added)
    }
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

impl Database {
    /// Returns every entity, relation and observation in insertion order.
    pub fn read_graph(&self) -> Result<GraphSnapshot> {
        const OP: &str = "read_graph";
        let conn = self.conn()?;

        let entities = query_all(
            &conn,
            "SELECT name, entity_type FROM entities ORDER BY rowid",
            [],
            row_to_entity,
            OP,
        )?;
        let relations = query_all(
            &conn,
            "SELECT id, from_entity, to_entity, relation_type FROM relations ORDER BY id",
            [],
            row_to_relation,
            OP,
        )?;
        let observations = query_all(
            &conn,
            "SELECT id, entity_name, content FROM observations ORDER BY id",
            [],
            row_to_observation,
            OP,
        )?;

        Ok(GraphSnapshot {
            entities,
            relations,
            observations,
        })
    }

    /// Finds entities whose name, type, or any observation contains `query`
    /// (case-insensitive), plus every relation touching them.
    pub fn search_nodes(&self, query: &str) -> Result<NodeSet> {
        const OP: &str = "search_nodes";
        let conn = self.conn()?;

        let entities = query_all(
            &conn,
            "SELECT DISTINCT e.name, e.entity_type
             FROM entities e
             LEFT JOIN observations o ON e.name = o.entity_name
             WHERE instr(lower(e.name), lower(?1)) > 0
                OR instr(lower(e.entity_type), lower(?1)) > 0
                OR instr(lower(o.content), lower(?1)) > 0
             ORDER BY e.rowid",
            params![query],
            row_to_entity,
            OP,
        )?;

        if entities.is_empty() {
            return Ok(NodeSet::default());
        }

        let names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
        let relations = relations_touching(&conn, &names, OP)?;
        Ok(NodeSet {
            entities,
            relations,
        })
    }

    /// Returns the existing entities among `names` plus every relation
    /// touching them. Unknown names are dropped silently.
    pub fn open_nodes(&self, names: &[String]) -> Result<NodeSet> {
        const OP: &str = "open_nodes";
        if names.is_empty() {
            return Ok(NodeSet::default());
        }

        let conn = self.conn()?;
        let sql = format!(
            "SELECT name, entity_type FROM entities WHERE name IN ({}) ORDER BY rowid",
            placeholders(names.len())
        );
        let entities = query_all(&conn, &sql, params_from_iter(names.iter()), row_to_entity, OP)?;

        if entities.is_empty() {
            return Ok(NodeSet::default());
        }

        let found: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
        let relations = relations_touching(&conn, &found, OP)?;
        Ok(NodeSet {
            entities,
            relations,
        })
    }

    /// Returns row counts for the three tables.
    pub fn stats(&self) -> Result<GraphStats> {
        const OP: &str = "stats";
        let conn = self.conn()?;
        let count = |table: &str| -> Result<u64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
            .map_err(|e| KnowledgeGraphError::database(OP, "failed to count rows", e))
        };

        Ok(GraphStats {
            entity_count: count("entities")?,
            relation_count: count("relations")?,
            observation_count: count("observations")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Deletion
// ---------------------------------------------------------------------------

impl Database {
    /// Deletes entities together with every relation touching them and every
    /// observation they own, as one transaction. Returns the number of
    /// entity rows removed.
    ///
    /// Any failure rolls the whole call back.
    pub fn delete_entities(&self, names: &[String]) -> Result<usize> {
        const OP: &str = "delete_entities";
        if names.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| KnowledgeGraphError::database(OP, "failed to begin transaction", e))?;
        let marks = placeholders(names.len());

        tx.execute(
            &format!(
                "DELETE FROM relations WHERE from_entity IN ({marks}) OR to_entity IN ({marks})"
            ),
            params_from_iter(names.iter().chain(names.iter())),
        )
        .map_err(|e| KnowledgeGraphError::database(OP, "failed to delete relations", e))?;

        tx.execute(
            &format!("DELETE FROM observations WHERE entity_name IN ({marks})"),
            params_from_iter(names.iter()),
        )
        .map_err(|e| KnowledgeGraphError::database(OP, "failed to delete observations", e))?;

        let deleted = tx
            .execute(
                &format!("DELETE FROM entities WHERE name IN ({marks})"),
                params_from_iter(names.iter()),
            )
            .map_err(|e| KnowledgeGraphError::database(OP, "failed to delete entities", e))?;

        tx.commit()
            .map_err(|e| KnowledgeGraphError::database(OP, "failed to commit transaction", e))?;
        Ok(deleted)
    }

    /// Deletes relations by exact `(from, to, type)` match. Keys matching
    /// nothing are no-ops. Returns the number of relations removed.
    pub fn delete_relations(&self, keys: &[RelationKey]) -> Result<usize> {
        const OP: &str = "delete_relations";
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| KnowledgeGraphError::database(OP, "failed to begin transaction", e))?;

        let mut removed = 0;
        {
            let mut stmt = tx
                .prepare_cached(
                    "DELETE FROM relations
                     WHERE from_entity = ?1 AND to_entity = ?2 AND relation_type = ?3",
                )
                .map_err(|e| KnowledgeGraphError::database(OP, "failed to prepare statement", e))?;

            for key in keys {
                removed += stmt
                    .execute(params![key.from, key.to, key.relation_type])
                    .map_err(|e| KnowledgeGraphError::database(OP, "failed to delete relation", e))?;
            }
        }

        tx.commit()
            .map_err(|e| KnowledgeGraphError::database(OP, "failed to commit transaction", e))?;
        Ok(removed)
    }

    /// Deletes, per entity, every observation whose content exactly matches
    /// one of the given strings. Deletions with no contents are skipped.
    /// Returns the number of observations removed.
    pub fn delete_observations(&self, deletions: &[ObservationDeletion]) -> Result<usize> {
        const OP: &str = "delete_observations";
        if deletions.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| KnowledgeGraphError::database(OP, "failed to begin transaction", e))?;

        let mut removed = 0;
        for deletion in deletions {
            if deletion.observations.is_empty() {
                continue;
            }

            let sql = format!(
                "DELETE FROM observations WHERE entity_name = ? AND content IN ({})",
                placeholders(deletion.observations.len())
            );
            removed += tx
                .execute(
                    &sql,
                    params_from_iter(
                        std::iter::once(&deletion.entity_name).chain(deletion.observations.iter()),
                    ),
                )
                .map_err(|e| KnowledgeGraphError::database(OP, "failed to delete observations", e))?;
        }

        tx.commit()
            .map_err(|e| KnowledgeGraphError::database(OP, "failed to commit transaction", e))?;
        Ok(removed)
    }
}
