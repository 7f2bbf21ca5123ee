use thiserror::Error;

/// Errors that can occur while serving or mutating the knowledge graph.
#[derive(Error, Debug)]
pub enum KnowledgeGraphError {
    /// A relation or observation referenced an entity that does not exist.
    #[error("referential error: {message} (entity: {entity})")]
    Referential { message: String, entity: String },

    #[error("database error: {message} (operation: {operation})")]
    Database { message: String, operation: String },

    /// An uploaded database image could not be read as a knowledge graph.
    #[error("import error: {message}")]
    Import { message: String },

    #[error("config error: {message}")]
    Config { message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KnowledgeGraphError {
    /// Builds a `Database` error from a failed SQLite call.
    pub(crate) fn database(operation: &str, context: &str, err: rusqlite::Error) -> Self {
        Self::Database {
            message: format!("{context}: {err}"),
            operation: operation.to_string(),
        }
    }

    /// Builds a `Referential` error for a missing entity.
    pub(crate) fn missing_entity(entity: &str, role: &str) -> Self {
        Self::Referential {
            message: format!("{role} entity '{entity}' does not exist"),
            entity: entity.to_string(),
        }
    }

    /// Returns `true` when the error is a referential-integrity violation.
    pub fn is_referential(&self) -> bool {
        matches!(self, Self::Referential { .. })
    }

    /// Returns `true` when the caller's input caused the failure.
    pub fn is_caller_error(&self) -> bool {
        self.is_referential() || matches!(self, Self::Import { .. })
    }
}

/// Convenience alias for results using `KnowledgeGraphError`.
pub type Result<T> = std::result::Result<T, KnowledgeGraphError>;
