//! One-shot REST handlers under `/api/`.
//!
//! Each handler decodes a JSON body (or query string), runs one store call
//! on the blocking pool, and answers synchronously. Record fields use the
//! store's snake_case names.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::AppState;
use crate::db::Database;
use crate::errors::{KnowledgeGraphError, Result};
use crate::mcp::tools::ObservationSpec;
use crate::types::{Entity, NewObservation, ObservationDeletion, RelationKey};

/// Error returned by a REST handler, rendered as a plain-text body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl ApiError {
    /// Maps a store error: referential violations and unreadable uploads are
    /// the caller's fault, everything else is a server failure.
    fn from_store(context: &str, err: KnowledgeGraphError) -> Self {
        let message = format!("{context}: {err}");
        if err.is_caller_error() {
            Self::BadRequest(message)
        } else {
            warn!(error = %err, "{context}");
            Self::Internal(message)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message).into_response(),
        }
    }
}

type ApiResult = std::result::Result<Response, ApiError>;

/// Largest accepted `import_db` upload.
pub const MAX_IMPORT_BYTES: usize = 256 * 1024 * 1024;

/// Runs `f` against the store on the blocking pool.
async fn with_store<T, F>(state: &AppState, context: &'static str, f: F) -> std::result::Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> Result<T> + Send + 'static,
{
    let db = Arc::clone(state.server.database());
    match tokio::task::spawn_blocking(move || f(&db)).await {
        Ok(result) => result.map_err(|e| ApiError::from_store(context, e)),
        Err(e) => Err(ApiError::Internal(format!("{context}: {e}"))),
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> std::result::Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {e}")))
}

#[derive(Debug, Deserialize)]
struct CreateEntitiesRequest {
    entities: Vec<Entity>,
}

#[derive(Debug, Deserialize)]
struct RelationInput {
    from_entity: String,
    to_entity: String,
    relation_type: String,
}

#[derive(Debug, Deserialize)]
struct CreateRelationsRequest {
    relations: Vec<RelationInput>,
}

#[derive(Debug, Deserialize)]
struct AddObservationsRequest {
    observations: Vec<ObservationSpec>,
}

#[derive(Debug, Deserialize)]
struct DeleteEntitiesRequest {
    #[serde(rename = "entityNames")]
    entity_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteObservationsRequest {
    deletions: Vec<ObservationDeletion>,
}

#[derive(Debug, Deserialize)]
struct DeleteRelationsRequest {
    relations: Vec<RelationKey>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    query: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenNodesRequest {
    names: Vec<String>,
}

/// `GET /api/read_graph`
pub async fn read_graph(State(state): State<AppState>) -> ApiResult {
    let snapshot = with_store(&state, "Failed to read graph", |db| db.read_graph()).await?;
    Ok(Json(snapshot).into_response())
}

/// `POST /api/create_entities`
pub async fn create_entities(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let request: CreateEntitiesRequest = parse_body(&body)?;
    with_store(&state, "Failed to create entity", move |db| {
        request
            .entities
            .iter()
            .try_for_each(|entity| db.create_entity(&entity.name, &entity.entity_type))
    })
    .await?;
    Ok((StatusCode::CREATED, Json(json!({ "status": "success" }))).into_response())
}

/// `POST /api/create_relations`: stops at the first relation that cannot
/// be created; relations before it are kept.
pub async fn create_relations(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let request: CreateRelationsRequest = parse_body(&body)?;
    let ids = with_store(&state, "Failed to create relation", move |db| {
        request
            .relations
            .iter()
            .map(|r| db.create_relation(&r.from_entity, &r.to_entity, &r.relation_type))
            .collect::<Result<Vec<i64>>>()
    })
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "ids": ids })),
    )
        .into_response())
}

/// `POST /api/add_observations`: all-or-nothing.
pub async fn add_observations(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let request: AddObservationsRequest = parse_body(&body)?;
    let pending: Vec<NewObservation> = request
        .observations
        .into_iter()
        .flat_map(ObservationSpec::into_new_observations)
        .collect();

    let added = with_store(&state, "Failed to add observations", move |db| {
        db.add_observations(&pending)
    })
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "success", "added": added })),
    )
        .into_response())
}

/// `DELETE /api/delete_entities`
pub async fn delete_entities(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let request: DeleteEntitiesRequest = parse_body(&body)?;
    let deleted = with_store(&state, "Failed to delete entities", move |db| {
        db.delete_entities(&request.entity_names)
    })
    .await?;
    Ok(Json(json!({ "status": "success", "deleted": deleted })).into_response())
}

/// `DELETE /api/delete_observations`
pub async fn delete_observations(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let request: DeleteObservationsRequest = parse_body(&body)?;
    with_store(&state, "Failed to delete observations", move |db| {
        db.delete_observations(&request.deletions)
    })
    .await?;
    Ok(Json(json!({ "status": "success" })).into_response())
}

/// `DELETE /api/delete_relations`
pub async fn delete_relations(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let request: DeleteRelationsRequest = parse_body(&body)?;
    with_store(&state, "Failed to delete relations", move |db| {
        db.delete_relations(&request.relations)
    })
    .await?;
    Ok(Json(json!({ "status": "success" })).into_response())
}

/// `GET /api/search_nodes?query=...`
pub async fn search_nodes(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult {
    let query = params
        .query
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing query parameter".to_string()))?;

    let nodes = with_store(&state, "Failed to search nodes", move |db| db.search_nodes(&query)).await?;
    Ok(Json(nodes).into_response())
}

/// `POST /api/open_nodes`
pub async fn open_nodes(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let request: OpenNodesRequest = parse_body(&body)?;
    let nodes = with_store(&state, "Failed to open nodes", move |db| db.open_nodes(&request.names)).await?;
    Ok(Json(nodes).into_response())
}

/// `GET /api/export_db`: the whole store as a SQLite file.
pub async fn export_db(State(state): State<AppState>) -> ApiResult {
    let image = with_store(&state, "Failed to export database", |db| db.export_image()).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"knowledge_graph.db\"",
            ),
        ],
        image,
    )
        .into_response())
}

/// `POST /api/import_db`: replaces the store with an uploaded SQLite file.
pub async fn import_db(State(state): State<AppState>, body: Bytes) -> ApiResult {
    if body.is_empty() {
        return Err(ApiError::BadRequest("Empty upload".to_string()));
    }
    with_store(&state, "Failed to import database", move |db| db.import_image(&body)).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
