//! MCP tool catalog and dispatch for the knowledge graph.
//!
//! Every tool maps to a `Database` operation. Raw `tools/call` arguments are
//! validated once, at the dispatch boundary, into a [`ToolCall`] value; the
//! store never sees loosely-typed maps.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::Database;
use crate::errors::{KnowledgeGraphError, Result};
use crate::types::{NewObservation, ObservationDeletion, RelationKey};

/// A tool definition exposed by the MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema describing the tool's input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn tool(name: &str, description: &str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// Returns the nine tools advertised by `tools/list`.
///
/// The legacy single-item tools (`create_entity`, `create_relation`,
/// `create_observation`) are callable but not listed.
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        tool(
            "read_graph",
            "Read the entire knowledge graph including entities, relations, and observations",
            json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        ),
        tool(
            "create_entities",
            "Create multiple new entities in the knowledge graph",
            json!({
                "type": "object",
                "properties": {
                    "entities": {
                        "type": "array",
                        "description": "Array of entity objects with name, entityType, and observations"
                    }
                },
                "required": ["entities"]
            }),
        ),
        tool(
            "create_relations",
            "Create multiple new relations between entities",
            json!({
                "type": "object",
                "properties": {
                    "relations": {
                        "type": "array",
                        "description": "Array of relation objects with from, to, and relationType"
                    }
                },
                "required": ["relations"]
            }),
        ),
        tool(
            "add_observations",
            "Add new observations to existing entities",
            json!({
                "type": "object",
                "properties": {
                    "observations": {
                        "type": "array",
                        "description": "Array of observation objects with entityName and contents"
                    }
                },
                "required": ["observations"]
            }),
        ),
        tool(
            "delete_entities",
            "Remove entities and their associated relations and observations",
            json!({
                "type": "object",
                "properties": {
                    "entityNames": {
                        "type": "array",
                        "description": "Array of entity names to delete"
                    }
                },
                "required": ["entityNames"]
            }),
        ),
        tool(
            "delete_observations",
            "Remove specific observations from entities",
            json!({
                "type": "object",
                "properties": {
                    "deletions": {
                        "type": "array",
                        "description": "Array of deletion objects with entityName and observations"
                    }
                },
                "required": ["deletions"]
            }),
        ),
        tool(
            "delete_relations",
            "Remove specific relations from the graph",
            json!({
                "type": "object",
                "properties": {
                    "relations": {
                        "type": "array",
                        "description": "Array of relation objects with from, to, and relationType"
                    }
                },
                "required": ["relations"]
            }),
        ),
        tool(
            "search_nodes",
            "Search nodes based on query",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search string to match against entity names, types, and observation content"
                    }
                },
                "required": ["query"]
            }),
        ),
        tool(
            "open_nodes",
            "Retrieve specific nodes by name",
            json!({
                "type": "object",
                "properties": {
                    "names": {
                        "type": "array",
                        "description": "Array of node names to retrieve"
                    }
                },
                "required": ["names"]
            }),
        ),
    ]
}

// ---------------------------------------------------------------------------
// Typed arguments
// ---------------------------------------------------------------------------

/// One item of `create_entities`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySpec {
    pub name: String,
    pub entity_type: String,
    /// Observations to attach once the entity exists. Non-string values are
    /// ignored.
    #[serde(default)]
    pub observations: Vec<Value>,
}

/// Observation text given either as one string or as a list of strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Contents {
    One(String),
    Many(Vec<String>),
}

/// One item of `add_observations`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationSpec {
    pub entity_name: String,
    pub contents: Contents,
}

impl ObservationSpec {
    pub fn into_new_observations(self) -> Vec<NewObservation> {
        let contents = match self.contents {
            Contents::One(content) => vec![content],
            Contents::Many(contents) => contents,
        };
        contents
            .into_iter()
            .map(|content| NewObservation::new(self.entity_name.clone(), content))
            .collect()
    }
}

/// Arguments of the legacy `create_entity` tool.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyEntityArgs {
    pub name: String,
    pub entity_type: String,
}

/// Arguments of the legacy `create_relation` tool.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyRelationArgs {
    pub from_entity: String,
    pub to_entity: String,
    pub relation_type: String,
}

/// Arguments of the legacy `create_observation` tool.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyObservationArgs {
    pub entity_name: String,
    pub content: String,
}

/// Array items that parsed, plus the number of malformed items dropped.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    pub items: Vec<T>,
    pub skipped: usize,
}

/// A validated `tools/call` request.
///
/// Batch variants built from arrays skip malformed items (missing or
/// mistyped fields) and keep going. Whether store failures abort the call is
/// decided per variant and noted on each one.
#[derive(Debug, Clone)]
pub enum ToolCall {
    ReadGraph,
    /// Each item is applied on its own; store failures skip the item.
    CreateEntities(Batch<EntitySpec>),
    /// Each item is applied on its own; a missing endpoint skips the item.
    CreateRelations(Batch<RelationKey>),
    /// All-or-nothing: the first missing entity aborts the whole call.
    AddObservations(Batch<ObservationSpec>),
    /// All-or-nothing cascading delete.
    DeleteEntities(Vec<String>),
    /// One transaction; unmatched contents are no-ops.
    DeleteObservations(Batch<ObservationDeletion>),
    /// One transaction; unmatched relations are no-ops.
    DeleteRelations(Batch<RelationKey>),
    SearchNodes { query: String },
    OpenNodes(Vec<String>),
    CreateEntity(LegacyEntityArgs),
    CreateRelation(LegacyRelationArgs),
    CreateObservation(LegacyObservationArgs),
}

/// Why a `tools/call` could not be turned into a [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolCallError {
    /// Reported to the client as a protocol-level error.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    /// Reported to the client as an error tool result.
    #[error("{0}")]
    InvalidArguments(String),
}

fn extract_batch<T: DeserializeOwned>(
    args: &Map<String, Value>,
    key: &str,
) -> std::result::Result<Batch<T>, ToolCallError> {
    let raw = args
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| ToolCallError::InvalidArguments(format!("missing or invalid {key} parameter")))?;

    let mut items = Vec::with_capacity(raw.len());
    let mut skipped = 0;
    for (index, item) in raw.iter().enumerate() {
        match serde_json::from_value::<T>(item.clone()) {
            Ok(parsed) => items.push(parsed),
            Err(e) => {
                debug!(key, index, error = %e, "skipping malformed item");
                skipped += 1;
            }
        }
    }

    Ok(Batch { items, skipped })
}

fn extract_names(
    args: &Map<String, Value>,
    key: &str,
) -> std::result::Result<Vec<String>, ToolCallError> {
    let raw = args
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| ToolCallError::InvalidArguments(format!("missing or invalid {key} parameter")))?;

    Ok(raw
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}

fn extract_args<T: DeserializeOwned>(
    args: &Map<String, Value>,
    required: &str,
) -> std::result::Result<T, ToolCallError> {
    serde_json::from_value(Value::Object(args.clone())).map_err(|_| {
        ToolCallError::InvalidArguments(format!("missing required parameters: {required}"))
    })
}

impl ToolCall {
    /// Validates the `name` and `arguments` of a `tools/call` request.
    pub fn parse(name: &str, args: &Map<String, Value>) -> std::result::Result<Self, ToolCallError> {
        let call = match name {
            "read_graph" => Self::ReadGraph,
            "create_entities" => Self::CreateEntities(extract_batch(args, "entities")?),
            "create_relations" => Self::CreateRelations(extract_batch(args, "relations")?),
            "add_observations" => Self::AddObservations(extract_batch(args, "observations")?),
            "delete_entities" => Self::DeleteEntities(extract_names(args, "entityNames")?),
            "delete_observations" => Self::DeleteObservations(extract_batch(args, "deletions")?),
            "delete_relations" => Self::DeleteRelations(extract_batch(args, "relations")?),
            "search_nodes" => {
                let query = args.get("query").and_then(Value::as_str).ok_or_else(|| {
                    ToolCallError::InvalidArguments("missing or invalid query parameter".to_string())
                })?;
                Self::SearchNodes {
                    query: query.to_string(),
                }
            }
            "open_nodes" => Self::OpenNodes(extract_names(args, "names")?),
            "create_entity" => Self::CreateEntity(extract_args(args, "name, entity_type")?),
            "create_relation" => Self::CreateRelation(extract_args(
                args,
                "from_entity, to_entity, relation_type",
            )?),
            "create_observation" => {
                Self::CreateObservation(extract_args(args, "entity_name, content")?)
            }
            other => return Err(ToolCallError::UnknownTool(other.to_string())),
        };
        Ok(call)
    }

    /// Runs the call against the store and returns the text shown to the
    /// client.
    pub fn execute(self, db: &Database) -> Result<String> {
        match self {
            Self::ReadGraph => Ok(serde_json::to_string(&db.read_graph()?)?),
            Self::CreateEntities(batch) => create_entities(db, batch),
            Self::CreateRelations(batch) => create_relations(db, batch),
            Self::AddObservations(batch) => add_observations(db, batch),
            Self::DeleteEntities(names) => {
                let deleted = db.delete_entities(&names)?;
                Ok(format!(
                    "Successfully deleted {deleted} entities ({} requested)",
                    names.len()
                ))
            }
            Self::DeleteObservations(batch) => {
                let removed = db.delete_observations(&batch.items)?;
                Ok(format!(
                    "Successfully deleted {removed} observations across {} entities{}",
                    batch.items.len(),
                    batch_note(batch.skipped, 0)
                ))
            }
            Self::DeleteRelations(batch) => {
                let removed = db.delete_relations(&batch.items)?;
                Ok(format!(
                    "Successfully deleted {removed} relations ({} requested){}",
                    batch.items.len(),
                    batch_note(batch.skipped, 0)
                ))
            }
            Self::SearchNodes { query } => Ok(serde_json::to_string(&db.search_nodes(&query)?)?),
            Self::OpenNodes(names) => Ok(serde_json::to_string(&db.open_nodes(&names)?)?),
            Self::CreateEntity(args) => {
                db.create_entity(&args.name, &args.entity_type)?;
                Ok(format!(
                    "Successfully created entity '{}' of type '{}'",
                    args.name, args.entity_type
                ))
            }
            Self::CreateRelation(args) => {
                let id = db.create_relation(&args.from_entity, &args.to_entity, &args.relation_type)?;
                Ok(format!(
                    "Successfully created relation (ID: {id}) from '{}' to '{}' with type '{}'",
                    args.from_entity, args.to_entity, args.relation_type
                ))
            }
            Self::CreateObservation(args) => {
                let id = db.create_observation(&args.entity_name, &args.content)?;
                Ok(format!(
                    "Successfully created observation (ID: {id}) for entity '{}'",
                    args.entity_name
                ))
            }
        }
    }
}

/// Suffix reporting dropped items, empty when nothing was dropped.
fn batch_note(skipped: usize, failed: usize) -> String {
    match (skipped, failed) {
        (0, 0) => String::new(),
        (s, 0) => format!(" (skipped {s} malformed)"),
        (0, f) => format!(" ({f} failed)"),
        (s, f) => format!(" (skipped {s} malformed, {f} failed)"),
    }
}

fn create_entities(db: &Database, batch: Batch<EntitySpec>) -> Result<String> {
    let Batch { items, skipped } = batch;
    let mut created = Vec::with_capacity(items.len());
    let mut failures: Vec<KnowledgeGraphError> = Vec::new();

    for spec in items {
        if let Err(e) = db.create_entity(&spec.name, &spec.entity_type) {
            warn!(entity = %spec.name, error = %e, "failed to create entity");
            failures.push(e);
            continue;
        }

        for content in spec.observations.iter().filter_map(Value::as_str) {
            if let Err(e) = db.create_observation(&spec.name, content) {
                warn!(entity = %spec.name, error = %e, "failed to attach observation");
            }
        }
        created.push(spec.name);
    }

    if created.is_empty() && !failures.is_empty() {
        return Err(failures.remove(0));
    }

    Ok(format!(
        "Successfully created {} entities: [{}]{}",
        created.len(),
        created.join(", "),
        batch_note(skipped, failures.len())
    ))
}

fn create_relations(db: &Database, batch: Batch<RelationKey>) -> Result<String> {
    let Batch { items, skipped } = batch;
    let mut ids = Vec::with_capacity(items.len());
    let mut failures: Vec<KnowledgeGraphError> = Vec::new();

    for key in items {
        match db.create_relation(&key.from, &key.to, &key.relation_type) {
            Ok(id) => ids.push(id),
            Err(e) => {
                debug!(from = %key.from, to = %key.to, error = %e, "skipping relation");
                failures.push(e);
            }
        }
    }

    if ids.is_empty() && !failures.is_empty() {
        return Err(failures.remove(0));
    }

    let id_list: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    Ok(format!(
        "Successfully created {} relations with IDs: [{}]{}",
        ids.len(),
        id_list.join(", "),
        batch_note(skipped, failures.len())
    ))
}

fn add_observations(db: &Database, batch: Batch<ObservationSpec>) -> Result<String> {
    let pending: Vec<NewObservation> = batch
        .items
        .into_iter()
        .flat_map(ObservationSpec::into_new_observations)
        .collect();

    let added = db.add_observations(&pending)?;
    Ok(serde_json::to_string(&json!({
        "added": added,
        "skipped": batch.skipped,
    }))?)
}

/// The `result` payload of a `tools/call` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    /// Set when the tool ran but failed; the envelope itself is still a
    /// success.
    #[serde(rename = "isError", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

/// A single content block of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ToolCallResult {
    pub fn text(text: String) -> Self {
        Self {
            content: vec![ToolContent {
                kind: "text".to_string(),
                text,
            }],
            is_error: false,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            content: vec![ToolContent {
                kind: "text".to_string(),
                text: format!("Error: {message}"),
            }],
            is_error: true,
        }
    }
}

/// Dispatches a tool call to the store.
///
/// Unknown tools are returned as `Err` so the caller can emit a protocol
/// error; every other failure becomes an error [`ToolCallResult`].
pub fn handle_tool_call(
    db: &Database,
    tool_name: &str,
    args: &Map<String, Value>,
) -> std::result::Result<ToolCallResult, ToolCallError> {
    let call = match ToolCall::parse(tool_name, args) {
        Ok(call) => call,
        Err(ToolCallError::InvalidArguments(message)) => {
            return Ok(ToolCallResult::error(message));
        }
        Err(unknown) => return Err(unknown),
    };

    Ok(match call.execute(db) {
        Ok(text) => ToolCallResult::text(text),
        Err(e) => {
            debug!(tool = tool_name, error = %e, "tool call failed");
            ToolCallResult::error(e.to_string())
        }
    })
}
