use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A uniquely named, typed node in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    /// Unique entity name.
    pub name: String,
    /// Free-text classification (e.g. "person", "organization").
    pub entity_type: String,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
        }
    }
}

/// A typed, directed edge between two existing entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    /// System-assigned, monotonically increasing identifier.
    pub id: i64,
    /// Name of the source entity.
    #[serde(rename = "from_entity")]
    pub from: String,
    /// Name of the target entity.
    #[serde(rename = "to_entity")]
    pub to: String,
    /// Free-text relation type (e.g. "works_at").
    pub relation_type: String,
}

/// A free-text fact attached to exactly one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Observation {
    /// System-assigned identifier.
    pub id: i64,
    /// Name of the owning entity.
    pub entity_name: String,
    /// Observation text.
    pub content: String,
}

/// Full snapshot of the store as returned by `read_graph`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub observations: Vec<Observation>,
}

/// A set of entities plus every relation touching one of them.
///
/// Returned by `search_nodes` and `open_nodes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSet {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl NodeSet {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// Row counts for each table in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub entity_count: u64,
    pub relation_count: u64,
    pub observation_count: u64,
}

/// An observation waiting to be inserted by `add_observations`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewObservation {
    pub entity_name: String,
    pub content: String,
}

impl NewObservation {
    pub fn new(entity_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            content: content.into(),
        }
    }
}

/// Exact-match key identifying the relations removed by `delete_relations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationKey {
    pub from: String,
    pub to: String,
    #[serde(rename = "relationType")]
    pub relation_type: String,
}

impl RelationKey {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relation_type: relation_type.into(),
        }
    }
}

/// Observation contents to remove from a single entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationDeletion {
    #[serde(rename = "entityName")]
    pub entity_name: String,
    /// Contents to remove. Non-string elements are skipped.
    #[serde(deserialize_with = "strings_only")]
    pub observations: Vec<String>,
}

fn strings_only<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<Value>::deserialize(deserializer)?;
    Ok(values
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}
