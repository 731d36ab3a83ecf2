//! Domain types shared between the substrate API and its consumers.
//!
//! The payload (`context`) is modeled as a generic `serde_json::Value`
//! throughout -- `schema_name` is a routing key only, validation lives
//! externally as `schema.def.v1` records. Do not add per-schema Rust types
//! here.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Team,
    Private,
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Private
    }
}

impl Visibility {
    pub fn as_db(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Team => "team",
            Visibility::Private => "private",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "public" => Visibility::Public,
            "team" => Visibility::Team,
            _ => Visibility::Private,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    Pii,
    Secret,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Sensitivity::Low
    }
}

impl Sensitivity {
    pub fn as_db(&self) -> &'static str {
        match self {
            Sensitivity::Low => "low",
            Sensitivity::Pii => "pii",
            Sensitivity::Secret => "secret",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "pii" => Sensitivity::Pii,
            "secret" => Sensitivity::Secret,
            _ => Sensitivity::Low,
        }
    }
}

/// Body of `POST /records`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreadcrumbCreate {
    pub title: String,
    pub description: Option<String>,
    pub semantic_version: Option<String>,
    pub context: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
    pub schema_name: Option<String>,
    pub llm_hints: Option<serde_json::Value>,
    pub visibility: Option<Visibility>,
    pub sensitivity: Option<Sensitivity>,
    pub ttl: Option<DateTime<Utc>>,
    /// "datetime" | "usage" | "hybrid"; None means no managed TTL policy.
    pub ttl_type: Option<String>,
    pub ttl_config: Option<serde_json::Value>,
    pub ttl_source: Option<String>,
}

/// Body of `PATCH /records/{id}`. Only present fields are applied.
/// `context` presence (not just non-null) is what triggers embedding/pointer
/// recomputation per §4.5.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreadcrumbUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub context: Option<serde_json::Value>,
    pub tags: Option<Vec<String>>,
    pub llm_hints: Option<serde_json::Value>,
    pub visibility: Option<Visibility>,
    pub sensitivity: Option<Sensitivity>,
    pub ttl: Option<DateTime<Utc>>,
}

/// The row as stored. `fetch-full` returns this shape (minus `embedding`
/// in the wire type below); fetch-min passes `context` through the
/// transform engine first (see `BreadcrumbContextView`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub schema_name: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub semantic_version: Option<String>,
    pub context: serde_json::Value,
    pub tags: Vec<String>,
    pub llm_hints: Option<serde_json::Value>,
    pub visibility: Visibility,
    pub sensitivity: Sensitivity,
    pub embedding: Option<Vector>,
    pub entity_keywords: Option<Vec<String>>,
    pub entities: Option<serde_json::Value>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub checksum: String,
    pub size_bytes: i32,
    pub ttl: Option<DateTime<Utc>>,
    pub ttl_type: Option<String>,
    pub ttl_config: Option<serde_json::Value>,
    pub ttl_source: Option<String>,
    pub read_count: i64,
}

/// Returned by `GET /records/{id}` -- `context` already transformed by C4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreadcrumbContextView {
    pub id: Uuid,
    pub title: String,
    pub context: serde_json::Value,
    pub tags: Vec<String>,
    pub schema_name: Option<String>,
    pub version: i32,
    pub updated_at: DateTime<Utc>,
    /// Set when a transform rule failed and was best-effort omitted (§7).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Returned by `GET /records/{id}/full` -- curator only, raw context always.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreadcrumbFull {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub context: serde_json::Value,
    pub tags: Vec<String>,
    pub schema_name: Option<String>,
    pub visibility: Visibility,
    pub sensitivity: Sensitivity,
    pub entity_keywords: Option<Vec<String>>,
    pub version: i32,
    pub checksum: String,
    pub ttl: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub size_bytes: i32,
    pub embedding: Option<Vector>,
}

/// One immutable snapshot in a record's history, keyed by (record id, version).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BreadcrumbHistoryRow {
    pub record_id: Uuid,
    pub version: i32,
    pub context: serde_json::Value,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<Uuid>,
    pub checksum: String,
}

/// A typed, weighted, directed edge between two records (§3 Edge).
/// Ephemeral derived data -- rebuildable from records, never itself
/// a source of truth. No self-edges; multi-edges across types allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Causal,
    Tag,
    Temporal,
    Semantic,
}

impl EdgeType {
    pub fn as_db(&self) -> i16 {
        match self {
            EdgeType::Causal => 0,
            EdgeType::Tag => 1,
            EdgeType::Temporal => 2,
            EdgeType::Semantic => 3,
        }
    }

    pub fn from_db(v: i16) -> Option<Self> {
        match v {
            0 => Some(EdgeType::Causal),
            1 => Some(EdgeType::Tag),
            2 => Some(EdgeType::Temporal),
            3 => Some(EdgeType::Semantic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from_id: Uuid,
    pub to_id: Uuid,
    pub edge_type: EdgeType,
    pub weight: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMatchOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    ContainsAny,
}

/// `context_match` comparison inside a `Selector` (§3). Only ever evaluated
/// against a fully fetched record's context, never an event envelope --
/// envelopes omit `context` entirely (§4.6, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMatch {
    pub path: String,
    pub op: ContextMatchOp,
    pub value: serde_json::Value,
}

/// A stored predicate over records, owned by an agent (§3 Selector).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selector {
    pub schema_name: Option<String>,
    pub any_tags: Option<Vec<String>>,
    pub all_tags: Option<Vec<String>>,
    pub none_tags: Option<Vec<String>>,
    pub sensitivity_in: Option<Vec<Sensitivity>>,
    pub visibility_in: Option<Vec<Visibility>>,
    pub context_match: Option<Vec<ContextMatch>>,
}

impl Selector {
    /// Does this selector match the event envelope alone? Context
    /// predicates never participate here.
    pub fn matches_envelope(&self, schema_name: Option<&str>, tags: &[String]) -> bool {
        if let Some(want) = &self.schema_name {
            if Some(want.as_str()) != schema_name {
                return false;
            }
        }
        if let Some(any) = &self.any_tags {
            if !any.iter().any(|t| tags.contains(t)) {
                return false;
            }
        }
        if let Some(all) = &self.all_tags {
            if !all.iter().all(|t| tags.contains(t)) {
                return false;
            }
        }
        if let Some(none) = &self.none_tags {
            if none.iter().any(|t| tags.contains(t)) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorSubscription {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub agent_id: Uuid,
    pub selector: Selector,
    pub bus: bool,
    pub sse: bool,
    pub webhook: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclGrantAgent {
    pub breadcrumb_id: Uuid,
    pub grantee_agent_id: Option<Uuid>,
    pub grantee_owner_id: Option<Uuid>,
    pub action: String,
}

/// `schema_name=agent.def.v1` meta-record body (§3 Agent definition).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinitionContext {
    pub agent_id: String,
    pub context_trigger: Option<Selector>,
    pub context_sources: Option<ContextSources>,
    #[serde(default)]
    pub subscriptions: Vec<serde_json::Value>,
    pub llm_config_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSources {
    #[serde(default)]
    pub always: Vec<ContextSource>,
    pub semantic: Option<SemanticConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSource {
    #[serde(rename = "type")]
    pub source_type: String, // "schema" | "tag"
    pub schema_name: Option<String>,
    pub tag: Option<String>,
    pub method: String, // "latest" | "recent" | "all"
    pub limit: Option<usize>,
    #[serde(default)]
    pub optional: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConfig {
    pub enabled: bool,
    #[serde(default)]
    pub schemas: Vec<String>,
    pub limit: Option<usize>,
    pub min_similarity: Option<f32>,
}

/// `schema_name=agent.context.v1` body, the assembler's sole output (§3,§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContextPayload {
    pub consumer_id: String,
    pub trigger_event_id: Option<Uuid>,
    pub formatted_context: String,
    pub token_estimate: usize,
    pub record_count: usize,
}

/// The change-fabric event envelope (§4.6). `context` is deliberately
/// omitted so context-match selectors cannot be evaluated on envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreadcrumbEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub record_id: Uuid,
    pub owner: Uuid,
    pub schema_name: Option<String>,
    pub tags: Vec<String>,
    pub version: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
    Ping,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::Created => "created",
            EventType::Updated => "updated",
            EventType::Deleted => "deleted",
            EventType::Ping => "ping",
        };
        write!(f, "{}", s)
    }
}

/// Metadata for a stored secret (§3 Secret). Plaintext never appears here;
/// it is only ever returned from an explicit, audited decrypt call.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SecretMeta {
    pub id: Uuid,
    pub name: String,
    pub scope_type: String,
    pub scope_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Row written to the webhook DLQ on final delivery exhaustion (§4.6, §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub agent_id: Uuid,
    pub webhook_url: String,
    pub envelope: serde_json::Value,
    pub last_status: Option<i32>,
    pub last_error: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}
