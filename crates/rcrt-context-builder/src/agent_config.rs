/*!
 * Agent Configuration Loader
 * 
 * Loads agent definitions from database and parses context_sources
 */

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub agent_id: String,
    pub context_sources: Option<ContextSources>,
    pub context_trigger: Option<ContextTrigger>,
    pub llm_config_id: Option<String>,
}

/// What event makes this agent want assembled context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextTrigger {
    pub schema_name: String,
    pub all_tags: Option<Vec<String>>,
    pub any_tags: Option<Vec<String>>,
    /// Tags that veto the trigger -- used to stop an agent re-triggering
    /// off its own derived context record.
    pub none_tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSources {
    pub always: Option<Vec<ContextSource>>,
    pub semantic: Option<SemanticConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSource {
    #[serde(rename = "type")]
    pub source_type: String,  // "schema", "tag", "specific"
    pub schema_name: Option<String>,
    pub tag: Option<String>,
    pub method: Option<String>,  // "latest", "recent", "all"
    pub limit: Option<usize>,
    pub optional: Option<bool>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConfig {
    pub enabled: bool,
    pub schemas: Vec<String>,
    pub limit: Option<usize>,
    pub min_similarity: Option<f32>,
}

/// Load agent definition from database
pub async fn load_agent_definition(
    agent_id: &str,
    db_pool: &PgPool,
) -> Result<AgentDefinition> {
    let row = sqlx::query_as::<_, (serde_json::Value,)>(
        "SELECT context 
         FROM breadcrumbs 
         WHERE schema_name = 'agent.def.v1'
           AND context->>'agent_id' = $1
         LIMIT 1"
    )
    .bind(agent_id)
    .fetch_optional(db_pool)
    .await?;
    
    let Some((context,)) = row else {
        // No agent found - return empty definition
        tracing::warn!("Agent {} not found, using empty context_sources", agent_id);
        return Ok(AgentDefinition {
            agent_id: agent_id.to_string(),
            context_sources: None,
            context_trigger: None,
            llm_config_id: None,
        });
    };

    Ok(agent_definition_from_context(agent_id, &context))
}

fn agent_definition_from_context(agent_id: &str, context: &serde_json::Value) -> AgentDefinition {
    let context_sources = context
        .get("context_sources")
        .and_then(|v| serde_json::from_value(v.clone()).ok());

    let context_trigger = context
        .get("context_trigger")
        .and_then(|v| serde_json::from_value(v.clone()).ok());

    let llm_config_id = context
        .get("llm_config_id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    AgentDefinition {
        agent_id: agent_id.to_string(),
        context_sources,
        context_trigger,
        llm_config_id,
    }
}

/// Load every `agent.def.v1` record that declares a `context_trigger`.
///
/// Used by the event loop to find which agents want context assembled for
/// a given incoming record, without hardcoding agent identities anywhere.
pub async fn load_all_agent_definitions_with_triggers(
    db_pool: &PgPool,
) -> Result<Vec<AgentDefinition>> {
    let rows = sqlx::query_as::<_, (String, serde_json::Value)>(
        "SELECT context->>'agent_id' as agent_id, context
         FROM breadcrumbs
         WHERE schema_name = 'agent.def.v1'
           AND context ? 'context_trigger'"
    )
    .fetch_all(db_pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(agent_id, context)| agent_definition_from_context(&agent_id, &context))
        .collect())
}

