/*!
 * Event Handler
 * 
 * Main event loop that processes SSE events and triggers context assembly
 * UNIVERSAL: Uses pointer-based context assembly for ALL agents
 */

use crate::{
    config::Config,
    rcrt_client::{RcrtClient, BreadcrumbEvent},
    vector_store::VectorStore,
    graph::SessionGraphCache,
    retrieval::ContextAssembler,
    output::ContextPublisher,
    entity_extractor::EntityExtractor,
};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn, error};

pub struct EventHandler {
    rcrt_client: Arc<RcrtClient>,
    vector_store: Arc<VectorStore>,
    graph_cache: Arc<SessionGraphCache>,
    assembler: ContextAssembler,
    publisher: ContextPublisher,
    entity_extractor: Arc<EntityExtractor>,
    config: Config,
}

impl EventHandler {
    pub fn new(
        rcrt_client: Arc<RcrtClient>,
        vector_store: Arc<VectorStore>,
        graph_cache: Arc<SessionGraphCache>,
        entity_extractor: Arc<EntityExtractor>,
        config: Config,
    ) -> Self {
        let assembler = ContextAssembler::new(vector_store.clone());
        let publisher = ContextPublisher::new(rcrt_client.clone());
        
        EventHandler {
            rcrt_client,
            vector_store,
            graph_cache,
            assembler,
            publisher,
            entity_extractor,
            config,
        }
    }
    
    pub async fn start(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        
        // Start SSE stream
        self.rcrt_client.start_sse_stream(tx).await?;
        
        info!("✅ Event handler started, listening for events...");
        
        // Process events
        while let Some(event) = rx.recv().await {
            if let Err(e) = self.handle_event(event).await {
                error!("Error handling event: {}", e);
            }
        }
        
        Ok(())
    }
    
    async fn handle_event(&self, event: BreadcrumbEvent) -> Result<()> {
        // UNIVERSAL: Process ANY schema using pointer-based context assembly
        // Zero hardcoding - fully data-driven
        
        let Some(schema) = &event.schema_name else { return Ok(()); };

        info!("📨 Event received: {} (id: {})", schema, event.record_id);
        
        // Find ALL agents that want context for this trigger
        let interested_agents = self.find_agents_for_trigger(schema, Some(&event.tags)).await?;

        if interested_agents.is_empty() {
            // No agents need context assembly for this schema
            // Normal - tools handle requests directly without context-builder
            return Ok(());
        }

        info!("🎯 {} agent(s) want context for {}", interested_agents.len(), schema);

        // Extract session tag (universal across all schemas)
        let session_tag = event.tags.iter().find(|t| t.starts_with("session:")).cloned();

        // Assemble context for EACH interested agent. Agents whose
        // none_tags overlaps the event's tags are the loop-preventer: a
        // derived agent.context.v1 carries `agent:context`, so an agent def
        // listing that in none_tags never re-triggers on its own output.
        for agent_def in interested_agents {
            if let Some(trigger_config) = &agent_def.context_trigger {
                if let Some(none_tags) = &trigger_config.none_tags {
                    if none_tags.iter().any(|t| event.tags.contains(t)) {
                        continue;
                    }
                }
            }

            info!("🔄 Assembling context for {}", agent_def.agent_id);

            if let Err(e) = self.assemble_with_pointers(
                &agent_def.agent_id,
                Some(event.record_id),
                &agent_def,
                session_tag.as_deref()
            ).await {
                error!("Context assembly failed for {}: {}", agent_def.agent_id, e);
            }
        }
        
        Ok(())
    }
    
    // ============ UNIVERSAL POINTER-BASED CONTEXT ASSEMBLY ============
    
    /// Find ALL agents that want context assembled for this trigger
    /// Pure data-driven - queries agent.def.v1 for matching context_trigger
    async fn find_agents_for_trigger(
        &self,
        trigger_schema: &str,
        trigger_tags: Option<&Vec<String>>,
    ) -> Result<Vec<crate::agent_config::AgentDefinition>> {
        use crate::agent_config::load_all_agent_definitions_with_triggers;
        
        // Load ALL agent definitions that declare context_trigger
        let all_agents = load_all_agent_definitions_with_triggers(self.vector_store.pool()).await?;
        
        // Filter to agents whose context_trigger matches this event
        let matching: Vec<_> = all_agents.into_iter()
            .filter(|agent| {
                if let Some(trigger_config) = &agent.context_trigger {
                    // Schema must match
                    if trigger_config.schema_name != trigger_schema {
                        return false;
                    }
                    
                    // all_tags must ALL be present
                    if let Some(required_tags) = &trigger_config.all_tags {
                        if let Some(event_tags) = trigger_tags {
                            return required_tags.iter().all(|t| event_tags.contains(t));
                        }
                        return false;
                    }
                    
                    // any_tags at least ONE must be present
                    if let Some(any_of_tags) = &trigger_config.any_tags {
                        if let Some(event_tags) = trigger_tags {
                            return any_of_tags.iter().any(|t| event_tags.contains(t));
                        }
                        return false;
                    }
                    
                    // No tag requirements - schema match is enough
                    true
                } else {
                    false
                }
            })
            .collect();
        
        Ok(matching)
    }
    
    /// Universal context assembly using hybrid pointers
    /// Works for ALL agents - zero hardcoding
    ///
    /// Bounded by `config.assembly_timeout_ms`: if seed collection, the graph
    /// walk, or the token-budgeted path finder runs past the ceiling, this
    /// falls back to publishing a context consisting of the trigger alone
    /// rather than dropping the attempt.
    async fn assemble_with_pointers(
        &self,
        consumer_id: &str,
        trigger_id: Option<uuid::Uuid>,
        agent_def: &crate::agent_config::AgentDefinition,
        session_tag: Option<&str>,
    ) -> Result<()> {
        use crate::retrieval::AssembledContext;

        let Some(trigger) = trigger_id else {
            warn!("No trigger ID for {}, skipping", consumer_id);
            return Ok(());
        };

        // STEP 1: GET TRIGGER BREADCRUMB
        let trigger_bc = self.vector_store.get_by_id(trigger).await?
            .ok_or_else(|| anyhow::anyhow!("Trigger breadcrumb not found"))?;

        let timeout = std::time::Duration::from_millis(self.config.assembly_timeout_ms);
        let context = match tokio::time::timeout(
            timeout,
            self.assemble_context(trigger, &trigger_bc, agent_def, session_tag),
        ).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Assembly ceiling ({} ms) hit for {}, publishing trigger-only context",
                    self.config.assembly_timeout_ms, consumer_id
                );
                let token_estimate = trigger_bc.context.to_string().len().div_ceil(3);
                AssembledContext {
                    breadcrumbs: vec![breadcrumb_row_to_node(trigger_bc)],
                    token_estimate,
                    sources_count: 1,
                }
            }
        };

        // STEP 7: PUBLISH
        self.publisher.publish_context(
            consumer_id,
            session_tag.unwrap_or(""),
            Some(trigger),
            &context
        ).await?;

        info!("✅ Context published for {}", consumer_id);

        Ok(())
    }

    /// Runs steps 2-6 of context assembly (pointer extraction through
    /// priority sort) and returns the assembled, token-budgeted context.
    async fn assemble_context(
        &self,
        trigger: uuid::Uuid,
        trigger_bc: &crate::vector_store::BreadcrumbRow,
        agent_def: &crate::agent_config::AgentDefinition,
        session_tag: Option<&str>,
    ) -> Result<crate::retrieval::AssembledContext> {
        use crate::retrieval::AssembledContext;

        info!("🌱 Extracting hybrid pointers from trigger...");

        // STEP 2: EXTRACT HYBRID POINTERS (tags + cached keywords)
        let mut pointers = Vec::new();
        
        // From tags (explicit pointer tags)
        for tag in &trigger_bc.tags {
            if !tag.contains(':') && !rcrt_core::db::is_state_tag(tag) {
                pointers.push(tag.to_lowercase());
            }
        }
        
        // From cached entity_keywords (pre-extracted at creation)
        if let Some(keywords) = &trigger_bc.entity_keywords {
            pointers.extend(keywords.iter().cloned());
        }
        
        // Deduplicate
        pointers.sort();
        pointers.dedup();
        
        info!("📍 Extracted {} pointers: {:?}", 
            pointers.len(), 
            &pointers[..pointers.len().min(10)]
        );
        
        // STEP 3: COLLECT SEEDS (multi-source)
        let mut seed_ids = vec![trigger];
        info!("🌱 Collecting seed nodes...");
        info!("  + Seed: trigger");
        
        // Always sources (from agent.def.v1.context_sources.always)
        if let Some(context_sources) = &agent_def.context_sources {
            if let Some(always) = &context_sources.always {
                for source in always {
                    let nodes_result = match source.source_type.as_str() {
                        "schema" => {
                            if let Some(schema_name) = &source.schema_name {
                                self.fetch_by_schema(schema_name, source.method.as_deref(), source.limit.unwrap_or(1)).await
                            } else {
                                continue;
                            }
                        },
                        "tag" => {
                            if let Some(tag) = &source.tag {
                                self.fetch_by_tag(tag, source.limit.unwrap_or(1)).await
                            } else {
                                continue;
                            }
                        },
                        _ => continue,
                    };
                    
                    if let Ok(nodes) = nodes_result {
                        for node in nodes {
                            if !seed_ids.contains(&node.id) {
                                seed_ids.push(node.id);
                                info!("  + Seed: {} (always source)", 
                                    source.schema_name.as_deref().or(source.tag.as_deref()).unwrap_or("unknown"));
                            }
                        }
                    }
                }
            }
            
            // Semantic sources (using hybrid pointers!)
            if let Some(semantic) = &context_sources.semantic {
                if semantic.enabled && !pointers.is_empty() {
                    info!("🔍 Semantic search with {} pointers", pointers.len());
                    
                    for schema in &semantic.schemas {
                        if let Some(embedding) = &trigger_bc.embedding {
                            let semantic_seeds = self.vector_store.find_similar_hybrid(
                                embedding,
                                &pointers,  // Hybrid pointers!
                                semantic.limit.unwrap_or(3),
                                None  // Global search for knowledge
                            ).await?;
                            
                            for seed in semantic_seeds {
                                if !seed_ids.contains(&seed.id) {
                                    seed_ids.push(seed.id);
                                }
                            }
                            info!("  + Seeds: semantic+pointers ({})", schema);
                        }
                    }
                }
            }
        }
        
        // Session messages (temporal context)
        if let Some(session) = session_tag {
            let recent = self.vector_store.get_recent(
                None,  // All schemas
                Some(session),
                20  // Last 20 in session
            ).await?;
            
            for row in recent {
                if !seed_ids.contains(&row.id) {
                    seed_ids.push(row.id);
                }
            }
            info!("  + Seeds: session messages");
        }
        
        info!("✅ Collected {} total seeds", seed_ids.len());

        // STEP 4: LOAD GRAPH around seeds, reusing the session-local cache
        // keyed by the active session tag; GraphCacheUpdater invalidates
        // that entry whenever a breadcrumb carrying the tag is updated.
        let graph = match session_tag.and_then(|tag| self.graph_cache.get(tag)) {
            Some(cached) => cached,
            None => {
                let loaded = self.load_graph_for_seeds(&seed_ids).await?;
                if let Some(tag) = session_tag {
                    self.graph_cache.put(tag.to_string(), loaded.clone());
                }
                loaded
            }
        };

        
        // STEP 5: PATHFINDER with token budget
        let llm_config = crate::llm_config::load_llm_config(
            agent_def.llm_config_id.clone(),
            self.vector_store.pool()
        ).await?;
        
        let token_budget_info = crate::llm_config::calculate_context_budget(
            agent_def.llm_config_id.as_deref(),
            &llm_config,
            self.vector_store.pool()
        ).await?;
        
        info!("💰 Context budget: {} tokens", token_budget_info.tokens);
        
        let path_finder = crate::retrieval::PathFinder::new(5, 50);
        let relevant_ids = path_finder.find_paths_token_aware(
            &graph,
            seed_ids.clone(),
            token_budget_info.tokens
        );
        
        info!("✅ PathFinder selected {} nodes", relevant_ids.len());
        
        // STEP 6: Fetch breadcrumbs and format
        let mut breadcrumbs = Vec::new();
        for node_id in relevant_ids {
            if let Some(node) = graph.nodes.get(&node_id) {
                breadcrumbs.push(node.clone());
            }
        }
        
        // Partition into priority bands, sort each by updated_at desc, then
        // pin the trigger record first regardless of its own band.
        breadcrumbs.sort_by(|a, b| {
            let a_priority = schema_priority(&a.schema_name);
            let b_priority = schema_priority(&b.schema_name);

            if a_priority != b_priority {
                a_priority.cmp(&b_priority)
            } else {
                b.updated_at.cmp(&a.updated_at)
            }
        });

        if let Some(pos) = breadcrumbs.iter().position(|bc| bc.id == trigger) {
            let trigger_node = breadcrumbs.remove(pos);
            breadcrumbs.insert(0, trigger_node);
        }
        
        let token_estimate: usize = breadcrumbs.iter()
            .map(|bc| bc.context.to_string().len().div_ceil(3))
            .sum();
        
        Ok(AssembledContext {
            breadcrumbs,
            token_estimate,
            sources_count: seed_ids.len(),
        })
    }

    // ============ HELPER FUNCTIONS ============
    
    /// Load the graph around seed breadcrumbs via the recursive hop-radius
    /// walk, converting the resulting petgraph into the adjacency-list
    /// `SessionGraph` the path finder walks.
    async fn load_graph_for_seeds(&self, seed_ids: &[uuid::Uuid]) -> Result<crate::graph::SessionGraph> {
        use crate::graph::{load_graph_around_seeds, SessionGraph, Edge, EdgeType};

        let loaded = load_graph_around_seeds(seed_ids.to_vec(), 2, self.vector_store.pool()).await?;

        let mut graph = SessionGraph::new(String::new());

        for node in loaded.graph.node_weights() {
            graph.add_node(node.clone());
        }

        for edge_ref in loaded.graph.raw_edges() {
            let features = &edge_ref.weight;
            let from_id = loaded.graph[edge_ref.source()].id;
            let to_id = loaded.graph[edge_ref.target()].id;
            let edge_type = match features.edge_type {
                0 => EdgeType::Causal,
                1 => EdgeType::Temporal,
                2 => EdgeType::TagRelated,
                3 => EdgeType::Semantic,
                _ => EdgeType::Semantic,
            };

            graph.add_edge(Edge {
                from: from_id,
                to: to_id,
                edge_type,
                weight: features.weight,
            });
        }

        Ok(graph)
    }
    
    /// Fetch breadcrumbs by schema
    async fn fetch_by_schema(
        &self,
        schema_name: &str,
        method: Option<&str>,
        limit: usize,
    ) -> Result<Vec<crate::vector_store::BreadcrumbRow>> {
        match method.unwrap_or("latest") {
            "latest" => {
                if let Some(row) = self.vector_store.get_latest(schema_name, None).await? {
                    Ok(vec![row])
                } else {
                    Ok(vec![])
                }
            },
            "recent" | "all" => {
                self.vector_store.get_recent(Some(schema_name), None, limit).await
            },
            _ => Ok(vec![])
        }
    }
    
    /// Fetch breadcrumbs by tag
    async fn fetch_by_tag(
        &self,
        tag: &str,
        limit: usize,
    ) -> Result<Vec<crate::vector_store::BreadcrumbRow>> {
        self.vector_store.get_by_tag(tag, limit).await
    }
}

// ============ FREE HELPER FUNCTIONS ============

/// Three priority bands for context ordering: high (catalogs), medium
/// (knowledge/notes), low (everything else).
fn schema_priority(schema: &str) -> u8 {
    match schema {
        "tool.catalog.v1" | "agent.catalog.v1" => 0,
        "knowledge.v1" | "note.v1" => 1,
        _ => 2,
    }
}

/// Convert BreadcrumbRow to BreadcrumbNode
fn breadcrumb_row_to_node(row: crate::vector_store::BreadcrumbRow) -> crate::graph::BreadcrumbNode {
    let trigger_event_id = row.context
        .get("trigger_event_id")
        .and_then(|v| v.as_str())
        .and_then(|s| uuid::Uuid::parse_str(s).ok());
    
    crate::graph::BreadcrumbNode {
        id: row.id,
        schema_name: row.schema_name,
        tags: row.tags,
        context: row.context,
        embedding: row.embedding,
        created_at: row.created_at,
        updated_at: row.updated_at,
        trigger_event_id,
    }
}

