//! Postgres/pgvector storage layer (C1).
//!
//! Every tenant-scoped statement runs after `set_rls()` has pinned
//! `app.current_owner_id` / `app.current_agent_id` as Postgres session GUCs
//! on the checked-out connection; row-level-security policies on
//! `breadcrumbs` enforce tenancy and the private-visibility ACL check on
//! every read. A pooled connection is re-scoped on each checkout, never
//! assumed clean from a prior request -- `false` (session-local, not
//! transaction-local) on `set_config` so the scoping survives across the
//! statements of a single request even when they span more than one
//! implicit transaction.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use sha2::{Digest, Sha256};
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::{RcrtError, Result};
use crate::models::*;

/// Reserved state tags excluded from the hybrid pointer vocabulary.
/// Shared by write-side extraction (`Db::tag_pointers`) and read-side
/// extraction (the assembler's trigger pointer extraction) so a record's
/// `entity_keywords` and its own query-side pointer set never diverge over
/// which tags count as pointers (§4.5, §3).
pub const STATE_TAG_VOCAB: &[&str] = &[
    "active", "pending", "done", "archived", "draft",
    "approved", "validated", "bootstrap", "deprecated",
    "ephemeral", "error", "warning", "info",
];

pub fn is_state_tag(tag: &str) -> bool {
    STATE_TAG_VOCAB.contains(&tag)
}

#[derive(Clone)]
pub struct Db {
    pub pool: Pool<Postgres>,
}

/// Raw row shape -- `visibility`/`sensitivity` come back as text (the
/// Postgres enum types are cast with `::text` in every query below) and are
/// converted with `Visibility::from_db`/`Sensitivity::from_db` on the way
/// into a `Breadcrumb`.
#[derive(sqlx::FromRow)]
struct BreadcrumbRow {
    id: Uuid,
    owner_id: Uuid,
    schema_name: Option<String>,
    title: String,
    description: Option<String>,
    semantic_version: Option<String>,
    context: serde_json::Value,
    tags: Vec<String>,
    llm_hints: Option<serde_json::Value>,
    visibility: String,
    sensitivity: String,
    embedding: Option<Vector>,
    entity_keywords: Option<Vec<String>>,
    entities: Option<serde_json::Value>,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    created_by: Option<Uuid>,
    updated_by: Option<Uuid>,
    checksum: String,
    size_bytes: i32,
    ttl: Option<DateTime<Utc>>,
    ttl_type: Option<String>,
    ttl_config: Option<serde_json::Value>,
    ttl_source: Option<String>,
    read_count: i64,
}

const BREADCRUMB_COLUMNS: &str = r#"
    id, owner_id, schema_name, title, description, semantic_version, context, tags,
    llm_hints, visibility::text as visibility, sensitivity::text as sensitivity,
    embedding, entity_keywords, entities, version, created_at, updated_at,
    created_by, updated_by, checksum, size_bytes, ttl, ttl_type, ttl_config,
    ttl_source, read_count
"#;

impl From<BreadcrumbRow> for Breadcrumb {
    fn from(r: BreadcrumbRow) -> Self {
        Breadcrumb {
            id: r.id,
            owner_id: r.owner_id,
            schema_name: r.schema_name,
            title: r.title,
            description: r.description,
            semantic_version: r.semantic_version,
            context: r.context,
            tags: r.tags,
            llm_hints: r.llm_hints,
            visibility: Visibility::from_db(&r.visibility),
            sensitivity: Sensitivity::from_db(&r.sensitivity),
            embedding: r.embedding,
            entity_keywords: r.entity_keywords,
            entities: r.entities,
            version: r.version,
            created_at: r.created_at,
            updated_at: r.updated_at,
            created_by: r.created_by,
            updated_by: r.updated_by,
            checksum: r.checksum,
            size_bytes: r.size_bytes,
            ttl: r.ttl,
            ttl_type: r.ttl_type,
            ttl_config: r.ttl_config,
            ttl_source: r.ttl_source,
            read_count: r.read_count,
        }
    }
}

impl Db {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    async fn set_rls(conn: &mut PgConnection, owner_id: Uuid, agent_id: Uuid) -> Result<()> {
        sqlx::query("select set_config('app.current_owner_id', $1, false)")
            .bind(owner_id.to_string())
            .execute(&mut *conn)
            .await?;
        sqlx::query("select set_config('app.current_agent_id', $1, false)")
            .bind(agent_id.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub fn checksum_json(v: &serde_json::Value) -> String {
        let bytes = serde_json::to_vec(v).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }

    /// Write-side pointer extraction (§4.5, §3): tags with no `:` that are
    /// not in the reserved state vocabulary. Symmetric with the read side's
    /// tag-pointer union in the entity worker.
    pub fn tag_pointers(tags: &[String]) -> Vec<String> {
        tags.iter()
            .filter(|t| !t.contains(':') && !is_state_tag(t))
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------

    pub async fn create_breadcrumb(
        &self,
        owner_id: Uuid,
        agent_id: Uuid,
        req: BreadcrumbCreate,
        embedding: Option<Vec<f32>>,
        entity_keywords: Vec<String>,
    ) -> Result<Breadcrumb> {
        let mut conn = self.pool.acquire().await?;
        Self::set_rls(&mut conn, owner_id, agent_id).await?;

        let checksum = Self::checksum_json(&req.context);
        let size_bytes = serde_json::to_vec(&req.context).map(|v| v.len() as i32).unwrap_or(0);
        let visibility = req.visibility.unwrap_or_default();
        let sensitivity = req.sensitivity.unwrap_or_default();

        let row = sqlx::query_as::<_, BreadcrumbRow>(&format!(
            r#"
            insert into breadcrumbs (
                owner_id, schema_name, title, description, semantic_version, context,
                tags, llm_hints, visibility, sensitivity, embedding, entity_keywords,
                version, created_by, updated_by, checksum, size_bytes, ttl, ttl_type,
                ttl_config, ttl_source, created_at, updated_at
            ) values (
                $1, $2, $3, $4, $5, $6, $7, $8, $9::visibility, $10::sensitivity, $11,
                $12, 1, $13, $13, $14, $15, $16, $17, $18, $19, now(), now()
            )
            returning {BREADCRUMB_COLUMNS}
            "#
        ))
        .bind(owner_id)
        .bind(&req.schema_name)
        .bind(&req.title)
        .bind(&req.description)
        .bind(&req.semantic_version)
        .bind(&req.context)
        .bind(&req.tags)
        .bind(&req.llm_hints)
        .bind(visibility.as_db())
        .bind(sensitivity.as_db())
        .bind(embedding.map(Vector::from))
        .bind(&entity_keywords)
        .bind(agent_id)
        .bind(&checksum)
        .bind(size_bytes)
        .bind(req.ttl)
        .bind(&req.ttl_type)
        .bind(&req.ttl_config)
        .bind(&req.ttl_source)
        .fetch_one(&mut *conn)
        .await?;

        let rec: Breadcrumb = row.into();
        self.append_history(&mut conn, rec.id, rec.version, &rec.context, rec.updated_by, &rec.checksum)
            .await?;

        Ok(rec)
    }

    async fn append_history(
        &self,
        conn: &mut PgConnection,
        breadcrumb_id: Uuid,
        version: i32,
        context: &serde_json::Value,
        updated_by: Option<Uuid>,
        checksum: &str,
    ) -> Result<()> {
        sqlx::query(
            "insert into breadcrumb_history (breadcrumb_id, version, context, updated_at, updated_by, checksum)
             values ($1, $2, $3, now(), $4, $5)
             on conflict do nothing",
        )
        .bind(breadcrumb_id)
        .bind(version)
        .bind(context)
        .bind(updated_by)
        .bind(checksum)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Full row fetch, RLS + visibility enforced in SQL. `owner_id`/`agent_id`
    /// gate tenancy and private-ACL; callers decide whether to run the
    /// result through the transform engine (fetch-min) or return it raw
    /// (fetch-full, curator only).
    pub async fn get_breadcrumb(&self, owner_id: Uuid, agent_id: Uuid, id: Uuid) -> Result<Option<Breadcrumb>> {
        let mut conn = self.pool.acquire().await?;
        Self::set_rls(&mut conn, owner_id, agent_id).await?;

        let row = sqlx::query_as::<_, BreadcrumbRow>(&format!(
            r#"
            select {BREADCRUMB_COLUMNS} from breadcrumbs
            where id = $1
              and owner_id = current_setting('app.current_owner_id')::uuid
              and (
                    visibility != 'private'
                    or created_by = current_setting('app.current_agent_id')::uuid
                    or exists (
                        select 1 from acl_entries a
                        where a.breadcrumb_id = breadcrumbs.id
                          and (a.grantee_agent_id = current_setting('app.current_agent_id')::uuid
                               or a.grantee_owner_id = current_setting('app.current_owner_id')::uuid)
                    )
              )
            "#
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        if row.is_some() {
            sqlx::query("update breadcrumbs set read_count = read_count + 1 where id = $1")
                .bind(id)
                .execute(&mut *conn)
                .await
                .ok();
        }

        Ok(row.map(Into::into))
    }

    pub async fn update_breadcrumb(
        &self,
        owner_id: Uuid,
        agent_id: Uuid,
        id: Uuid,
        expected_version: i32,
        u: BreadcrumbUpdate,
        new_embedding: Option<Vec<f32>>,
        new_entity_keywords: Option<Vec<String>>,
    ) -> Result<Breadcrumb> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("select set_config('app.current_owner_id', $1, true)")
            .bind(owner_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("select set_config('app.current_agent_id', $1, true)")
            .bind(agent_id.to_string())
            .execute(&mut *tx)
            .await?;

        let cur_row = sqlx::query_as::<_, BreadcrumbRow>(&format!(
            "select {BREADCRUMB_COLUMNS} from breadcrumbs where id = $1 for update"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RcrtError::NotFound)?;
        let cur: Breadcrumb = cur_row.into();

        if cur.version != expected_version {
            return Err(RcrtError::VersionConflict);
        }

        let context_changed = u.context.is_some();
        let new_title = u.title.unwrap_or(cur.title);
        let new_description = u.description.or(cur.description);
        let new_context = u.context.unwrap_or(cur.context);
        let new_tags = u.tags.unwrap_or(cur.tags);
        let new_llm_hints = u.llm_hints.or(cur.llm_hints);
        let new_visibility = u.visibility.unwrap_or(cur.visibility);
        let new_sensitivity = u.sensitivity.unwrap_or(cur.sensitivity);
        let new_ttl = u.ttl.or(cur.ttl);
        let new_checksum = Self::checksum_json(&new_context);
        let new_size = serde_json::to_vec(&new_context).map(|v| v.len() as i32).unwrap_or(0);
        let new_version = cur.version + 1;

        let embedding = if context_changed { new_embedding.map(Vector::from) } else { cur.embedding };
        let entity_keywords = if context_changed { new_entity_keywords.or(cur.entity_keywords) } else { cur.entity_keywords };

        let row = sqlx::query_as::<_, BreadcrumbRow>(&format!(
            r#"
            update breadcrumbs set
                title = $2, description = $3, context = $4, tags = $5, llm_hints = $6,
                visibility = $7::visibility, sensitivity = $8::sensitivity, embedding = $9,
                entity_keywords = $10, version = $11, updated_at = now(), updated_by = $12,
                checksum = $13, size_bytes = $14, ttl = $15
            where id = $1
            returning {BREADCRUMB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&new_title)
        .bind(&new_description)
        .bind(&new_context)
        .bind(&new_tags)
        .bind(&new_llm_hints)
        .bind(new_visibility.as_db())
        .bind(new_sensitivity.as_db())
        .bind(embedding)
        .bind(&entity_keywords)
        .bind(new_version)
        .bind(agent_id)
        .bind(&new_checksum)
        .bind(new_size)
        .bind(new_ttl)
        .fetch_one(&mut *tx)
        .await?;

        let rec: Breadcrumb = row.into();

        sqlx::query(
            "insert into breadcrumb_history (breadcrumb_id, version, context, updated_at, updated_by, checksum)
             values ($1, $2, $3, now(), $4, $5)",
        )
        .bind(rec.id)
        .bind(rec.version)
        .bind(&rec.context)
        .bind(rec.updated_by)
        .bind(&rec.checksum)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(rec)
    }

    pub async fn delete_breadcrumb(&self, owner_id: Uuid, agent_id: Uuid, id: Uuid) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        Self::set_rls(&mut conn, owner_id, agent_id).await?;
        let res = sqlx::query(
            "delete from breadcrumbs where id = $1 and owner_id = current_setting('app.current_owner_id')::uuid",
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn list_breadcrumb_history(
        &self,
        owner_id: Uuid,
        agent_id: Uuid,
        id: Uuid,
    ) -> Result<Vec<BreadcrumbHistoryRow>> {
        let mut conn = self.pool.acquire().await?;
        Self::set_rls(&mut conn, owner_id, agent_id).await?;
        let rows = sqlx::query_as::<_, BreadcrumbHistoryRow>(
            "select breadcrumb_id as record_id, version, context, updated_at, updated_by, checksum
             from breadcrumb_history where breadcrumb_id = $1 order by version asc",
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    /// The RLS predicate here mirrors `get_breadcrumb` exactly -- this is the
    /// query the teacher's retrieved `list_breadcrumbs` omitted the
    /// visibility/ACL clause from, letting a tenant see every other agent's
    /// private records. Fixed here.
    pub async fn list_breadcrumbs(
        &self,
        owner_id: Uuid,
        agent_id: Uuid,
        tag: Option<&str>,
        schema_name: Option<&str>,
        updated_since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Breadcrumb>> {
        let mut conn = self.pool.acquire().await?;
        Self::set_rls(&mut conn, owner_id, agent_id).await?;

        let rows = sqlx::query_as::<_, BreadcrumbRow>(&format!(
            r#"
            select {BREADCRUMB_COLUMNS} from breadcrumbs
            where owner_id = current_setting('app.current_owner_id')::uuid
              and (
                    visibility != 'private'
                    or created_by = current_setting('app.current_agent_id')::uuid
                    or exists (
                        select 1 from acl_entries a
                        where a.breadcrumb_id = breadcrumbs.id
                          and (a.grantee_agent_id = current_setting('app.current_agent_id')::uuid
                               or a.grantee_owner_id = current_setting('app.current_owner_id')::uuid)
                    )
              )
              and ($1::text is null or $1 = any(tags))
              and ($2::text is null or schema_name = $2)
              and ($3::timestamptz is null or updated_at >= $3)
            order by updated_at desc
            limit $4
            "#
        ))
        .bind(tag)
        .bind(schema_name)
        .bind(updated_since)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Candidate fetch for hybrid search (§4.9 "Hybrid search"):
    /// `final = 0.6*vec_score + 0.4*keyword_score`, with
    /// `vec_score = 1/(1+cosine_distance)` and `keyword_score` the fraction
    /// of `pointers` a candidate's `entity_keywords` overlap (0 when
    /// `pointers` is empty). Computed and ordered by entirely in SQL so the
    /// ranking matches across every caller of this query.
    pub async fn vector_candidates(
        &self,
        owner_id: Uuid,
        agent_id: Uuid,
        query_embedding: &Vector,
        pointers: &[String],
        schemas: &[String],
        exclude_schemas: &[String],
        limit: i64,
    ) -> Result<Vec<Breadcrumb>> {
        let mut conn = self.pool.acquire().await?;
        Self::set_rls(&mut conn, owner_id, agent_id).await?;

        let rows = sqlx::query_as::<_, BreadcrumbRow>(&format!(
            r#"
            select {BREADCRUMB_COLUMNS} from breadcrumbs
            where owner_id = current_setting('app.current_owner_id')::uuid
              and embedding is not null
              and not (schema_name = any($3))
              and (array_length($2::text[], 1) is null or schema_name = any($2))
              and (
                    visibility != 'private'
                    or created_by = current_setting('app.current_agent_id')::uuid
                    or exists (
                        select 1 from acl_entries a
                        where a.breadcrumb_id = breadcrumbs.id
                          and (a.grantee_agent_id = current_setting('app.current_agent_id')::uuid
                               or a.grantee_owner_id = current_setting('app.current_owner_id')::uuid)
                    )
              )
            order by (
                0.6 * (1.0 / (1.0 + (embedding <=> $1)))
                + 0.4 * coalesce(
                    cardinality(array(
                        select unnest(coalesce(entity_keywords, array[]::text[]))
                        intersect
                        select unnest($5::text[])
                    ))::float8 / nullif(cardinality($5::text[]), 0),
                    0.0
                )
            ) desc
            limit $4
            "#
        ))
        .bind(query_embedding)
        .bind(schemas)
        .bind(exclude_schemas)
        .bind(limit)
        .bind(pointers)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn update_entity_extraction(&self, id: Uuid, entities: &serde_json::Value, keywords: &[String]) -> Result<()> {
        sqlx::query("update breadcrumbs set entities = $2, entity_keywords = $3 where id = $1")
            .bind(id)
            .bind(entities)
            .bind(keywords)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn backfill_missing_entities(&self, limit: i64) -> Result<Vec<Breadcrumb>> {
        let rows = sqlx::query_as::<_, BreadcrumbRow>(&format!(
            "select {BREADCRUMB_COLUMNS} from breadcrumbs
             where entity_keywords is null order by created_at desc limit $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn backfill_missing_embeddings(&self, limit: i64) -> Result<Vec<Breadcrumb>> {
        let rows = sqlx::query_as::<_, BreadcrumbRow>(&format!(
            "select {BREADCRUMB_COLUMNS} from breadcrumbs
             where embedding is null order by created_at desc limit $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn set_breadcrumb_embedding(&self, id: Uuid, embedding: Vec<f32>) -> Result<()> {
        sqlx::query("update breadcrumbs set embedding = $2 where id = $1")
            .bind(id)
            .bind(Vector::from(embedding))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All `agent.def.v1` records -- discovery step 1 of §4.9. No RLS scoping
    /// here: this runs from the context-builder's own service identity
    /// across every tenant it is configured to serve.
    pub async fn load_agent_definitions(&self) -> Result<Vec<Breadcrumb>> {
        let rows = sqlx::query_as::<_, BreadcrumbRow>(&format!(
            "select {BREADCRUMB_COLUMNS} from breadcrumbs where schema_name = 'agent.def.v1'"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn get_schema_definition(&self, schema_name: &str) -> Result<Option<Breadcrumb>> {
        let tag = format!("defines:{schema_name}");
        let row = sqlx::query_as::<_, BreadcrumbRow>(&format!(
            "select {BREADCRUMB_COLUMNS} from breadcrumbs
             where schema_name = 'schema.def.v1' and $1 = any(tags)
             order by updated_at desc limit 1"
        ))
        .bind(&tag)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    // -----------------------------------------------------------------
    // Edges (C8)
    // -----------------------------------------------------------------

    pub async fn insert_edges(&self, edges: &[Edge]) -> Result<()> {
        if edges.is_empty() {
            return Ok(());
        }
        let from_ids: Vec<Uuid> = edges.iter().map(|e| e.from_id).collect();
        let to_ids: Vec<Uuid> = edges.iter().map(|e| e.to_id).collect();
        let edge_types: Vec<i16> = edges.iter().map(|e| e.edge_type.as_db()).collect();
        let weights: Vec<f32> = edges.iter().map(|e| e.weight).collect();

        sqlx::query(
            r#"
            insert into breadcrumb_edges (from_id, to_id, edge_type, weight)
            select * from unnest($1::uuid[], $2::uuid[], $3::int2[], $4::real[])
            on conflict (from_id, to_id, edge_type) do update set weight = excluded.weight
            "#,
        )
        .bind(&from_ids)
        .bind(&to_ids)
        .bind(&edge_types)
        .bind(&weights)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Radius-bounded bidirectional expansion from any number of seeds in one
    /// recursive CTE (§4.9 step 5), mirrored on the context-builder side by
    /// `graph::loader::load_graph_around_seeds`, which turns this pair of
    /// vecs into a `petgraph::Graph`.
    pub async fn load_subgraph(&self, seed_ids: &[Uuid], radius: i32) -> Result<(Vec<Breadcrumb>, Vec<Edge>)> {
        let rows = sqlx::query_as::<_, BreadcrumbRow>(&format!(
            r#"
            with recursive walk(id, depth) as (
                select id, 0 from breadcrumbs where id = any($1)
                union
                select distinct
                    case when e.from_id = w.id then e.to_id else e.from_id end,
                    w.depth + 1
                from walk w
                join breadcrumb_edges e on (e.from_id = w.id or e.to_id = w.id)
                where w.depth < $2
            )
            select {BREADCRUMB_COLUMNS} from breadcrumbs r
            join (select distinct id from walk) w on w.id = r.id
            "#
        ))
        .bind(seed_ids)
        .bind(radius)
        .fetch_all(&self.pool)
        .await?;

        let node_ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let edge_rows: Vec<(Uuid, Uuid, i16, f32)> = sqlx::query_as(
            "select from_id, to_id, edge_type, weight from breadcrumb_edges
             where from_id = any($1) and to_id = any($1)",
        )
        .bind(&node_ids)
        .fetch_all(&self.pool)
        .await?;

        let edges = edge_rows
            .into_iter()
            .filter_map(|(from_id, to_id, et, weight)| {
                EdgeType::from_db(et).map(|edge_type| Edge { from_id, to_id, edge_type, weight })
            })
            .collect();

        Ok((rows.into_iter().map(Into::into).collect(), edges))
    }

    // -----------------------------------------------------------------
    // Selectors / subscriptions
    // -----------------------------------------------------------------

    pub async fn create_selector_subscription(
        &self,
        owner_id: Uuid,
        agent_id: Uuid,
        selector: Selector,
        bus: bool,
        sse: bool,
        webhook: bool,
    ) -> Result<SelectorSubscription> {
        let id = Uuid::new_v4();
        let selector_json = serde_json::to_value(&selector).map_err(anyhow::Error::from)?;
        sqlx::query(
            "insert into selector_subscriptions (id, owner_id, agent_id, selector, bus, sse, webhook, created_at)
             values ($1, $2, $3, $4, $5, $6, $7, now())",
        )
        .bind(id)
        .bind(owner_id)
        .bind(agent_id)
        .bind(&selector_json)
        .bind(bus)
        .bind(sse)
        .bind(webhook)
        .execute(&self.pool)
        .await?;

        Ok(SelectorSubscription { id, owner_id, agent_id, selector, bus, sse, webhook })
    }

    pub async fn delete_selector_subscription(&self, owner_id: Uuid, agent_id: Uuid, id: Uuid) -> Result<bool> {
        let res = sqlx::query(
            "delete from selector_subscriptions where id = $1 and owner_id = $2 and agent_id = $3",
        )
        .bind(id)
        .bind(owner_id)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn list_selector_subscriptions(&self, owner_id: Uuid, agent_id: Uuid) -> Result<Vec<SelectorSubscription>> {
        self.query_subscriptions("where owner_id = $1 and agent_id = $2", owner_id, Some(agent_id)).await
    }

    pub async fn list_selector_subscriptions_for_owner(&self, owner_id: Uuid) -> Result<Vec<SelectorSubscription>> {
        self.query_subscriptions("where owner_id = $1", owner_id, None).await
    }

    async fn query_subscriptions(
        &self,
        clause: &str,
        owner_id: Uuid,
        agent_id: Option<Uuid>,
    ) -> Result<Vec<SelectorSubscription>> {
        let sql = format!(
            "select id, owner_id, agent_id, selector, bus, sse, webhook from selector_subscriptions {clause}"
        );
        let rows: Vec<(Uuid, Uuid, Uuid, serde_json::Value, bool, bool, bool)> = if let Some(agent_id) = agent_id {
            sqlx::query_as(&sql).bind(owner_id).bind(agent_id).fetch_all(&self.pool).await?
        } else {
            sqlx::query_as(&sql).bind(owner_id).fetch_all(&self.pool).await?
        };

        Ok(rows
            .into_iter()
            .filter_map(|(id, owner_id, agent_id, selector, bus, sse, webhook)| {
                serde_json::from_value(selector).ok().map(|selector| SelectorSubscription {
                    id,
                    owner_id,
                    agent_id,
                    selector,
                    bus,
                    sse,
                    webhook,
                })
            })
            .collect())
    }

    // -----------------------------------------------------------------
    // ACL
    // -----------------------------------------------------------------

    pub async fn grant_acl(&self, owner_id: Uuid, grant: &AclGrantAgent) -> Result<()> {
        sqlx::query(
            "insert into acl_entries (id, owner_id, breadcrumb_id, grantee_agent_id, grantee_owner_id, action, created_at)
             values ($1, $2, $3, $4, $5, $6, now())",
        )
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .bind(grant.breadcrumb_id)
        .bind(grant.grantee_agent_id)
        .bind(grant.grantee_owner_id)
        .bind(&grant.action)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn revoke_acl(&self, owner_id: Uuid, breadcrumb_id: Uuid, grantee_agent_id: Uuid, action: &str) -> Result<i64> {
        let res = sqlx::query(
            "delete from acl_entries where owner_id = $1 and breadcrumb_id = $2 and grantee_agent_id = $3 and action = $4",
        )
        .bind(owner_id)
        .bind(breadcrumb_id)
        .bind(grantee_agent_id)
        .bind(action)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() as i64)
    }

    // -----------------------------------------------------------------
    // Agents / tenants / webhooks
    // -----------------------------------------------------------------

    pub async fn upsert_agent(&self, owner_id: Uuid, agent_id: Uuid, roles: Vec<String>) -> Result<()> {
        sqlx::query(
            "insert into agents (id, owner_id, roles, created_at)
             values ($1, $2, $3, now())
             on conflict (id) do update set roles = excluded.roles",
        )
        .bind(agent_id)
        .bind(owner_id)
        .bind(&roles)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_agent(&self, owner_id: Uuid, agent_id: Uuid) -> Result<()> {
        sqlx::query("delete from agents where owner_id = $1 and id = $2")
            .bind(owner_id)
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn ensure_tenant(&self, tenant_id: Uuid, name: &str) -> Result<()> {
        sqlx::query("insert into tenants (id, name, created_at) values ($1, $2, now()) on conflict (id) do update set name = excluded.name")
            .bind(tenant_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_tenants(&self) -> Result<Vec<(Uuid, String)>> {
        let rows: Vec<(Uuid, String)> = sqlx::query_as("select id, name from tenants order by created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn set_agent_webhook(&self, owner_id: Uuid, agent_id: Uuid, url: &str, secret: &str) -> Result<()> {
        sqlx::query(
            "insert into agent_webhooks (owner_id, agent_id, url, secret, active, created_at)
             values ($1, $2, $3, $4, true, now())
             on conflict (owner_id, agent_id) do update set url = excluded.url, secret = excluded.secret, active = true",
        )
        .bind(owner_id)
        .bind(agent_id)
        .bind(url)
        .bind(secret)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_agent_webhook(&self, owner_id: Uuid, agent_id: Uuid) -> Result<Option<(String, String)>> {
        let row: Option<(String, String)> = sqlx::query_as(
            "select url, secret from agent_webhooks where owner_id = $1 and agent_id = $2 and active = true",
        )
        .bind(owner_id)
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn deactivate_agent_webhook(&self, owner_id: Uuid, agent_id: Uuid) -> Result<()> {
        sqlx::query("update agent_webhooks set active = false where owner_id = $1 and agent_id = $2")
            .bind(owner_id)
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn active_webhooks_for_owner(&self, owner_id: Uuid) -> Result<Vec<(Uuid, String, String)>> {
        let rows: Vec<(Uuid, String, String)> = sqlx::query_as(
            "select agent_id, url, secret from agent_webhooks where owner_id = $1 and active = true",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------
    // Secrets (C1, envelope-encrypted at rest -- see rcrt-server::secrets)
    // -----------------------------------------------------------------

    pub async fn create_secret(
        &self,
        owner_id: Uuid,
        name: &str,
        scope_type: &str,
        scope_id: Option<Uuid>,
        enc_blob: &[u8],
        wrapped_key: &[u8],
        nonce: &[u8],
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "insert into secrets (id, owner_id, name, scope_type, scope_id, enc_blob, wrapped_key, nonce, created_at)
             values ($1, $2, $3, $4, $5, $6, $7, $8, now())",
        )
        .bind(id)
        .bind(owner_id)
        .bind(name)
        .bind(scope_type)
        .bind(scope_id)
        .bind(enc_blob)
        .bind(wrapped_key)
        .bind(nonce)
        .execute(&self.pool)
        .await?;

        sqlx::query("insert into secret_audit (id, secret_id, agent_id, action, created_at) values ($1, $2, null, 'create', now())")
            .bind(Uuid::new_v4())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    pub async fn get_secret_material(&self, owner_id: Uuid, secret_id: Uuid) -> Result<Option<(Vec<u8>, Vec<u8>, Vec<u8>)>> {
        let row: Option<(Vec<u8>, Vec<u8>, Vec<u8>)> = sqlx::query_as(
            "select enc_blob, wrapped_key, nonce from secrets where id = $1 and owner_id = $2",
        )
        .bind(secret_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn audit_secret_decrypt(&self, secret_id: Uuid, agent_id: Uuid) -> Result<()> {
        sqlx::query("insert into secret_audit (id, secret_id, agent_id, action, created_at) values ($1, $2, $3, 'decrypt', now())")
            .bind(Uuid::new_v4())
            .bind(secret_id)
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_secret(&self, owner_id: Uuid, secret_id: Uuid) -> Result<bool> {
        let res = sqlx::query("delete from secrets where id = $1 and owner_id = $2")
            .bind(secret_id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn list_secrets(&self, owner_id: Uuid) -> Result<Vec<SecretMeta>> {
        let rows = sqlx::query_as::<_, SecretMeta>(
            "select id, name, scope_type, scope_id, created_at from secrets
             where owner_id = $1 order by created_at desc",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn update_secret(
        &self,
        owner_id: Uuid,
        secret_id: Uuid,
        enc_blob: &[u8],
        wrapped_key: &[u8],
        nonce: &[u8],
    ) -> Result<bool> {
        let res = sqlx::query(
            "update secrets set enc_blob = $3, wrapped_key = $4, nonce = $5 where id = $1 and owner_id = $2",
        )
        .bind(secret_id)
        .bind(owner_id)
        .bind(enc_blob)
        .bind(wrapped_key)
        .bind(nonce)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() > 0 {
            sqlx::query("insert into secret_audit (id, secret_id, agent_id, action, created_at) values ($1, $2, null, 'rotate', now())")
                .bind(Uuid::new_v4())
                .bind(secret_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(res.rows_affected() > 0)
    }

    // -----------------------------------------------------------------
    // DLQ (§4.6, §4.11)
    // -----------------------------------------------------------------

    pub async fn enqueue_dlq(
        &self,
        owner_id: Uuid,
        agent_id: Uuid,
        webhook_url: &str,
        envelope: &serde_json::Value,
        last_status: Option<i32>,
        last_error: &str,
        attempts: i32,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "insert into webhook_dlq (id, owner_id, agent_id, webhook_url, envelope, last_status, last_error, attempts, created_at)
             values ($1, $2, $3, $4, $5, $6, $7, $8, now())",
        )
        .bind(id)
        .bind(owner_id)
        .bind(agent_id)
        .bind(webhook_url)
        .bind(envelope)
        .bind(last_status)
        .bind(last_error)
        .bind(attempts)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn list_dlq(&self, owner_id: Uuid) -> Result<Vec<DlqEntry>> {
        let rows = sqlx::query_as::<_, DlqEntry>(
            "select id, owner_id, agent_id, webhook_url, envelope, last_status, last_error, attempts, created_at
             from webhook_dlq where owner_id = $1 order by created_at desc",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_dlq(&self, owner_id: Uuid, id: Uuid) -> Result<Option<DlqEntry>> {
        let row = sqlx::query_as::<_, DlqEntry>(
            "select id, owner_id, agent_id, webhook_url, envelope, last_status, last_error, attempts, created_at
             from webhook_dlq where id = $1 and owner_id = $2",
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn delete_dlq(&self, owner_id: Uuid, id: Uuid) -> Result<bool> {
        let res = sqlx::query("delete from webhook_dlq where id = $1 and owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn purge_old_dlq(&self, retention_days: i64) -> Result<i64> {
        let res = sqlx::query("delete from webhook_dlq where created_at < now() - ($1 || ' days')::interval")
            .bind(retention_days.to_string())
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() as i64)
    }

    // -----------------------------------------------------------------
    // Idempotency (§6 `Idempotency-Key`, §7 idempotency conflict)
    // -----------------------------------------------------------------

    pub async fn check_idempotency_key(&self, owner_id: Uuid, key: &str, request_hash: &str) -> Result<Option<Uuid>> {
        let row: Option<(Uuid, String)> = sqlx::query_as(
            "select record_id, request_hash from idempotency_keys where owner_id = $1 and key = $2",
        )
        .bind(owner_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((record_id, stored_hash)) if stored_hash == request_hash => Ok(Some(record_id)),
            Some(_) => Err(RcrtError::IdempotencyConflict),
            None => Ok(None),
        }
    }

    pub async fn store_idempotency_key(&self, owner_id: Uuid, key: &str, request_hash: &str, record_id: Uuid) -> Result<()> {
        sqlx::query(
            "insert into idempotency_keys (owner_id, key, request_hash, record_id, created_at)
             values ($1, $2, $3, $4, now())
             on conflict (owner_id, key) do nothing",
        )
        .bind(owner_id)
        .bind(key)
        .bind(request_hash)
        .bind(record_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Hygiene / admin (C11)
    // -----------------------------------------------------------------

    pub async fn purge_expired(&self, batch_size: i64) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "delete from breadcrumbs where id in (
                select id from breadcrumbs where ttl is not null and ttl < now() limit $1
             ) returning id",
        )
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn count_active_agents(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("select count(*) from agents").fetch_one(&self.pool).await?;
        Ok(count)
    }
}
