use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::{header, request::Parts, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec, TextEncoder,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::migrate::Migrator;
use uuid::Uuid;

use rcrt_core::db::Db;
use rcrt_core::error::RcrtError;
use rcrt_core::models::{
    AclGrantAgent, BreadcrumbCreate, BreadcrumbUpdate, Selector, SelectorSubscription,
};

mod config;
mod embedding;
mod errors;
mod hygiene;
mod schema_cache;
mod sse;
mod transforms;
mod webhooks;

use config::{AuthMode, Config};
use embedding::EmbeddingProvider;
use errors::{internal_error, ApiError};
use schema_cache::SchemaCache;
use transforms::{LlmHints, TransformEngine};

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: Config,
    pub schema_cache: Arc<SchemaCache>,
    pub transform_engine: Arc<TransformEngine>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub jwt_decoding_key: Option<DecodingKey>,
    pub jwt_validation: Validation,
    pub hygiene_stats: Arc<std::sync::Mutex<hygiene::HygieneStats>>,
    #[cfg(feature = "nats")]
    pub nats_conn: Option<nats::Connection>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "rcrt_server=info".into()),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("starting rcrt-server, auth_mode={:?}", config.auth_mode);

    let db = Db::connect(&config.database_url, config.max_db_connections).await?;
    MIGRATOR.run(&db.pool).await?;
    tracing::info!("migrations applied");

    let jwt_decoding_key = config
        .jwt_public_key_pem
        .as_ref()
        .map(|pem| DecodingKey::from_rsa_pem(pem.as_bytes()).expect("invalid RSA public key"));
    let jwt_validation = Validation::new(Algorithm::RS256);

    #[cfg(feature = "nats")]
    let nats_conn = match &config.nats_url {
        Some(url) => Some(nats::connect(url).expect("failed to connect to NATS")),
        None => None,
    };

    let embedder: Arc<dyn EmbeddingProvider> = build_embedder();

    let state = AppState {
        db,
        config: config.clone(),
        schema_cache: Arc::new(SchemaCache::new()),
        transform_engine: Arc::new(TransformEngine::new()),
        embedder,
        jwt_decoding_key,
        jwt_validation,
        hygiene_stats: Arc::new(std::sync::Mutex::new(hygiene::HygieneStats::default())),
        #[cfg(feature = "nats")]
        nats_conn,
    };

    hygiene::HygieneRunner::new(state.clone(), config.hygiene.clone()).start();

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/", get(docs_page))
        .route("/docs", get(docs_page))
        .route("/swagger", get(swagger_page))
        .route("/openapi.json", get(openapi_spec))
        .route("/admin/purge", post(admin_purge))
        .route("/records", post(create_record).get(list_records))
        .route("/records/search", get(search_records))
        .route(
            "/records/:id",
            get(get_record).patch(update_record).delete(delete_record),
        )
        .route("/records/:id/full", get(get_record_full))
        .route("/records/:id/history", get(get_record_history))
        .route(
            "/subscriptions/selectors",
            post(create_selector).get(list_selectors),
        )
        .route(
            "/subscriptions/selectors/:id",
            axum::routing::put(update_selector).delete(delete_selector),
        )
        .route("/events/stream", get(event_stream))
        .route("/acl", get(list_acls))
        .route("/acl/grant", post(grant_acl))
        .route("/acl/revoke", post(revoke_acl))
        .route("/agents/:id", post(register_agent).delete(delete_agent))
        .route(
            "/agents/:id/webhooks",
            post(register_webhook).get(get_webhook).delete(deactivate_webhook),
        )
        .route("/tenants", post(ensure_tenant).get(list_tenants))
        .route("/secrets", post(create_secret).get(list_secrets))
        .route("/secrets/:id", axum::routing::put(update_secret).delete(delete_secret))
        .route("/secrets/:id/decrypt", post(decrypt_secret))
        .route("/dlq", get(list_dlq))
        .route("/dlq/:id", axum::routing::delete(delete_dlq))
        .route("/dlq/:id/retry", post(retry_dlq))
        .with_state(state)
        .layer(axum::middleware::from_fn(http_metrics_middleware));

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!("listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}

fn build_embedder() -> Arc<dyn EmbeddingProvider> {
    #[cfg(feature = "embed-onnx")]
    {
        let tokenizer_path = std::env::var("ONNX_TOKENIZER_PATH").ok();
        let model_path = std::env::var("ONNX_MODEL_PATH").ok();
        if let (Some(t), Some(m)) = (tokenizer_path, model_path) {
            match embedding::onnx::OnnxEmbeddingProvider::load(&t, &m) {
                Ok(p) => return Arc::new(p),
                Err(e) => tracing::warn!("failed to load onnx embedding model: {}, falling back to null provider", e),
            }
        }
    }
    Arc::new(embedding::NullEmbeddingProvider)
}

// ---------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub owner_id: Uuid,
    pub agent_id: Uuid,
    pub roles: Vec<String>,
}

impl AuthContext {
    fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    fn require_role(&self, role: &str) -> Result<(), ApiError> {
        if self.has_role(role) || self.has_role("curator") {
            Ok(())
        } else {
            Err(RcrtError::BadRequest(format!("missing required role: {role}")).into())
        }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Uuid,
    owner_id: Uuid,
    #[serde(default)]
    roles: Vec<String>,
    #[allow(dead_code)]
    exp: usize,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if state.config.auth_mode == AuthMode::Disabled {
            return Ok(AuthContext {
                owner_id: state.config.dev_owner_id.unwrap_or_else(Uuid::new_v4),
                agent_id: state.config.dev_agent_id.unwrap_or_else(Uuid::new_v4),
                roles: vec!["emitter".into(), "subscriber".into(), "curator".into()],
            });
        }

        let decoding_key = state
            .jwt_decoding_key
            .as_ref()
            .ok_or_else(|| RcrtError::BadRequest("server has no JWT_PUBLIC_KEY_PEM configured".into()))?;

        let header_val = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RcrtError::BadRequest("missing Authorization header".into()))?;

        let token = header_val
            .strip_prefix("Bearer ")
            .ok_or_else(|| RcrtError::BadRequest("Authorization header must be a Bearer token".into()))?;

        let data = decode::<Claims>(token, decoding_key, &state.jwt_validation)
            .map_err(|e| RcrtError::BadRequest(format!("invalid token: {e}")))?;

        Ok(AuthContext {
            owner_id: data.claims.owner_id,
            agent_id: data.claims.sub,
            roles: data.claims.roles,
        })
    }
}

// ---------------------------------------------------------------------
// Metrics / health / docs
// ---------------------------------------------------------------------

static HTTP_REQUESTS: std::sync::OnceLock<IntCounterVec> = std::sync::OnceLock::new();
static HTTP_DURATION: std::sync::OnceLock<HistogramVec> = std::sync::OnceLock::new();

fn http_requests() -> &'static IntCounterVec {
    HTTP_REQUESTS.get_or_init(|| {
        register_int_counter_vec!("http_requests_total", "HTTP requests by method/path/status", &["method", "path", "status"])
            .expect("metric registration")
    })
}

fn http_duration() -> &'static HistogramVec {
    HTTP_DURATION.get_or_init(|| {
        register_histogram_vec!("http_request_duration_seconds", "HTTP request latency", &["method", "path"])
            .expect("metric registration")
    })
}

async fn http_metrics_middleware(req: axum::extract::Request, next: axum::middleware::Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let start = std::time::Instant::now();
    let response = next.run(req).await;
    http_requests()
        .with_label_values(&[&method, &path, response.status().as_str()])
        .inc();
    http_duration().with_label_values(&[&method, &path]).observe(start.elapsed().as_secs_f64());
    response
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn metrics() -> impl IntoResponse {
    let registry = prometheus::default_registry();
    let mut buf = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buf).ok();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        String::from_utf8(buf).unwrap_or_default(),
    )
}

async fn docs_page() -> Html<&'static str> {
    Html(
        r#"<!doctype html><html><head><title>RCRT substrate</title></head>
        <body><redoc spec-url="/openapi.json"></redoc>
        <script src="https://cdn.jsdelivr.net/npm/redoc@2/bundles/redoc.standalone.js"></script>
        </body></html>"#,
    )
}

async fn swagger_page() -> Html<&'static str> {
    Html(
        r#"<!doctype html><html><head><title>RCRT substrate</title></head>
        <body><div id="swagger"></div>
        <script src="https://cdn.jsdelivr.net/npm/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
        <script>window.onload = () => SwaggerUIBundle({url: "/openapi.json", dom_id: "#swagger"});</script>
        </body></html>"#,
    )
}

async fn openapi_spec() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        include_str!("../../../docs/openapi.json"),
    )
}

async fn admin_purge(State(state): State<AppState>, auth: AuthContext) -> Result<Json<serde_json::Value>, ApiError> {
    auth.require_role("curator")?;
    let purged = state.db.purge_expired(state.config.hygiene.batch_size).await?;
    Ok(Json(json!({"purged": purged.len()})))
}

// ---------------------------------------------------------------------
// Records (C1 + C4)
// ---------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CreateResponse {
    id: Uuid,
    version: i32,
}

async fn create_record(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: header::HeaderMap,
    Json(req): Json<BreadcrumbCreate>,
) -> Result<Json<CreateResponse>, ApiError> {
    auth.require_role("emitter")?;

    let request_hash = Db::checksum_json(&req.context);
    if let Some(key) = headers.get("idempotency-key").and_then(|v| v.to_str().ok()) {
        if let Some(existing_id) = state.db.check_idempotency_key(auth.owner_id, key, &request_hash).await? {
            if let Some(rec) = state.db.get_breadcrumb(auth.owner_id, auth.agent_id, existing_id).await? {
                return Ok(Json(CreateResponse { id: rec.id, version: rec.version }));
            }
        }
    }

    let embedding = embed_if_applicable(&state, req.schema_name.as_deref(), &req.title, &req.context).await;

    let rec = state
        .db
        .create_breadcrumb(auth.owner_id, auth.agent_id, req, embedding, vec![])
        .await?;

    if let Some(key) = headers.get("idempotency-key").and_then(|v| v.to_str().ok()) {
        state.db.store_idempotency_key(auth.owner_id, key, &request_hash, rec.id).await.ok();
    }

    publish_event(&state, "created", &rec).await;

    Ok(Json(CreateResponse { id: rec.id, version: rec.version }))
}

async fn embed_if_applicable(
    state: &AppState,
    schema_name: Option<&str>,
    title: &str,
    context: &serde_json::Value,
) -> Option<Vec<f32>> {
    if !embedding::should_embed_schema(schema_name) {
        return None;
    }
    let text = format!("{title}\n{context}");
    match state.embedder.embed(&text).await {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!("embedding skipped: {}", e);
            None
        }
    }
}

async fn apply_hints(state: &AppState, schema_name: Option<&str>, record_llm_hints: Option<&serde_json::Value>, context: &serde_json::Value) -> (serde_json::Value, Option<String>) {
    let hints: Option<Arc<LlmHints>> = if let Some(v) = record_llm_hints {
        serde_json::from_value::<LlmHints>(v.clone()).ok().map(Arc::new)
    } else if let Some(schema) = schema_name {
        state.schema_cache.get_or_load(&state.db, schema).await.unwrap_or(None)
    } else {
        None
    };

    match hints {
        Some(h) => match state.transform_engine.apply_llm_hints(context, &h) {
            Ok(v) => (v, None),
            Err(e) => (context.clone(), Some(e)),
        },
        None => (context.clone(), None),
    }
}

#[derive(Debug, Serialize)]
struct RecordContextView {
    id: Uuid,
    title: String,
    context: serde_json::Value,
    tags: Vec<String>,
    schema_name: Option<String>,
    version: i32,
    updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

async fn get_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<RecordContextView>, ApiError> {
    let rec = state
        .db
        .get_breadcrumb(auth.owner_id, auth.agent_id, id)
        .await?
        .ok_or(RcrtError::NotFound)?;

    let (context, warning) = apply_hints(&state, rec.schema_name.as_deref(), rec.llm_hints.as_ref(), &rec.context).await;

    Ok(Json(RecordContextView {
        id: rec.id,
        title: rec.title,
        context,
        tags: rec.tags,
        schema_name: rec.schema_name,
        version: rec.version,
        updated_at: rec.updated_at,
        warning,
    }))
}

async fn get_record_full(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<rcrt_core::models::Breadcrumb>, ApiError> {
    auth.require_role("curator")?;
    let rec = state.db.get_breadcrumb(auth.owner_id, auth.agent_id, id).await?.ok_or(RcrtError::NotFound)?;
    Ok(Json(rec))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    tag: Option<String>,
    schema_name: Option<String>,
    updated_since: Option<chrono::DateTime<chrono::Utc>>,
    limit: Option<i64>,
}

async fn list_records(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<serde_json::Value>>, ApiError> {
    let recs = state
        .db
        .list_breadcrumbs(auth.owner_id, auth.agent_id, q.tag.as_deref(), q.schema_name.as_deref(), q.updated_since, q.limit.unwrap_or(50).min(500))
        .await?;

    let items = recs
        .into_iter()
        .map(|r| json!({"id": r.id, "schema_name": r.schema_name, "title": r.title, "tags": r.tags, "version": r.version, "updated_at": r.updated_at}))
        .collect();

    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: String,
    schemas: Option<String>,
    exclude_schemas: Option<String>,
    pointers: Option<String>,
    limit: Option<i64>,
}

async fn search_records(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<RecordContextView>>, ApiError> {
    let embedding = state
        .embedder
        .embed(&q.q)
        .await
        .map_err(|e| RcrtError::Upstream(format!("embedding unavailable: {e}")))?;

    let schemas: Vec<String> = q.schemas.map(|s| s.split(',').map(str::to_string).collect()).unwrap_or_default();
    let exclude: Vec<String> = q.exclude_schemas.map(|s| s.split(',').map(str::to_string).collect()).unwrap_or_default();
    let pointers: Vec<String> = q.pointers
        .map(|s| s.split(',').map(|p| p.trim().to_lowercase()).filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    let recs = state
        .db
        .vector_candidates(auth.owner_id, auth.agent_id, &pgvector::Vector::from(embedding), &pointers, &schemas, &exclude, q.limit.unwrap_or(10).min(100))
        .await?;

    let mut out = Vec::with_capacity(recs.len());
    for rec in recs {
        let (context, warning) = apply_hints(&state, rec.schema_name.as_deref(), rec.llm_hints.as_ref(), &rec.context).await;
        out.push(RecordContextView {
            id: rec.id,
            title: rec.title,
            context,
            tags: rec.tags,
            schema_name: rec.schema_name,
            version: rec.version,
            updated_at: rec.updated_at,
            warning,
        });
    }

    Ok(Json(out))
}

async fn update_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    headers: header::HeaderMap,
    Json(update): Json<BreadcrumbUpdate>,
) -> Result<Json<CreateResponse>, ApiError> {
    auth.require_role("emitter")?;

    let expected_version: i32 = headers
        .get("if-match")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or(RcrtError::PreconditionRequired)?;

    let schema_name = state
        .db
        .get_breadcrumb(auth.owner_id, auth.agent_id, id)
        .await?
        .and_then(|r| r.schema_name);

    let embedding = match &update.context {
        Some(ctx) => {
            let title = update.title.clone().unwrap_or_default();
            embed_if_applicable(&state, schema_name.as_deref(), &title, ctx).await
        }
        None => None,
    };

    let rec = state
        .db
        .update_breadcrumb(auth.owner_id, auth.agent_id, id, expected_version, update, embedding, None)
        .await?;

    publish_event(&state, "updated", &rec).await;

    Ok(Json(CreateResponse { id: rec.id, version: rec.version }))
}

async fn delete_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    auth.require_role("curator")?;
    let deleted = state.db.delete_breadcrumb(auth.owner_id, auth.agent_id, id).await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(RcrtError::NotFound.into())
    }
}

async fn get_record_history(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<rcrt_core::models::BreadcrumbHistoryRow>>, ApiError> {
    let rows = state.db.list_breadcrumb_history(auth.owner_id, auth.agent_id, id).await?;
    Ok(Json(rows))
}

/// Publishes to the change fabric, fanning out to SSE subscribers and
/// webhook targets. A best-effort operation: a record write already
/// succeeded, so a fan-out failure is logged, not surfaced to the caller.
async fn publish_event(state: &AppState, event_type: &str, rec: &rcrt_core::models::Breadcrumb) {
    let envelope = json!({
        "type": event_type,
        "record_id": rec.id,
        "owner": rec.owner_id,
        "schema_name": rec.schema_name,
        "tags": rec.tags,
        "version": rec.version,
        "updated_at": rec.updated_at,
    });

    #[cfg(feature = "nats")]
    if let Some(conn) = &state.nats_conn {
        let subject = format!("bc.{}.{}", rec.id, event_type);
        if let Err(e) = conn.publish(&subject, envelope.to_string()) {
            tracing::warn!("nats publish failed: {}", e);
        }
    }

    match state.db.active_webhooks_for_owner(rec.owner_id).await {
        Ok(webhooks) => {
            for (agent_id, url, secret) in webhooks {
                let db = state.db.clone();
                let owner_id = rec.owner_id;
                let envelope = envelope.clone();
                let max_retries = state.config.webhook_max_retries;
                tokio::spawn(async move {
                    webhooks::dispatch(&db, owner_id, agent_id, &url, &secret, &envelope, max_retries).await;
                });
            }
        }
        Err(e) => tracing::warn!("failed to load webhooks for fan-out: {}", e),
    }
}

// ---------------------------------------------------------------------
// Selector subscriptions
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SelectorReq {
    selector: Selector,
    #[serde(default = "default_true")]
    bus: bool,
    #[serde(default = "default_true")]
    sse: bool,
    #[serde(default)]
    webhook: bool,
}

fn default_true() -> bool {
    true
}

async fn create_selector(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<SelectorReq>,
) -> Result<Json<SelectorSubscription>, ApiError> {
    auth.require_role("subscriber")?;
    let sub = state
        .db
        .create_selector_subscription(auth.owner_id, auth.agent_id, req.selector, req.bus, req.sse, req.webhook)
        .await?;
    Ok(Json(sub))
}

async fn list_selectors(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<Vec<SelectorSubscription>>, ApiError> {
    let subs = state.db.list_selector_subscriptions(auth.owner_id, auth.agent_id).await?;
    Ok(Json(subs))
}

async fn update_selector(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<SelectorReq>,
) -> Result<Json<SelectorSubscription>, ApiError> {
    auth.require_role("subscriber")?;
    state.db.delete_selector_subscription(auth.owner_id, auth.agent_id, id).await?;
    let sub = state
        .db
        .create_selector_subscription(auth.owner_id, auth.agent_id, req.selector, req.bus, req.sse, req.webhook)
        .await?;
    Ok(Json(sub))
}

async fn delete_selector(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let deleted = state.db.delete_selector_subscription(auth.owner_id, auth.agent_id, id).await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(RcrtError::NotFound.into())
    }
}

// ---------------------------------------------------------------------
// Change fabric SSE
// ---------------------------------------------------------------------

async fn event_stream(State(state): State<AppState>, auth: AuthContext) -> Response {
    #[cfg(feature = "nats")]
    {
        if let Some(conn) = state.nats_conn.clone() {
            return match sse::stream_for_owner(conn, auth.owner_id, Some(auth.agent_id)) {
                Ok(sse) => sse.into_response(),
                Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("sse setup failed: {e}")).into_response(),
            };
        }
    }
    (StatusCode::SERVICE_UNAVAILABLE, "change fabric not configured (NATS_URL unset)").into_response()
}

// ---------------------------------------------------------------------
// ACL
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AclQuery {
    record_id: Uuid,
}

async fn list_acls(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<AclQuery>,
) -> Result<Json<Vec<serde_json::Value>>, ApiError> {
    let rows: Vec<(Option<Uuid>, Option<Uuid>, String)> = sqlx::query_as(
        "select grantee_agent_id, grantee_owner_id, action
         from acl_entries where owner_id = $1 and breadcrumb_id = $2",
    )
    .bind(auth.owner_id)
    .bind(q.record_id)
    .fetch_all(&state.db.pool)
    .await
    .map_err(internal_error)?;

    Ok(Json(
        rows.into_iter()
            .map(|(agent, owner, action)| json!({"grantee_agent_id": agent, "grantee_owner_id": owner, "action": action}))
            .collect(),
    ))
}

async fn grant_acl(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(grant): Json<AclGrantAgent>,
) -> Result<StatusCode, ApiError> {
    auth.require_role("curator")?;
    state.db.grant_acl(auth.owner_id, &grant).await?;
    Ok(StatusCode::CREATED)
}

#[derive(Debug, Deserialize)]
struct RevokeAclReq {
    breadcrumb_id: Uuid,
    grantee_agent_id: Uuid,
    action: String,
}

async fn revoke_acl(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<RevokeAclReq>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth.require_role("curator")?;
    let revoked = state.db.revoke_acl(auth.owner_id, req.breadcrumb_id, req.grantee_agent_id, &req.action).await?;
    Ok(Json(json!({"revoked": revoked})))
}

// ---------------------------------------------------------------------
// Agents / tenants / webhooks
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RegisterAgentReq {
    roles: Vec<String>,
}

async fn register_agent(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(agent_id): Path<Uuid>,
    Json(req): Json<RegisterAgentReq>,
) -> Result<StatusCode, ApiError> {
    if agent_id != auth.agent_id {
        auth.require_role("curator")?;
    }
    state.db.upsert_agent(auth.owner_id, agent_id, req.roles).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_agent(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(agent_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    auth.require_role("curator")?;
    state.db.delete_agent(auth.owner_id, agent_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct RegisterWebhookReq {
    url: String,
    secret: String,
}

async fn register_webhook(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(agent_id): Path<Uuid>,
    Json(req): Json<RegisterWebhookReq>,
) -> Result<StatusCode, ApiError> {
    if agent_id != auth.agent_id {
        auth.require_role("curator")?;
    }
    state.db.set_agent_webhook(auth.owner_id, agent_id, &req.url, &req.secret).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_webhook(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(agent_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if agent_id != auth.agent_id {
        auth.require_role("curator")?;
    }
    match state.db.get_agent_webhook(auth.owner_id, agent_id).await? {
        Some((url, _secret)) => Ok(Json(json!({"url": url}))),
        None => Err(RcrtError::NotFound.into()),
    }
}

async fn deactivate_webhook(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(agent_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if agent_id != auth.agent_id {
        auth.require_role("curator")?;
    }
    state.db.deactivate_agent_webhook(auth.owner_id, agent_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct EnsureTenantReq {
    id: Uuid,
    name: String,
}

async fn ensure_tenant(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<EnsureTenantReq>,
) -> Result<StatusCode, ApiError> {
    auth.require_role("curator")?;
    state.db.ensure_tenant(req.id, &req.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_tenants(State(state): State<AppState>, auth: AuthContext) -> Result<Json<Vec<serde_json::Value>>, ApiError> {
    auth.require_role("curator")?;
    let tenants = state.db.list_tenants().await?;
    Ok(Json(tenants.into_iter().map(|(id, name)| json!({"id": id, "name": name})).collect()))
}

// ---------------------------------------------------------------------
// Secrets (envelope encryption: AES-256-GCM payload, XChaCha20-Poly1305 key wrap)
// ---------------------------------------------------------------------

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce as AesNonce};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;

fn load_kek(config: &Config) -> Result<[u8; 32], ApiError> {
    let b64 = config
        .local_kek_base64
        .as_ref()
        .ok_or_else(|| RcrtError::Other(anyhow::anyhow!("LOCAL_KEK_BASE64 not configured")))?;
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, b64)
        .map_err(|e| RcrtError::Other(anyhow::anyhow!("invalid LOCAL_KEK_BASE64: {e}")))?;
    bytes.try_into().map_err(|_| RcrtError::Other(anyhow::anyhow!("LOCAL_KEK_BASE64 must decode to 32 bytes")).into())
}

#[derive(Debug, Deserialize)]
struct CreateSecretReq {
    name: String,
    scope_type: String,
    scope_id: Option<Uuid>,
    value: String,
}

async fn create_secret(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateSecretReq>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth.require_role("curator")?;
    let kek = load_kek(&state.config)?;

    let mut dek = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut dek);

    let mut value_nonce = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut value_nonce);
    let cipher = Aes256Gcm::new_from_slice(&dek).map_err(|e| RcrtError::Other(anyhow::anyhow!("{e}")))?;
    let enc_blob = cipher
        .encrypt(AesNonce::from_slice(&value_nonce), req.value.as_bytes())
        .map_err(|e| RcrtError::Other(anyhow::anyhow!("secret encryption failed: {e}")))?;

    let mut wrap_nonce = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut wrap_nonce);
    let wrap_cipher = XChaCha20Poly1305::new_from_slice(&kek).map_err(|e| RcrtError::Other(anyhow::anyhow!("{e}")))?;
    let wrapped_key = wrap_cipher
        .encrypt(XNonce::from_slice(&wrap_nonce), dek.as_slice())
        .map_err(|e| RcrtError::Other(anyhow::anyhow!("key wrap failed: {e}")))?;

    let id = state
        .db
        .create_secret(
            auth.owner_id,
            &req.name,
            &req.scope_type,
            req.scope_id,
            &enc_blob,
            &wrapped_key,
            &[value_nonce.as_slice(), wrap_nonce.as_slice()].concat(),
        )
        .await?;

    Ok(Json(json!({"id": id})))
}

async fn list_secrets(State(state): State<AppState>, auth: AuthContext) -> Result<Json<Vec<rcrt_core::models::SecretMeta>>, ApiError> {
    let secrets = state.db.list_secrets(auth.owner_id).await?;
    Ok(Json(secrets))
}

#[derive(Debug, Deserialize)]
struct UpdateSecretReq {
    value: String,
}

async fn update_secret(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateSecretReq>,
) -> Result<StatusCode, ApiError> {
    auth.require_role("curator")?;
    let kek = load_kek(&state.config)?;

    let mut dek = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut dek);
    let mut value_nonce = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut value_nonce);
    let cipher = Aes256Gcm::new_from_slice(&dek).map_err(|e| RcrtError::Other(anyhow::anyhow!("{e}")))?;
    let enc_blob = cipher
        .encrypt(AesNonce::from_slice(&value_nonce), req.value.as_bytes())
        .map_err(|e| RcrtError::Other(anyhow::anyhow!("secret encryption failed: {e}")))?;

    let mut wrap_nonce = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut wrap_nonce);
    let wrap_cipher = XChaCha20Poly1305::new_from_slice(&kek).map_err(|e| RcrtError::Other(anyhow::anyhow!("{e}")))?;
    let wrapped_key = wrap_cipher
        .encrypt(XNonce::from_slice(&wrap_nonce), dek.as_slice())
        .map_err(|e| RcrtError::Other(anyhow::anyhow!("key wrap failed: {e}")))?;

    let updated = state
        .db
        .update_secret(auth.owner_id, id, &enc_blob, &wrapped_key, &[value_nonce.as_slice(), wrap_nonce.as_slice()].concat())
        .await?;

    if updated {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(RcrtError::NotFound.into())
    }
}

async fn delete_secret(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    auth.require_role("curator")?;
    let deleted = state.db.delete_secret(auth.owner_id, id).await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(RcrtError::NotFound.into())
    }
}

#[derive(Debug, Deserialize)]
struct DecryptSecretReq {
    #[allow(dead_code)]
    reason: Option<String>,
}

async fn decrypt_secret(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(_req): Json<DecryptSecretReq>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (enc_blob, wrapped_key, nonce) = state
        .db
        .get_secret_material(auth.owner_id, id)
        .await?
        .ok_or(RcrtError::NotFound)?;

    if nonce.len() != 36 {
        return Err(RcrtError::Other(anyhow::anyhow!("corrupt secret nonce")).into());
    }
    let (value_nonce, wrap_nonce) = nonce.split_at(12);

    let kek = load_kek(&state.config)?;
    let wrap_cipher = XChaCha20Poly1305::new_from_slice(&kek).map_err(|e| RcrtError::Other(anyhow::anyhow!("{e}")))?;
    let dek = wrap_cipher
        .decrypt(XNonce::from_slice(wrap_nonce), wrapped_key.as_slice())
        .map_err(|e| RcrtError::Other(anyhow::anyhow!("key unwrap failed: {e}")))?;

    let cipher = Aes256Gcm::new_from_slice(&dek).map_err(|e| RcrtError::Other(anyhow::anyhow!("{e}")))?;
    let plaintext = cipher
        .decrypt(AesNonce::from_slice(value_nonce), enc_blob.as_slice())
        .map_err(|e| RcrtError::Other(anyhow::anyhow!("secret decryption failed: {e}")))?;

    state.db.audit_secret_decrypt(id, auth.agent_id).await?;

    Ok(Json(json!({"value": String::from_utf8_lossy(&plaintext)})))
}

// ---------------------------------------------------------------------
// Dead-letter queue
// ---------------------------------------------------------------------

async fn list_dlq(State(state): State<AppState>, auth: AuthContext) -> Result<Json<Vec<rcrt_core::models::DlqEntry>>, ApiError> {
    auth.require_role("curator")?;
    let entries = state.db.list_dlq(auth.owner_id).await?;
    Ok(Json(entries))
}

async fn delete_dlq(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    auth.require_role("curator")?;
    let deleted = state.db.delete_dlq(auth.owner_id, id).await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(RcrtError::NotFound.into())
    }
}

async fn retry_dlq(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    auth.require_role("curator")?;
    let entry = state.db.get_dlq(auth.owner_id, id).await?.ok_or(RcrtError::NotFound)?;

    let (_, url, secret) = state
        .db
        .active_webhooks_for_owner(auth.owner_id)
        .await?
        .into_iter()
        .find(|(agent_id, _, _)| *agent_id == entry.agent_id)
        .ok_or_else(|| RcrtError::BadRequest("no active webhook registered for this agent anymore".into()))?;

    let max_retries = state.config.webhook_max_retries;
    let db = state.db.clone();
    tokio::spawn(async move {
        webhooks::dispatch(&db, entry.owner_id, entry.agent_id, &url, &secret, &entry.envelope, max_retries).await;
    });

    state.db.delete_dlq(auth.owner_id, id).await?;
    Ok(StatusCode::ACCEPTED)
}
