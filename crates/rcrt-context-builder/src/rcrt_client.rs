/*!
 * RCRT API Client
 *
 * Handles:
 * - SSE event stream
 * - Record CRUD operations against the substrate's `/records` surface
 *
 * Token issuance is out of scope for the substrate (see §6), so this client
 * presents a pre-provisioned bearer token rather than negotiating one.
 */

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;
use futures::stream::StreamExt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreadcrumbEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub record_id: Uuid,
    pub owner: Uuid,
    pub schema_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub version: i32,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Mirrors `rcrt_core::models::BreadcrumbContextView` -- the `/records/{id}`
/// wire shape, `context` already passed through the transform engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreadcrumbContextView {
    pub id: Uuid,
    pub title: String,
    pub context: serde_json::Value,
    pub tags: Vec<String>,
    pub schema_name: Option<String>,
    pub version: i32,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub warning: Option<String>,
}

/// Lightweight row from `GET /records`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreadcrumbListItem {
    pub id: Uuid,
    pub schema_name: Option<String>,
    pub title: String,
    pub tags: Vec<String>,
    pub version: i32,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: Uuid,
    #[allow(dead_code)]
    version: i32,
}

pub struct RcrtClient {
    base_url: String,
    http_client: reqwest::Client,
    token: String,
}

impl RcrtClient {
    /// `token` is a pre-issued bearer token (empty string when the
    /// substrate is running with `AUTH_MODE=disabled`).
    pub async fn new(base_url: &str, token: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(RcrtClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            token: token.to_string(),
        })
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.token)
    }

    pub async fn start_sse_stream(
        &self,
        tx: tokio::sync::mpsc::UnboundedSender<BreadcrumbEvent>,
    ) -> Result<()> {
        let base_url = self.base_url.clone();
        let token = self.token.clone();

        tokio::spawn(async move {
            loop {
                match Self::sse_connection_loop(&base_url, &token, tx.clone()).await {
                    Ok(_) => warn!("SSE stream ended, reconnecting..."),
                    Err(e) => {
                        error!("SSE connection error: {}, reconnecting in 5s...", e);
                        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                    }
                }
            }
        });

        Ok(())
    }

    async fn sse_connection_loop(
        base_url: &str,
        token: &str,
        tx: tokio::sync::mpsc::UnboundedSender<BreadcrumbEvent>,
    ) -> Result<()> {
        let url = format!("{base_url}/events/stream");
        let response = reqwest::Client::new()
            .get(&url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("SSE connection failed: {}", response.status());
        }

        info!("SSE stream connected");

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline_pos) = buffer.find('\n') {
                let line = buffer[..newline_pos].trim().to_string();
                buffer = buffer[newline_pos + 1..].to_string();

                if let Some(data) = line.strip_prefix("data: ") {
                    if let Ok(event) = serde_json::from_str::<BreadcrumbEvent>(data) {
                        if event.event_type != "ping" && tx.send(event).is_err() {
                            warn!("event receiver dropped");
                            return Ok(());
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Client-side tag filtering beyond the server's single `tag=` query
    /// parameter -- the server only matches one tag per call.
    pub async fn search_breadcrumbs(
        &self,
        schema_name: &str,
        tags: Option<Vec<String>>,
    ) -> Result<Vec<BreadcrumbListItem>> {
        let mut url = format!("{}/records?schema_name={}", self.base_url, schema_name);
        if let Some(tag_list) = &tags {
            if let Some(first_tag) = tag_list.first() {
                url.push_str(&format!("&tag={first_tag}"));
            }
        }

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(vec![]);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("search failed: {} - {}", status, body);
        }

        let items: Vec<BreadcrumbListItem> = response.json().await?;

        Ok(items
            .into_iter()
            .filter(|b| {
                if let Some(required_tags) = &tags {
                    required_tags.iter().all(|t| b.tags.contains(t))
                } else {
                    true
                }
            })
            .collect())
    }

    pub async fn get_breadcrumb(&self, id: Uuid) -> Result<BreadcrumbContextView> {
        let url = format!("{}/records/{}", self.base_url, id);

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("get record failed: {} - {}", status, body);
        }

        response
            .json::<BreadcrumbContextView>()
            .await
            .context("failed to deserialize context view")
    }

    pub async fn create_breadcrumb(
        &self,
        schema_name: &str,
        title: &str,
        tags: Vec<String>,
        context: serde_json::Value,
    ) -> Result<Uuid> {
        let url = format!("{}/records", self.base_url);

        let payload = serde_json::json!({
            "schema_name": schema_name,
            "title": title,
            "tags": tags,
            "context": context,
            "visibility": "team",
            "sensitivity": "low",
        });

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", self.auth_header())
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("create record failed: {} - {}", status, body);
        }

        let created: CreateResponse = response.json().await?;
        Ok(created.id)
    }

    pub async fn update_breadcrumb(
        &self,
        id: Uuid,
        version: i32,
        context: serde_json::Value,
    ) -> Result<()> {
        let url = format!("{}/records/{}", self.base_url, id);
        let payload = serde_json::json!({ "context": context });

        let response = self
            .http_client
            .patch(&url)
            .header("Authorization", self.auth_header())
            .header("If-Match", version.to_string())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("update record failed: {} - {}", status, body);
        }

        Ok(())
    }
}
