//! Signed webhook delivery with bounded exponential backoff, jittered, and a
//! dead-letter queue on exhaustion. Ported from the teacher's
//! `dispatch_webhook`, fixing the missing replay-protection header and the
//! drifted retry default.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::sync::OnceLock;
use uuid::Uuid;

use rcrt_core::db::Db;

type HmacSha256 = Hmac<Sha256>;

static DELIVERY_TOTAL: OnceLock<prometheus::IntCounterVec> = OnceLock::new();
static DELIVERY_DURATION: OnceLock<prometheus::HistogramVec> = OnceLock::new();

fn delivery_total() -> &'static prometheus::IntCounterVec {
    DELIVERY_TOTAL.get_or_init(|| {
        let c = prometheus::IntCounterVec::new(
            prometheus::Opts::new("webhook_delivery_total", "webhook deliveries by result"),
            &["result"],
        )
        .unwrap();
        prometheus::default_registry().register(Box::new(c.clone())).ok();
        c
    })
}

fn delivery_duration() -> &'static prometheus::HistogramVec {
    DELIVERY_DURATION.get_or_init(|| {
        let h = prometheus::HistogramVec::new(
            prometheus::HistogramOpts::new(
                "webhook_delivery_duration_seconds",
                "webhook delivery latency by result",
            ),
            &["result"],
        )
        .unwrap();
        prometheus::default_registry().register(Box::new(h.clone())).ok();
        h
    })
}

/// Delivers `body` to `url`, signing it and retrying with jittered backoff.
/// On exhaustion the envelope is written to the dead-letter queue for manual
/// or operator-triggered redelivery.
pub async fn dispatch(
    db: &Db,
    owner_id: Uuid,
    agent_id: Uuid,
    url: &str,
    secret: &str,
    body: &serde_json::Value,
    max_retries: usize,
) {
    let payload = serde_json::to_vec(body).expect("envelope always serializes");
    let client = reqwest::Client::new();

    let mut last_error = String::new();
    let mut last_status: Option<i32> = None;

    for attempt in 0..max_retries {
        let timestamp = chrono::Utc::now().timestamp().to_string();

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(&payload);
        let signature = hex::encode(mac.finalize().into_bytes());

        let start = std::time::Instant::now();
        let result = client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-RCRT-Signature", format!("sha256={signature}"))
            .header("X-RCRT-Timestamp", &timestamp)
            .body(payload.clone())
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                delivery_total().with_label_values(&["success"]).inc();
                delivery_duration()
                    .with_label_values(&["success"])
                    .observe(start.elapsed().as_secs_f64());
                return;
            }
            Ok(resp) => {
                last_status = Some(resp.status().as_u16() as i32);
                last_error = format!("http status {}", resp.status());
            }
            Err(e) => {
                last_error = e.to_string();
            }
        }

        delivery_total().with_label_values(&["retry"]).inc();
        delivery_duration()
            .with_label_values(&["retry"])
            .observe(start.elapsed().as_secs_f64());

        if attempt + 1 < max_retries {
            let base_ms = (1u64 << attempt.min(6)) * 250;
            let jitter_ms = rand::thread_rng().gen_range(0..=(base_ms / 4).max(1));
            tokio::time::sleep(std::time::Duration::from_millis(base_ms + jitter_ms)).await;
        }
    }

    delivery_total().with_label_values(&["failure"]).inc();
    tracing::warn!(%url, attempts = max_retries, error = %last_error, "webhook delivery exhausted, enqueuing to dlq");

    if let Err(e) = db
        .enqueue_dlq(owner_id, agent_id, url, body, last_status, &last_error, max_retries as i32)
        .await
    {
        tracing::error!(error = %e, "failed to enqueue webhook dlq entry");
    }
}
