//! Server-sent-events bridge: subscribes to the change fabric for one owner
//! and forwards matching envelopes, plus a heartbeat so idle connections
//! don't get reaped by intermediate proxies. Ported from the teacher's
//! `sse_stream`; non-`nats` builds return 503 since there is no bus to
//! subscribe to. The `nats` crate's subscriptions are blocking iterators, so
//! each one is bridged onto a background thread that forwards onto an
//! unbounded channel, same as the teacher's own bridge.

use axum::response::sse::{Event, KeepAlive, Sse};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[cfg(feature = "nats")]
pub fn stream_for_owner(
    nats_conn: nats::Connection,
    owner_id: Uuid,
    agent_id: Option<Uuid>,
) -> anyhow::Result<Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>>> {
    use tokio::sync::mpsc;

    let (tx, rx) = mpsc::unbounded_channel::<Event>();

    let updates = nats_conn.subscribe("bc.*.updated")?;
    let tx_updates = tx.clone();
    std::thread::spawn(move || {
        for msg in updates.messages() {
            if let Ok(envelope) = serde_json::from_slice::<serde_json::Value>(&msg.data) {
                let matches_owner = envelope
                    .get("owner")
                    .and_then(|v| v.as_str())
                    .map(|s| s == owner_id.to_string())
                    .unwrap_or(false);
                if matches_owner {
                    if let Ok(data) = serde_json::to_string(&envelope) {
                        if tx_updates.send(Event::default().event("breadcrumb").data(data)).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });

    if let Some(agent_id) = agent_id {
        let subject = format!("agents.{agent_id}.events");
        let agent_events = nats_conn.subscribe(&subject)?;
        let tx_events = tx.clone();
        std::thread::spawn(move || {
            for msg in agent_events.messages() {
                if let Ok(text) = String::from_utf8(msg.data) {
                    if tx_events.send(Event::default().event("agent").data(text)).is_err() {
                        break;
                    }
                }
            }
        });
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            interval.tick().await;
            if tx.send(Event::default().event("ping").data("")).is_err() {
                break;
            }
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(Ok);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
