//! Periodic background cleanup: expired records, stale DLQ entries, idle agents.
//!
//! All schema/TTL policy lives in the `breadcrumbs` table itself (the `ttl`
//! column) rather than hardcoded here -- `db.rs::purge_expired` deletes
//! whatever has actually expired, so this runner stays domain-neutral.

use std::time::Duration;

use tokio::time::{interval, Instant};
use tracing::{error, info, warn};

use crate::config::HygieneConfig;
use crate::AppState;

#[derive(Debug, Clone, Default)]
pub struct HygieneStats {
    pub runs_completed: u64,
    pub total_records_purged: u64,
    pub total_dlq_purged: u64,
    pub last_run_duration_ms: u64,
    pub last_run_errors: u32,
}

pub struct HygieneRunner {
    state: AppState,
    config: HygieneConfig,
}

impl HygieneRunner {
    pub fn new(state: AppState, config: HygieneConfig) -> Self {
        Self { state, config }
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        if !self.config.enabled {
            info!("hygiene runner disabled via configuration");
            return tokio::spawn(async {});
        }

        info!(
            interval_seconds = self.config.run_interval_seconds,
            batch_size = self.config.batch_size,
            "hygiene runner starting"
        );

        tokio::spawn(async move { self.run_loop().await })
    }

    async fn run_loop(self) {
        let mut ticker = interval(Duration::from_secs(self.config.run_interval_seconds));

        loop {
            ticker.tick().await;
            let run_start = Instant::now();

            if let Err(e) = self.run_cycle().await {
                error!("hygiene cycle failed: {}", e);
                if let Ok(mut stats) = self.state.hygiene_stats.lock() {
                    stats.last_run_errors += 1;
                }
            }

            if let Ok(mut stats) = self.state.hygiene_stats.lock() {
                stats.runs_completed += 1;
                stats.last_run_duration_ms = run_start.elapsed().as_millis() as u64;
            }
        }
    }

    async fn run_cycle(&self) -> anyhow::Result<()> {
        let purged = self.state.db.purge_expired(self.config.batch_size).await?;
        let dlq_purged = self.state.db.purge_old_dlq(self.config.dlq_retention_days).await?;

        if !purged.is_empty() || dlq_purged > 0 {
            info!(
                purged = purged.len(),
                dlq_purged, "hygiene cycle purged expired records"
            );
        }

        if let Ok(mut stats) = self.state.hygiene_stats.lock() {
            stats.total_records_purged += purged.len() as u64;
            stats.total_dlq_purged += dlq_purged as u64;
        } else {
            warn!("hygiene stats mutex poisoned, skipping stats update this cycle");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zeroed() {
        let stats = HygieneStats::default();
        assert_eq!(stats.runs_completed, 0);
        assert_eq!(stats.total_records_purged, 0);
    }
}
