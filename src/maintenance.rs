//! Periodic housekeeping: purge expired cache entries, drop idle rate buckets
//! and log gateway statistics.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::gateway::Gateway;

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_entries: usize,
    pub idle_buckets: usize,
}

/// Run one maintenance pass now.
pub async fn sweep(gateway: &Gateway, bucket_idle: Duration) -> SweepReport {
    let expired_entries = match gateway.cache().purge_expired().await {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "cache purge failed");
            0
        }
    };
    let idle_buckets = gateway.rate_limiter().prune_idle(bucket_idle);
    SweepReport {
        expired_entries,
        idle_buckets,
    }
}

/// Handle to a running maintenance task.
pub struct MaintenanceHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Token that stops the task when cancelled, for wiring into a wider
    /// shutdown signal.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task and wait for the current pass, if any, to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "maintenance task ended abnormally");
        }
    }
}

/// Spawn the maintenance loop. The first pass runs one `period` from now.
pub fn spawn_maintenance(gateway: Gateway, period: Duration, bucket_idle: Duration) -> MaintenanceHandle {
    let token = CancellationToken::new();
    let child = token.child_token();
    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(period_secs = period.as_secs(), "maintenance started");
        loop {
            tokio::select! {
                _ = child.cancelled() => break,
                _ = ticker.tick() => {
                    let report = sweep(&gateway, bucket_idle).await;
                    let stats = gateway.stats();
                    info!(
                        expired_entries = report.expired_entries,
                        idle_buckets = report.idle_buckets,
                        requests = stats.requests,
                        cache_hits = stats.cache_hits,
                        upstream_calls = stats.upstream_calls,
                        retries = stats.retries,
                        rate_limited = stats.rate_limited,
                        failures = stats.failures,
                        in_flight = stats.in_flight,
                        "maintenance pass"
                    );
                }
            }
        }
        debug!("maintenance stopped");
    });
    MaintenanceHandle { token, task }
}
