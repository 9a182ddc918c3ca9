// ── Switchyard: Health Monitor ─────────────────────────────────────────────
// Two periodic loops: a probe loop that checks every enabled endpoint,
// and a daily retention loop that prunes old log rows. Probe ticks are
// skipped (not queued) when the previous tick is still in flight, so a
// stalled backend cannot pile up overlapping probe storms.

use crate::error::GatewayResult;
use crate::store::{ModelRecord, RegistryStore};
use futures::future::join_all;
use log::{debug, error, info, warn};
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Per-probe timeout.
const PROBE_TIMEOUT_SECS: u64 = 5;

/// How often the retention loop runs.
const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Health rows are kept this many days.
const HEALTH_RETENTION_DAYS: i64 = 7;

/// Request-log rows are kept this many days.
const REQUEST_RETENTION_DAYS: i64 = 30;

pub struct HealthMonitor {
    store: Arc<RegistryStore>,
    client: Client,
    interval: Duration,
    in_flight: Arc<AtomicBool>,
}

impl HealthMonitor {
    pub fn new(store: Arc<RegistryStore>, interval_ms: u64) -> Self {
        HealthMonitor {
            store,
            client: Client::builder()
                .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            interval: Duration::from_millis(interval_ms),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the probe loop.
    pub fn spawn(self) -> JoinHandle<()> {
        info!("[health] Probing every {:?}", self.interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;

                // Skip, never queue, when the previous tick still runs.
                if self.in_flight.swap(true, Ordering::SeqCst) {
                    warn!("[health] Previous probe tick still running, skipping");
                    continue;
                }
                if let Err(e) = self.probe_all().await {
                    error!("[health] Probe tick failed: {e}");
                }
                self.in_flight.store(false, Ordering::SeqCst);
            }
        })
    }

    /// Probe every enabled model concurrently and persist the outcomes.
    pub async fn probe_all(&self) -> GatewayResult<()> {
        let models = self.store.list_enabled_models()?;
        if models.is_empty() {
            return Ok(());
        }

        let probes = models.iter().map(|m| self.probe_one(m));
        let outcomes = join_all(probes).await;

        for (model, outcome) in models.iter().zip(outcomes) {
            match outcome {
                Ok(latency_ms) => {
                    debug!("[health] {} healthy ({latency_ms}ms)", model.id);
                    if let Err(e) = self.store.record_probe_success(&model.id, latency_ms) {
                        error!("[health] Failed to record success for {}: {e}", model.id);
                    }
                }
                Err(reason) => {
                    match self.store.record_probe_failure(&model.id, &reason) {
                        Ok(failures) => {
                            warn!("[health] {} failed probe ({failures} consecutive): {reason}", model.id)
                        }
                        Err(e) => error!("[health] Failed to record failure for {}: {e}", model.id),
                    }
                }
            }
        }
        Ok(())
    }

    /// One liveness probe: a short GET against the endpoint's model
    /// listing. Ok(latency) on any 2xx.
    async fn probe_one(&self, model: &ModelRecord) -> Result<i64, String> {
        let url = format!("{}/models", model.endpoint.trim_end_matches('/'));
        let started = Instant::now();
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => Ok(started.elapsed().as_millis() as i64),
            Ok(resp) => Err(format!("HTTP {}", resp.status().as_u16())),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Start the daily retention loop (7 days of health rows, 30 of request
/// rows). The first prune runs immediately at startup.
pub fn spawn_retention(store: Arc<RegistryStore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match store.prune_logs(HEALTH_RETENTION_DAYS, REQUEST_RETENTION_DAYS) {
                Ok((health, requests)) if health + requests > 0 => {
                    info!("[health] Retention pruned {health} health rows, {requests} request rows")
                }
                Ok(_) => {}
                Err(e) => error!("[health] Retention prune failed: {e}"),
            }
        }
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────
