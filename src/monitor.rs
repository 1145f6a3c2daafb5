// src/monitor.rs
use crate::identity::HostIdentity;
use crate::metrics::{MetricSet, MetricsSource};
use crate::retry::is_connectivity_error;
use crate::schedule::PeriodicTask;
use crate::scorer::{RiskResult, RiskScorer};
use crate::store::{AdminId, NewSystem, SystemId, SystemStore, TelemetryStore};
use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of one sample-and-score cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub system_id: SystemId,
    pub metrics: MetricSet,
    pub result: RiskResult,
}

/// Samples host metrics, scores them and writes both to the store.
///
/// The first cycle also registers this host in the system registry when no
/// row exists for its address; the notification watcher waits on that row.
pub struct MetricsTask<S, M, R> {
    store: S,
    source: M,
    scorer: R,
    identity: HostIdentity,
    admin_id: AdminId,
    location: String,
    interval: Duration,
    system_id: Option<SystemId>,
}

impl<S, M, R> MetricsTask<S, M, R>
where
    S: SystemStore + TelemetryStore,
    M: MetricsSource,
    R: RiskScorer,
{
    pub fn new(
        store: S,
        source: M,
        scorer: R,
        identity: HostIdentity,
        admin_id: AdminId,
        location: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            source,
            scorer,
            identity,
            admin_id,
            location: location.into(),
            interval,
            system_id: None,
        }
    }

    pub fn system_id(&self) -> Option<SystemId> {
        self.system_id
    }

    /// Find this host's registry row, creating it on first sight.
    async fn ensure_registered(&mut self) -> Result<SystemId> {
        if let Some(id) = self.system_id {
            return Ok(id);
        }

        let ip = self.identity.ip_string();
        let system = match self.store.find_system_by_ip(&ip).await? {
            Some(system) => system,
            None => {
                let system = self
                    .store
                    .register_system(NewSystem {
                        name: self.identity.hostname.clone(),
                        location: self.location.clone(),
                        ip_address: ip.clone(),
                        admin_id: self.admin_id,
                    })
                    .await?;
                info!("Registered system {} as id {}", ip, system.id);
                system
            }
        };

        self.system_id = Some(system.id);
        Ok(system.id)
    }

    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let metrics = self.source.sample().await;
        let system_id = self.ensure_registered().await?;

        debug!(
            "Collected metrics: cpu={:.1}% mem={:.1}% disk={:.1}% latency={:.2}ms error_rate={:.4}",
            metrics.cpu_pct,
            metrics.mem_pct,
            metrics.disk_pct,
            metrics.net_latency,
            metrics.error_rate
        );

        let result = self.scorer.score(&metrics);

        self.store
            .insert_metrics(system_id, &metrics)
            .await
            .context("failed to save metrics")?;
        self.store
            .insert_prediction(system_id, &result, Utc::now())
            .await
            .context("failed to save prediction")?;

        log_prediction(&result);

        Ok(CycleReport {
            system_id,
            metrics,
            result,
        })
    }
}

fn log_prediction(result: &RiskResult) {
    let label = if result.is_risk { "HIGH RISK" } else { "NORMAL" };

    if !result.is_predictive() {
        warn!(
            "Prediction: {} | {:.2}% (fallback draw, not predictive)",
            label, result.probability
        );
        return;
    }

    if result.is_risk {
        warn!("High Downtime Risk Detected ({:.2}%)", result.probability);
    }
    info!("Prediction: {} | {:.2}%", label, result.probability);
}

impl<S, M, R> PeriodicTask for MetricsTask<S, M, R>
where
    S: SystemStore + TelemetryStore,
    M: MetricsSource,
    R: RiskScorer,
{
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn tick(&mut self) -> Duration {
        if let Err(e) = self.run_cycle().await {
            if is_connectivity_error(&e) {
                warn!("Store unreachable, skipping this sample: {:#}", e);
            } else {
                error!("Monitor Error: {:#}", e);
            }
        }
        self.interval
    }
}
