//! Periodic jobs that run alongside the HTTP server.
//!
//! - **status check**: ask every active endpoint for the cloud status of its instances (answers
//!   arrive on the status callback), then stop whatever is over budget
//! - **scheduler**: fire due start, stop and terminate schedules
//! - **billing**: pull the current month's costs from the provisioning service, then stop
//!   whatever is over budget
//! - **request id cleanup**: drop request ids whose callback never arrived
//!
//! Every loop shares one [`CancellationToken`]; dropping [`BackgroundServices`] cancels it.

use crate::config::{Config, TaskConfig};
use crate::services::Services;
use chrono::Utc;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, instrument};

/// Handles of the running loops.
pub struct BackgroundServices {
    background_tasks: Vec<JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Spawn every loop enabled in `background_services`.
    pub fn start(services: Services, config: &Config, shutdown_token: CancellationToken) -> Self {
        let drop_guard = shutdown_token.clone().drop_guard();
        let tasks = &config.background_services;
        let service_token = config.provisioning.service_token.clone().unwrap_or_default();
        let mut background_tasks = Vec::new();

        if tasks.status_check.enabled {
            let services = services.clone();
            background_tasks.push(spawn_periodic("status_check", &tasks.status_check, shutdown_token.clone(), move || {
                let services = services.clone();
                async move { status_check_tick(&services).await }
            }));
        }

        if tasks.scheduler.enabled {
            let services = services.clone();
            background_tasks.push(spawn_periodic("scheduler", &tasks.scheduler, shutdown_token.clone(), move || {
                let services = services.clone();
                async move { scheduler_tick(&services).await }
            }));
        }

        if tasks.billing.enabled {
            let services = services.clone();
            background_tasks.push(spawn_periodic("billing", &tasks.billing, shutdown_token.clone(), move || {
                let services = services.clone();
                let token = service_token.clone();
                async move { billing_tick(&services, &token).await }
            }));
        }

        if tasks.request_id_cleanup.enabled {
            let services = services.clone();
            background_tasks.push(spawn_periodic(
                "request_id_cleanup",
                &tasks.request_id_cleanup,
                shutdown_token.clone(),
                move || {
                    let services = services.clone();
                    async move { request_id_cleanup_tick(&services).await }
                },
            ));
        }

        info!(count = background_tasks.len(), "Background services started");
        Self {
            background_tasks,
            shutdown_token,
            drop_guard: Some(drop_guard),
        }
    }

    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Run `tick` every `task.interval` until `shutdown` is cancelled. A failing tick is logged and
/// the loop carries on; ticks never overlap.
fn spawn_periodic<F, Fut>(name: &'static str, task: &TaskConfig, shutdown: CancellationToken, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    let period = task.interval;
    tokio::spawn(async move {
        info!(task = name, interval = ?period, "Starting background task");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(task = name, "Background task stopping");
                    break;
                }
                _ = interval.tick() => {
                    metrics::counter!("selfservice_background_ticks_total", "task" => name).increment(1);
                    if let Err(e) = tick().await {
                        metrics::counter!("selfservice_background_failures_total", "task" => name).increment(1);
                        error!(task = name, "Background task failed: {e:#}");
                    }
                }
            }
        }
    })
}

#[instrument(skip_all)]
pub async fn status_check_tick(services: &Services) -> anyhow::Result<()> {
    let requests = services.environment.request_status_check().await?;
    debug!(count = requests.len(), "Status checks dispatched");
    let stopped = services.environment.enforce_quotas().await?;
    if stopped > 0 {
        info!(stopped, "Stopped notebooks over budget");
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn scheduler_tick(services: &Services) -> anyhow::Result<()> {
    let now = Utc::now();
    let started = services.scheduler.run_start_jobs(now).await?;
    let stopped = services.scheduler.run_stop_jobs(now).await?;
    let terminated = services.scheduler.run_terminate_jobs(now).await?;
    if started + stopped + terminated > 0 {
        info!(started, stopped, terminated, "Scheduler jobs fired");
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn billing_tick(services: &Services, token: &str) -> anyhow::Result<()> {
    let rows = services.billing.collect_current_month(token).await?;
    debug!(rows, "Billing collected");
    let stopped = services.environment.enforce_quotas().await?;
    if stopped > 0 {
        info!(stopped, "Stopped notebooks over budget");
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn request_id_cleanup_tick(services: &Services) -> anyhow::Result<()> {
    let removed = services.dispatcher.registry.remove_expired().await?;
    if removed > 0 {
        debug!(removed, "Expired request ids removed");
    }
    Ok(())
}
