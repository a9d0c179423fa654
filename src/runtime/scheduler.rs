//! Background job service
//!
//! Drives the stuck-entity scan and the continuation sweep on fixed
//! intervals using tokio-cron-scheduler repeated jobs. A tick that fires while
//! the previous pass of the same job is still running is skipped.

use crate::runtime::continuation::ContinuationScheduler;
use crate::runtime::scanner::StuckEntityScanner;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

pub struct BackgroundJobs {
    scheduler: Arc<RwLock<JobScheduler>>,
    job_uuids: Vec<Uuid>,
    scanner: Arc<StuckEntityScanner>,
    continuations: Arc<ContinuationScheduler>,
    scan_interval: Duration,
    sweep_interval: Duration,
}

impl BackgroundJobs {
    pub async fn new(
        scanner: Arc<StuckEntityScanner>,
        continuations: Arc<ContinuationScheduler>,
        scan_interval: Duration,
        sweep_interval: Duration,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            job_uuids: Vec::new(),
            scanner,
            continuations,
            scan_interval,
            sweep_interval,
        })
    }

    /// Register the scan and sweep jobs and start ticking
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(
            "⏰ Starting background jobs (scan every {:?}, sweep every {:?})",
            self.scan_interval,
            self.sweep_interval
        );

        let scan_job = Self::scan_job(Arc::clone(&self.scanner), self.scan_interval)?;
        let sweep_job = Self::sweep_job(Arc::clone(&self.continuations), self.sweep_interval)?;

        {
            let scheduler = self.scheduler.write().await;
            self.job_uuids.push(scheduler.add(scan_job).await?);
            self.job_uuids.push(scheduler.add(sweep_job).await?);
            scheduler.start().await?;
        }

        tracing::info!("✅ Background jobs started");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("⏹️ Stopping background jobs");

        {
            let scheduler = self.scheduler.read().await;
            for uuid in self.job_uuids.drain(..) {
                if let Err(e) = scheduler.remove(&uuid).await {
                    tracing::warn!("⚠️ Failed to remove job {} from scheduler: {}", uuid, e);
                }
            }
        }

        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.shutdown().await?;
        }

        tracing::info!("✅ Background jobs stopped");
        Ok(())
    }

    fn scan_job(scanner: Arc<StuckEntityScanner>, every: Duration) -> Result<Job> {
        let running = Arc::new(Mutex::new(()));
        let job = Job::new_repeated_async(every, move |_uuid, _l| {
            let scanner = Arc::clone(&scanner);
            let running = Arc::clone(&running);
            Box::pin(async move {
                let Ok(_guard) = running.try_lock() else {
                    tracing::debug!("⏭️ Previous scan still running, skipping tick");
                    return;
                };
                let report = scanner.scan().await;
                tracing::debug!(?report, "🔔 Scan tick");
            })
        })?;
        Ok(job)
    }

    fn sweep_job(continuations: Arc<ContinuationScheduler>, every: Duration) -> Result<Job> {
        let running = Arc::new(Mutex::new(()));
        let job = Job::new_repeated_async(every, move |_uuid, _l| {
            let continuations = Arc::clone(&continuations);
            let running = Arc::clone(&running);
            Box::pin(async move {
                let Ok(_guard) = running.try_lock() else {
                    tracing::debug!("⏭️ Previous sweep still running, skipping tick");
                    return;
                };
                match continuations.sweep().await {
                    Ok(report) => tracing::debug!(?report, "🔔 Sweep tick"),
                    Err(e) => tracing::error!("❌ Continuation sweep failed: {}", e),
                }
            })
        })?;
        Ok(job)
    }
}
