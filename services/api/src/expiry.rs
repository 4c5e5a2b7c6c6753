//! Periodic sweep that expires inactive or overlong sessions

use anyhow::Result;
use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use voting::SessionEngine;

/// Schedule the sweep; the returned scheduler must be shut down on exit
pub async fn start_expiry_job(engine: SessionEngine, schedule: &str) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_async(schedule, move |_, _| {
        let engine = engine.clone();
        Box::pin(async move {
            match engine.expire_stale(Utc::now()).await {
                Ok(expired) if !expired.is_empty() => {
                    info!("Expired {} stale sessions: {:?}", expired.len(), expired);
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to sweep stale sessions: {}", e);
                }
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    info!("Started session expiry job with schedule: {}", schedule);
    Ok(scheduler)
}
