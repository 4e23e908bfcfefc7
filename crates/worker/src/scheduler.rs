//! Cron wiring for the auto-close sweep

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::auto_close::AutoCloseSweeper;
use crate::config::WorkerConfig;

/// Register the sweep on its weekly schedule and start the scheduler
pub async fn start(
    config: &WorkerConfig,
    sweeper: Arc<AutoCloseSweeper>,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    let schedule = config.cron_expression();

    let job = Job::new_async_tz(schedule.as_str(), config.auto_close_timezone, move |_id, _lock| {
        let sweeper = sweeper.clone();
        Box::pin(async move {
            sweeper.tick().await;
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    tracing::info!(
        schedule = %schedule,
        timezone = %config.auto_close_timezone,
        inactivity_days = config.inactivity_days,
        "Auto-close sweep scheduled"
    );

    Ok(scheduler)
}
