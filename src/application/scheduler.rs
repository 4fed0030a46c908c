//! Periodic release of scheduled jobs.

use std::future::Future;

use log::{error, info};

use super::queue::QueueHandle;
use crate::models::job::{JobCall, JobId};
use crate::models::{BrokerError, BrokerResult, DateTime, Duration};

/// Scheduler bound to one queue on one connection.
///
/// Jobs are scheduled onto the bound queue. Releasing due jobs moves every due job on the
/// connection onto whichever queue it was scheduled for, so a single scheduler per connection is
/// enough.
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    queue: QueueHandle,
    interval: Duration,
}

impl SchedulerHandle {
    pub(crate) fn new(queue: QueueHandle, interval: Duration) -> Self {
        Self { queue, interval }
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Hold a job until `at`, then release it onto this scheduler's queue.
    pub async fn schedule(&self, at: &DateTime, call: &JobCall) -> BrokerResult<JobId> {
        self.queue
            .connection()
            .storage()
            .schedule(self.queue.name(), call, at)
            .await
    }

    /// Hold a job for `delay`, then release it onto this scheduler's queue.
    ///
    /// Fails with `BadRequest` if `delay` is too large to represent as a date.
    pub async fn schedule_in(&self, delay: Duration, call: &JobCall) -> BrokerResult<JobId> {
        let at = match DateTime::now().checked_plus(delay.0) {
            Some(at) => at,
            None => return Err(BrokerError::bad_request(format!("Delay out of range: {}", delay))),
        };
        self.schedule(&at, call).await
    }

    /// Move every job that's now due onto its queue, returning their IDs.
    pub async fn enqueue_due(&self) -> BrokerResult<Vec<JobId>> {
        self.queue
            .connection()
            .storage()
            .enqueue_scheduled(&DateTime::now())
            .await
    }

    /// Release due jobs every interval until `shutdown` completes.
    ///
    /// Failures are logged, and the next tick tries again.
    pub async fn run_until<F: Future<Output = ()>>(&self, shutdown: F) -> BrokerResult<()> {
        if self.interval.is_zero() {
            return Err(BrokerError::bad_request("Scheduler interval must be greater than zero"));
        }

        info!(
            "[{}] Checking for scheduled jobs every {}",
            self.queue,
            humantime::format_duration(self.interval.0)
        );

        let mut interval = tokio::time::interval(self.interval.0);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("[{}] Scheduler stopped", self.queue);
                    return Ok(());
                }
                _ = interval.tick() => match self.enqueue_due().await {
                    Ok(released) if !released.is_empty() => {
                        info!("[{}] Released {} scheduled jobs", self.queue, released.len());
                    }
                    Ok(_) => (),
                    Err(err) => error!("[{}] Releasing scheduled jobs failed: {}", self.queue, err),
                },
            }
        }
    }
}

#[cfg(all(test, feature = "scheduler"))]
mod test {
    use super::*;
    use crate::application::factory::test_factory;

    #[tokio::test]
    async fn schedule_and_release() {
        let (factory, _) = test_factory();
        let scheduler = factory.get_scheduler("default", "reports", None).unwrap();
        assert_eq!(scheduler.interval(), Duration::from_secs(60));

        let due = scheduler.schedule(&DateTime::now().plus_seconds(-5), &JobCall::new("a")).await.unwrap();
        scheduler.schedule_in(Duration::from_secs(3600), &JobCall::new("b")).await.unwrap();
        assert_eq!(scheduler.queue().jobs_count().await.unwrap(), 0);

        assert_eq!(scheduler.enqueue_due().await.unwrap(), vec![due]);
        assert_eq!(scheduler.queue().jobs_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn run_until_shutdown() {
        let (factory, _) = test_factory();
        let scheduler = factory
            .get_scheduler("secondary", "default", Some(Duration(std::time::Duration::from_millis(10))))
            .unwrap();
        scheduler.schedule(&DateTime::now().plus_seconds(-1), &JobCall::new("a")).await.unwrap();

        scheduler
            .run_until(tokio::time::sleep(std::time::Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(scheduler.queue().jobs_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn huge_delay_rejected() {
        let (factory, _) = test_factory();
        let scheduler = factory.get_scheduler("default", "reports", None).unwrap();

        let result = scheduler.schedule_in(Duration::from_secs(u64::MAX), &JobCall::new("a")).await;
        assert!(matches!(result, Err(BrokerError::BadRequest(_))));
        assert!(scheduler.enqueue_due().await.unwrap().is_empty());
        assert_eq!(scheduler.queue().jobs_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_interval_rejected() {
        let (factory, _) = test_factory();
        let scheduler = factory.get_scheduler("default", "default", Some(Duration::from_secs(0))).unwrap();
        assert!(scheduler.run_until(async {}).await.is_err());
    }
}
