//! Handles to individual queues on a connection.

use std::fmt;
use std::sync::Arc;

use log::{debug, info};

use super::deferred::UnitOfWork;
use super::inline::JobFunctions;
use super::registry::Connection;
use crate::models::job::{JobCall, JobId, JobRecord};
use crate::models::{BrokerError, BrokerResult, Duration, FAILED_QUEUE_NAME};
use crate::storage::Storage;

/// Result of [`QueueHandle::enqueue`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Enqueued {
    /// Job was submitted, and is now visible to workers.
    Submitted(JobId),

    /// Job is held by the unit of work, and will only be submitted (and given an ID) once it
    /// commits.
    Deferred,
}

impl Enqueued {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Enqueued::Submitted(job_id) => Some(job_id),
            Enqueued::Deferred => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Enqueued::Deferred)
    }
}

/// A queue on a specific connection.
///
/// Handles are cheap to create and clone. They hold no resources of their own beyond a reference
/// to the shared connection.
#[derive(Clone, Debug)]
pub struct QueueHandle {
    name: String,
    connection: Arc<Connection>,
    default_timeout: Option<Duration>,
    is_async: bool,
    autocommit: bool,
    functions: Arc<JobFunctions>,
}

impl QueueHandle {
    pub(crate) fn new(
        name: String,
        connection: Arc<Connection>,
        default_timeout: Option<Duration>,
        is_async: bool,
        autocommit: bool,
        functions: Arc<JobFunctions>,
    ) -> Self {
        Self {
            name,
            connection,
            default_timeout,
            is_async,
            autocommit,
            functions,
        }
    }

    /// Check whether a queue name can be used.
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty() && !name.chars().any(|c| c.is_whitespace() || c == ':' || c == '/')
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn connection_name(&self) -> &str {
        self.connection.name()
    }

    /// Timeout applied to jobs that don't set their own.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Whether jobs are handed to workers, rather than run inline at submission.
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Whether `enqueue` submits straight away, rather than deferring to the unit of work.
    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    fn storage(&self) -> &Arc<dyn Storage> {
        self.connection.storage()
    }

    /// Enqueue a job.
    ///
    /// With autocommit on, the job is submitted immediately and its ID returned. Otherwise it's
    /// added to `ctx` and [`Enqueued::Deferred`] is returned: there's no job ID until `ctx` is
    /// committed, and if `ctx` is aborted the job is never submitted at all.
    pub async fn enqueue(&self, ctx: &mut UnitOfWork, call: JobCall) -> BrokerResult<Enqueued> {
        if self.autocommit {
            let job_id = self.enqueue_now(&call).await?;
            Ok(Enqueued::Submitted(job_id))
        } else {
            ctx.defer(self.clone(), call);
            Ok(Enqueued::Deferred)
        }
    }

    /// Submit a job to storage straight away, regardless of autocommit.
    ///
    /// Synchronous queues run the job here and store its outcome instead of queueing it.
    pub async fn enqueue_now(&self, call: &JobCall) -> BrokerResult<JobId> {
        let result = if self.is_async {
            self.storage().submit(&self.name, call, self.default_timeout).await
        } else {
            let outcome = self.functions.run(call)?;
            debug!("[{}] ran {} inline", self, call.func);
            self.storage().record_inline(&self.name, call, outcome).await
        };
        result.map_err(|err| BrokerError::submission(self.to_string(), err))
    }

    /// Number of jobs waiting in this queue.
    pub async fn jobs_count(&self) -> BrokerResult<u64> {
        self.storage().count(&self.name).await
    }

    /// Jobs waiting in this queue, oldest first.
    pub async fn jobs(&self) -> BrokerResult<Vec<JobRecord>> {
        self.storage().list_jobs(&self.name).await
    }

    /// Fetch a job that was enqueued on this queue. Jobs from other queues are `NoSuchJob`.
    pub async fn fetch_job(&self, job_id: &str) -> BrokerResult<JobRecord> {
        let job = self.storage().fetch_job(job_id).await?;
        if job.origin == self.name {
            Ok(job)
        } else {
            Err(BrokerError::NoSuchJob(job_id.to_owned()))
        }
    }

    pub async fn delete_job(&self, job_id: &str) -> BrokerResult<()> {
        if self.storage().delete_job(&self.name, job_id).await? {
            info!("[{}] [{}] deleted", self, job_id);
            Ok(())
        } else {
            Err(BrokerError::NoSuchJob(job_id.to_owned()))
        }
    }

    /// Move a failed job that came from this queue back onto it.
    pub async fn requeue_job(&self, job_id: &str) -> BrokerResult<()> {
        self.fetch_job(job_id).await?;
        self.storage().requeue_job(job_id).await
    }
}

impl fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.connection.name(), self.name)
    }
}

/// The queue jobs end up in once they've permanently failed.
#[derive(Clone, Debug)]
pub struct FailedQueueHandle {
    connection: Arc<Connection>,
}

impl FailedQueueHandle {
    pub(crate) fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    pub fn name(&self) -> &str {
        FAILED_QUEUE_NAME
    }

    pub fn connection_name(&self) -> &str {
        self.connection.name()
    }

    pub async fn jobs_count(&self) -> BrokerResult<u64> {
        self.connection.storage().count(FAILED_QUEUE_NAME).await
    }

    pub async fn jobs(&self) -> BrokerResult<Vec<JobRecord>> {
        self.connection.storage().list_jobs(FAILED_QUEUE_NAME).await
    }

    /// Fetch a job listed in the failed queue.
    pub async fn fetch_job(&self, job_id: &str) -> BrokerResult<JobRecord> {
        self.jobs()
            .await?
            .into_iter()
            .find(|job| job.id == job_id)
            .ok_or_else(|| BrokerError::NoSuchJob(job_id.to_owned()))
    }

    /// Move a failed job back onto the queue it came from.
    pub async fn requeue(&self, job_id: &str) -> BrokerResult<()> {
        self.connection.storage().requeue_job(job_id).await
    }

    /// Requeue every failed job, returning how many were requeued.
    pub async fn requeue_all(&self) -> BrokerResult<usize> {
        let jobs = self.jobs().await?;
        for job in &jobs {
            self.requeue(&job.id).await?;
        }
        if !jobs.is_empty() {
            info!("[{}] requeued {} jobs", self, jobs.len());
        }
        Ok(jobs.len())
    }

    pub async fn delete_job(&self, job_id: &str) -> BrokerResult<()> {
        if self.connection.storage().delete_job(FAILED_QUEUE_NAME, job_id).await? {
            Ok(())
        } else {
            Err(BrokerError::NoSuchJob(job_id.to_owned()))
        }
    }
}

impl fmt::Display for FailedQueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.connection.name(), FAILED_QUEUE_NAME)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn valid_names() {
        assert!(QueueHandle::is_valid_name("default"));
        assert!(QueueHandle::is_valid_name("high-priority_2"));
        assert!(QueueHandle::is_valid_name("emails.bulk"));
        assert!(!QueueHandle::is_valid_name(""));
        assert!(!QueueHandle::is_valid_name("with space"));
        assert!(!QueueHandle::is_valid_name("rq:queue"));
        assert!(!QueueHandle::is_valid_name("a/b"));
    }

    #[test]
    fn enqueued_job_id() {
        assert_eq!(Enqueued::Submitted("abc".to_owned()).job_id(), Some("abc"));
        assert_eq!(Enqueued::Deferred.job_id(), None);
        assert!(Enqueued::Deferred.is_deferred());
    }
}
