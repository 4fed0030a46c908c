//! Adapters to the durable job store that queues are backed by.
//!
//! The broker never owns job storage itself, it only calls into a [`Storage`] implementation
//! that's shared by every queue on the same connection.

mod keys;
mod memory;
mod redis_storage;

pub use self::memory::MemoryStorage;
pub use self::redis_storage::RedisStorage;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use crate::models::job::{JobCall, JobId, JobRecord};
use crate::models::{BrokerResult, DateTime, Duration};

/// Outcome of running a job inline, recorded by [`Storage::record_inline`].
pub type InlineOutcome = Result<serde_json::Value, String>;

/// Operations the broker needs from a job store.
#[async_trait]
pub trait Storage: Send + Sync + fmt::Debug {
    /// Push a new job onto the named queue, returning its ID.
    async fn submit(
        &self,
        queue: &str,
        call: &JobCall,
        default_timeout: Option<Duration>,
    ) -> BrokerResult<JobId>;

    /// Number of jobs currently waiting in the named queue.
    async fn count(&self, queue: &str) -> BrokerResult<u64>;

    /// Jobs currently waiting in the named queue, in queue order.
    async fn list_jobs(&self, queue: &str) -> BrokerResult<Vec<JobRecord>>;

    async fn fetch_job(&self, job_id: &str) -> BrokerResult<JobRecord>;

    /// Delete a job belonging to the named queue, removing it from its origin queue and the
    /// failed queue.
    ///
    /// A job belongs to its origin queue, and to the failed queue while it's listed there.
    /// Returns false if no such job belongs to `queue`.
    async fn delete_job(&self, queue: &str, job_id: &str) -> BrokerResult<bool>;

    /// Move a job from the failed queue back onto the queue it originally came from.
    async fn requeue_job(&self, job_id: &str) -> BrokerResult<()>;

    /// Count of active workers per queue name.
    async fn worker_queue_names(&self) -> BrokerResult<HashMap<String, u64>>;

    /// Store a job that was already run inline, without queueing it.
    ///
    /// Failed jobs end up in the failed queue, just as if a worker had run them.
    async fn record_inline(
        &self,
        queue: &str,
        call: &JobCall,
        outcome: InlineOutcome,
    ) -> BrokerResult<JobId>;

    /// Hold a job until `at`, after which `enqueue_scheduled` releases it onto `queue`.
    async fn schedule(&self, queue: &str, call: &JobCall, at: &DateTime) -> BrokerResult<JobId>;

    /// Release every scheduled job due at or before `now`, returning their IDs.
    async fn enqueue_scheduled(&self, now: &DateTime) -> BrokerResult<Vec<JobId>>;

    async fn ping(&self) -> BrokerResult<()>;
}

/// Generate a new unique job ID.
pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}
