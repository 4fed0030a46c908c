//! In-process job storage with the same semantics as the Redis storage.
//!
//! Suitable for tests and local development. Clones share the same underlying state, so a test
//! can keep a handle to a store that's been handed to a connection registry.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::Mutex;

use super::{new_job_id, InlineOutcome, Storage};
use crate::models::job::{JobCall, JobId, JobRecord, Status};
use crate::models::{BrokerError, BrokerResult, DateTime, Duration, FAILED_QUEUE_NAME};

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, VecDeque<JobId>>,
    jobs: HashMap<JobId, JobRecord>,
    scheduled: Vec<(i64, JobId)>,
    workers: Vec<String>,

    /// Queues whose submissions are rejected, once the given number more have been accepted.
    /// Used to exercise failure handling.
    rejecting: HashMap<String, usize>,

    /// Total number of successful `submit` calls.
    submissions: u64,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<State>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker under an RQ-style name, e.g. "default.1234".
    pub async fn register_worker(&self, name: &str) {
        self.state.lock().await.workers.push(name.to_owned());
    }

    /// Make every following submission to `queue` fail.
    pub async fn reject_submissions(&self, queue: &str) {
        self.reject_submissions_after(queue, 0).await;
    }

    /// Accept `accepted` more submissions to `queue`, then fail every one after that.
    pub async fn reject_submissions_after(&self, queue: &str, accepted: usize) {
        self.state.lock().await.rejecting.insert(queue.to_owned(), accepted);
    }

    /// Number of jobs successfully submitted so far, across all queues.
    pub async fn submissions(&self) -> u64 {
        self.state.lock().await.submissions
    }
}

impl State {
    fn push(&mut self, queue: &str, record: JobRecord) -> JobId {
        let job_id = record.id.clone();
        self.queues
            .entry(queue.to_owned())
            .or_default()
            .push_back(job_id.clone());
        self.jobs.insert(job_id.clone(), record);
        job_id
    }

    fn remove_from(&mut self, queue: &str, job_id: &str) -> bool {
        match self.queues.get_mut(queue) {
            Some(ids) => {
                let before = ids.len();
                ids.retain(|id| id != job_id);
                before != ids.len()
            }
            None => false,
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn submit(
        &self,
        queue: &str,
        call: &JobCall,
        default_timeout: Option<Duration>,
    ) -> BrokerResult<JobId> {
        let mut state = self.state.lock().await;
        if let Some(remaining) = state.rejecting.get_mut(queue) {
            if *remaining == 0 {
                return Err(BrokerError::internal(format!("queue '{}' is rejecting jobs", queue)));
            }
            *remaining -= 1;
        }

        let mut record = JobRecord::new(new_job_id(), queue, call, Status::Queued);
        if record.timeout.is_none() {
            record.timeout = default_timeout;
        }
        let job_id = state.push(queue, record);
        state.submissions += 1;
        info!("[memory:{}] [{}] enqueued", queue, job_id);
        Ok(job_id)
    }

    async fn count(&self, queue: &str) -> BrokerResult<u64> {
        let state = self.state.lock().await;
        Ok(state.queues.get(queue).map_or(0, |ids| ids.len() as u64))
    }

    async fn list_jobs(&self, queue: &str) -> BrokerResult<Vec<JobRecord>> {
        let state = self.state.lock().await;
        let jobs = match state.queues.get(queue) {
            Some(ids) => ids.iter().filter_map(|id| state.jobs.get(id).cloned()).collect(),
            None => Vec::new(),
        };
        Ok(jobs)
    }

    async fn fetch_job(&self, job_id: &str) -> BrokerResult<JobRecord> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| BrokerError::NoSuchJob(job_id.to_owned()))
    }

    async fn delete_job(&self, queue: &str, job_id: &str) -> BrokerResult<bool> {
        let mut state = self.state.lock().await;
        let origin = match state.jobs.get(job_id) {
            Some(job) => job.origin.clone(),
            None => return Ok(false),
        };
        let belongs = if queue == FAILED_QUEUE_NAME {
            state
                .queues
                .get(FAILED_QUEUE_NAME)
                .map_or(false, |ids| ids.iter().any(|id| id == job_id))
        } else {
            origin == queue
        };
        if !belongs {
            return Ok(false);
        }

        state.remove_from(&origin, job_id);
        state.remove_from(FAILED_QUEUE_NAME, job_id);
        state.jobs.remove(job_id);
        Ok(true)
    }

    async fn requeue_job(&self, job_id: &str) -> BrokerResult<()> {
        let mut state = self.state.lock().await;
        let origin = match state.jobs.get(job_id) {
            Some(job) => job.origin.clone(),
            None => return Err(BrokerError::NoSuchJob(job_id.to_owned())),
        };
        if !state.remove_from(FAILED_QUEUE_NAME, job_id) {
            return Err(BrokerError::bad_request(format!(
                "Job {} is not in the failed queue",
                job_id
            )));
        }

        let mut record = match state.jobs.remove(job_id) {
            Some(record) => record,
            None => return Err(BrokerError::NoSuchJob(job_id.to_owned())),
        };
        record.status = Status::Queued;
        record.enqueued_at = Some(DateTime::now());
        record.ended_at = None;
        record.exc_info = None;
        state.push(&origin, record);
        Ok(())
    }

    async fn worker_queue_names(&self) -> BrokerResult<HashMap<String, u64>> {
        let state = self.state.lock().await;
        let mut counts = HashMap::new();
        for worker in &state.workers {
            let queue = worker.split('.').next().unwrap_or(worker);
            *counts.entry(queue.to_owned()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn record_inline(
        &self,
        queue: &str,
        call: &JobCall,
        outcome: InlineOutcome,
    ) -> BrokerResult<JobId> {
        let mut record = JobRecord::new(new_job_id(), queue, call, Status::Finished);
        record.ended_at = Some(DateTime::now());

        let mut state = self.state.lock().await;
        match outcome {
            Ok(result) => {
                record.result = Some(result);
                let job_id = record.id.clone();
                state.jobs.insert(job_id.clone(), record);
                Ok(job_id)
            }
            Err(exc_info) => {
                record.status = Status::Failed;
                record.exc_info = Some(exc_info);
                Ok(state.push(FAILED_QUEUE_NAME, record))
            }
        }
    }

    async fn schedule(&self, queue: &str, call: &JobCall, at: &DateTime) -> BrokerResult<JobId> {
        let record = JobRecord::new(new_job_id(), queue, call, Status::Scheduled);
        let job_id = record.id.clone();

        let mut state = self.state.lock().await;
        state.jobs.insert(job_id.clone(), record);
        state.scheduled.push((at.timestamp(), job_id.clone()));
        Ok(job_id)
    }

    async fn enqueue_scheduled(&self, now: &DateTime) -> BrokerResult<Vec<JobId>> {
        let mut state = self.state.lock().await;
        let now = now.timestamp();

        let (mut due, pending): (Vec<_>, Vec<_>) =
            state.scheduled.drain(..).partition(|(at, _)| *at <= now);
        state.scheduled = pending;
        due.sort_by_key(|(at, _)| *at);

        let mut released = Vec::with_capacity(due.len());
        for (_, job_id) in due {
            let origin = match state.jobs.get_mut(&job_id) {
                Some(job) => {
                    job.status = Status::Queued;
                    job.enqueued_at = Some(DateTime::now());
                    job.origin.clone()
                }
                None => continue,
            };
            state
                .queues
                .entry(origin)
                .or_default()
                .push_back(job_id.clone());
            debug!("[memory] [{}] released by scheduler", job_id);
            released.push(job_id);
        }
        Ok(released)
    }

    async fn ping(&self) -> BrokerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn submit_preserves_order() {
        let storage = MemoryStorage::new();
        let a = storage.submit("default", &JobCall::new("a"), None).await.unwrap();
        let b = storage.submit("default", &JobCall::new("b"), None).await.unwrap();

        assert_eq!(storage.count("default").await.unwrap(), 2);
        let ids: Vec<JobId> = storage
            .list_jobs("default")
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[tokio::test]
    async fn default_timeout_applies_when_unset() {
        let storage = MemoryStorage::new();
        let timeout = Some(Duration::from_secs(30));
        let id = storage.submit("default", &JobCall::new("a"), timeout).await.unwrap();
        assert_eq!(storage.fetch_job(&id).await.unwrap().timeout, timeout);

        let call = JobCall::new("b").timeout(Duration::from_secs(5));
        let id = storage.submit("default", &call, timeout).await.unwrap();
        assert_eq!(storage.fetch_job(&id).await.unwrap().timeout, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn failed_inline_job_can_be_requeued() {
        let storage = MemoryStorage::new();
        let id = storage
            .record_inline("default", &JobCall::new("a"), Err("boom".to_owned()))
            .await
            .unwrap();
        assert_eq!(storage.count(FAILED_QUEUE_NAME).await.unwrap(), 1);

        storage.requeue_job(&id).await.unwrap();
        assert_eq!(storage.count(FAILED_QUEUE_NAME).await.unwrap(), 0);
        assert_eq!(storage.count("default").await.unwrap(), 1);

        let job = storage.fetch_job(&id).await.unwrap();
        assert_eq!(job.status, Status::Queued);
        assert!(job.exc_info.is_none());

        // only failed jobs can be requeued
        assert!(matches!(storage.requeue_job(&id).await, Err(BrokerError::BadRequest(_))));
    }

    #[tokio::test]
    async fn scheduled_jobs_released_when_due() {
        let storage = MemoryStorage::new();
        let now = DateTime::now();
        let due = storage.schedule("default", &JobCall::new("a"), &now).await.unwrap();
        storage
            .schedule("default", &JobCall::new("b"), &now.plus_seconds(3600))
            .await
            .unwrap();

        assert_eq!(storage.enqueue_scheduled(&now).await.unwrap(), vec![due.clone()]);
        assert_eq!(storage.count("default").await.unwrap(), 1);
        assert!(storage.enqueue_scheduled(&now).await.unwrap().is_empty());
        assert_eq!(storage.fetch_job(&due).await.unwrap().status, Status::Queued);
    }

    #[tokio::test]
    async fn delete_job() {
        let storage = MemoryStorage::new();
        let id = storage.submit("default", &JobCall::new("a"), None).await.unwrap();
        assert!(storage.delete_job("default", &id).await.unwrap());
        assert!(!storage.delete_job("default", &id).await.unwrap());
        assert_eq!(storage.count("default").await.unwrap(), 0);
        assert!(matches!(storage.fetch_job(&id).await, Err(BrokerError::NoSuchJob(_))));
    }

    #[tokio::test]
    async fn delete_job_only_from_its_own_queue() {
        let storage = MemoryStorage::new();
        let id = storage.submit("emails", &JobCall::new("a"), None).await.unwrap();

        assert!(!storage.delete_job("other", &id).await.unwrap());
        assert!(!storage.delete_job(FAILED_QUEUE_NAME, &id).await.unwrap());
        assert_eq!(storage.count("emails").await.unwrap(), 1);
        assert_eq!(storage.list_jobs("emails").await.unwrap().len(), 1);

        assert!(storage.delete_job("emails", &id).await.unwrap());
        assert_eq!(storage.count("emails").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_failed_job_from_failed_queue() {
        let storage = MemoryStorage::new();
        let id = storage
            .record_inline("reports", &JobCall::new("a"), Err("boom".to_owned()))
            .await
            .unwrap();

        assert!(storage.delete_job(FAILED_QUEUE_NAME, &id).await.unwrap());
        assert_eq!(storage.count(FAILED_QUEUE_NAME).await.unwrap(), 0);
        assert!(matches!(storage.fetch_job(&id).await, Err(BrokerError::NoSuchJob(_))));
    }
}
