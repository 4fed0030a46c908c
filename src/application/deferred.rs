//! Deferred job submission, tied to the success of a unit of work.
//!
//! Queues with autocommit disabled don't submit jobs when they're enqueued. Instead each job is
//! held in the [`UnitOfWork`] it was enqueued under, and only submitted once that unit of work
//! commits. If it's aborted (or dropped without finishing), the jobs are thrown away, and no
//! worker ever sees them.
//!
//! A unit of work is passed explicitly to every enqueue call, so two concurrent units of work
//! can never see each other's jobs.

use std::mem;

use log::{debug, error};
use serde::Deserialize;

use super::queue::QueueHandle;
use crate::models::job::{JobCall, JobId};
use crate::models::{BrokerError, BrokerResult};

/// What to do with the remaining jobs when a submission fails during a flush.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FlushPolicy {
    /// Keep submitting the remaining jobs, so one bad job doesn't hold up unrelated ones.
    Continue,

    /// Stop at the first failure. Remaining jobs are reported as skipped and never submitted.
    Abort,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        FlushPolicy::Continue
    }
}

/// A job held until its unit of work commits.
#[derive(Debug)]
pub struct DeferredItem {
    queue: QueueHandle,
    call: JobCall,
}

impl DeferredItem {
    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    pub fn call(&self) -> &JobCall {
        &self.call
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BufferState {
    Empty,
    Accumulating,
}

/// Ordered jobs waiting to be submitted.
///
/// Flushing or discarding always leaves the buffer empty again, ready for reuse.
#[derive(Debug, Default)]
pub struct DeferredBuffer {
    items: Vec<DeferredItem>,
}

impl DeferredBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold a job for later submission. Nothing is sent to storage.
    pub fn add(&mut self, queue: QueueHandle, call: JobCall) {
        if self.items.is_empty() {
            debug!("Deferring job submission until unit of work completes");
        }
        debug!("[{}] deferred {}", queue, call.func);
        self.items.push(DeferredItem { queue, call });
    }

    pub fn state(&self) -> BufferState {
        if self.items.is_empty() {
            BufferState::Empty
        } else {
            BufferState::Accumulating
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[DeferredItem] {
        &self.items
    }

    /// Submit every held job, in the order they were added.
    ///
    /// Each job goes straight to its queue's storage, whatever that queue's autocommit setting.
    /// Failures don't stop the flush unless `policy` says so. Either way, the report records what
    /// happened to every job.
    pub async fn flush(&mut self, policy: FlushPolicy) -> FlushReport {
        let items = mem::take(&mut self.items);
        let mut report = FlushReport::default();
        if items.is_empty() {
            return report;
        }

        debug!("Flushing {} deferred jobs", items.len());
        for (index, item) in items.into_iter().enumerate() {
            if policy == FlushPolicy::Abort && !report.failed.is_empty() {
                report.skipped.push(index);
                continue;
            }

            match item.queue.enqueue_now(&item.call).await {
                Ok(job_id) => report.submitted.push((index, job_id)),
                Err(err) => {
                    error!("[{}] deferred job {} ({}) not submitted: {}", item.queue, index, item.call.func, err);
                    report.failed.push((index, err));
                }
            }
        }

        debug!(
            "Flushed deferred jobs: {} submitted, {} failed, {} skipped",
            report.submitted.len(),
            report.failed.len(),
            report.skipped.len()
        );
        report
    }

    /// Drop every held job without submitting it, returning how many there were.
    pub fn discard(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        if count > 0 {
            debug!("Discarded {} deferred jobs", count);
        }
        count
    }
}

/// Outcome of flushing a deferred buffer. Indexes are positions in the buffer.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub submitted: Vec<(usize, JobId)>,
    pub failed: Vec<(usize, BrokerError)>,

    /// Jobs that were never attempted, because an earlier one failed under
    /// [`FlushPolicy::Abort`].
    pub skipped: Vec<usize>,
}

impl FlushReport {
    /// Whether every job was submitted.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    /// IDs of submitted jobs, in submission order.
    pub fn job_ids(&self) -> Vec<&str> {
        self.submitted.iter().map(|(_, job_id)| job_id.as_str()).collect()
    }

    /// Submitted job IDs, or the first failure if any job failed.
    pub fn into_result(self) -> BrokerResult<Vec<JobId>> {
        match self.failed.into_iter().next() {
            Some((_, err)) => Err(err),
            None => Ok(self.submitted.into_iter().map(|(_, job_id)| job_id).collect()),
        }
    }
}

/// Scope for deferred jobs, typically one per request.
///
/// Call [`commit`](UnitOfWork::commit) once the work has succeeded, or
/// [`abort`](UnitOfWork::abort) if it failed. Dropping a unit of work without doing either
/// discards its jobs.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    buffer: DeferredBuffer,
    policy: FlushPolicy,
}

impl UnitOfWork {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            buffer: DeferredBuffer::new(),
            policy,
        }
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    /// Jobs held so far.
    pub fn buffer(&self) -> &DeferredBuffer {
        &self.buffer
    }

    pub(crate) fn defer(&mut self, queue: QueueHandle, call: JobCall) {
        self.buffer.add(queue, call);
    }

    /// The work succeeded: submit every held job.
    pub async fn commit(mut self) -> FlushReport {
        let mut buffer = mem::take(&mut self.buffer);
        buffer.flush(self.policy).await
    }

    /// The work failed: drop every held job.
    pub fn abort(mut self) {
        self.buffer.discard();
    }

    /// Commit if `outcome` is a success, otherwise abort. Returns the flush report on commit.
    pub async fn finish<T, E>(self, outcome: &Result<T, E>) -> Option<FlushReport> {
        match outcome {
            Ok(_) => Some(self.commit().await),
            Err(_) => {
                self.abort();
                None
            }
        }
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            debug!("Unit of work dropped before it finished");
            self.buffer.discard();
        }
    }
}
