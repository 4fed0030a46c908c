//! Redis keys used by RQ workers, which the Redis storage reads and writes.

use crate::models::FAILED_QUEUE_NAME;

/// Namespace RQ workers keep all of their keys under.
pub const DEFAULT_NAMESPACE: &str = "rq";

/// Set of all queue keys. Used by workers and dashboards to discover queues without a scan.
const QUEUES_KEY: &str = "queues";

/// Prefix of the list of queued job IDs for a queue. Queue "foo" is stored as "queue:foo".
const QUEUE_PREFIX: &str = "queue:";

/// Prefix of job hashes. Job "abc" is stored as "job:abc".
const JOB_PREFIX: &str = "job:";

/// Prefix of worker registration keys. Each live worker holds one key "worker:<name>".
const WORKER_PREFIX: &str = "worker:";

/// Sorted set of scheduled job IDs, scored by the Unix time they're due.
const SCHEDULED_JOBS_KEY: &str = "scheduler:scheduled_jobs";

/// All key names for one namespace.
#[derive(Clone, Debug)]
pub struct Keys {
    pub queues_key: String,
    pub queue_prefix: String,
    pub job_prefix: String,
    pub worker_prefix: String,
    pub scheduled_jobs_key: String,
    pub failed_queue_key: String,
}

impl Keys {
    /// Build keys under the given namespace. If the namespace is empty, then no prefix is used.
    pub fn new(namespace: &str) -> Self {
        let ns = if namespace.is_empty() {
            "".to_owned()
        } else {
            format!("{}:", namespace)
        };

        Self {
            queues_key: ns.clone() + QUEUES_KEY,
            queue_prefix: ns.clone() + QUEUE_PREFIX,
            job_prefix: ns.clone() + JOB_PREFIX,
            worker_prefix: ns.clone() + WORKER_PREFIX,
            scheduled_jobs_key: ns.clone() + SCHEDULED_JOBS_KEY,
            failed_queue_key: format!("{}{}{}", ns, QUEUE_PREFIX, FAILED_QUEUE_NAME),
        }
    }

    pub fn queue_key(&self, queue: &str) -> String {
        format!("{}{}", self.queue_prefix, queue)
    }

    pub fn job_key(&self, job_id: &str) -> String {
        format!("{}{}", self.job_prefix, job_id)
    }

    /// Pattern matching every worker registration key.
    pub fn worker_pattern(&self) -> String {
        format!("{}*", self.worker_prefix)
    }
}

impl Default for Keys {
    fn default() -> Self {
        Keys::new(DEFAULT_NAMESPACE)
    }
}

/// Work out which queue a worker key belongs to.
///
/// Worker keys look like `rq:worker:<queue>.<suffix>`, the queue being everything after the last
/// `:` up to the first `.`.
pub fn worker_queue_name(worker_key: &str) -> &str {
    let name = worker_key.rsplit(':').next().unwrap_or(worker_key);
    name.split('.').next().unwrap_or(name)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_namespace() {
        let keys = Keys::default();
        assert_eq!(keys.queues_key, "rq:queues");
        assert_eq!(keys.queue_key("default"), "rq:queue:default");
        assert_eq!(keys.job_key("abc"), "rq:job:abc");
        assert_eq!(keys.worker_pattern(), "rq:worker:*");
        assert_eq!(keys.scheduled_jobs_key, "rq:scheduler:scheduled_jobs");
        assert_eq!(keys.failed_queue_key, "rq:queue:failed");
    }

    #[test]
    fn empty_namespace() {
        let keys = Keys::new("");
        assert_eq!(keys.queues_key, "queues");
        assert_eq!(keys.queue_key("default"), "queue:default");
        assert_eq!(keys.failed_queue_key, "queue:failed");
    }

    #[test]
    fn worker_names() {
        assert_eq!(worker_queue_name("rq:worker:default.4121"), "default");
        assert_eq!(worker_queue_name("rq:worker:high.host.12"), "high");
        assert_eq!(worker_queue_name("rq:worker:low"), "low");
    }
}
