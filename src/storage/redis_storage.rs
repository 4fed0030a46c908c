//! Job storage in Redis, using the same key layout as RQ workers so they can pick jobs up.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use deadpool_redis::{Pool, Runtime};
use log::{debug, info, warn};
use redis::AsyncCommands;

use super::keys::{self, Keys};
use super::{new_job_id, InlineOutcome, Storage};
use crate::models::job::{Field, JobCall, JobId, JobRecord, Status};
use crate::models::{BrokerError, BrokerResult, DateTime, Duration, FAILED_QUEUE_NAME};
use crate::redis_utils::{query_atomic, vec_from_redis_pipe};
use crate::transaction_async;

/// Storage backed by a pool of connections to one Redis database.
#[derive(Clone)]
pub struct RedisStorage {
    pool: Pool,
    keys: Keys,

    /// Address the pool connects to, with any password removed. Only used for logging.
    label: String,
}

impl fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RedisStorage")
            .field("label", &self.label)
            .field("keys", &self.keys)
            .finish()
    }
}

impl RedisStorage {
    /// Create storage for the given connection info. No connection is opened until first use.
    pub fn connect(info: redis::ConnectionInfo) -> BrokerResult<Self> {
        let label = match &info.addr {
            redis::ConnectionAddr::Tcp(host, port) => format!("{}:{}/{}", host, port, info.redis.db),
            addr => format!("{:?}/{}", addr, info.redis.db),
        };
        let pool = deadpool_redis::Config::from_connection_info(info).create_pool(Some(Runtime::Tokio1))?;
        debug!("Created Redis pool for {}", label);
        Ok(Self::new(pool, label))
    }

    pub fn new<S: Into<String>>(pool: Pool, label: S) -> Self {
        Self {
            pool,
            keys: Keys::default(),
            label: label.into(),
        }
    }

    /// Use a different key namespace than the default "rq".
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.keys = Keys::new(namespace);
        self
    }

    async fn conn(&self) -> BrokerResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    /// Hash fields to write for a job record. Optional fields that aren't set are left out.
    fn job_fields(record: &JobRecord) -> Vec<(Field, String)> {
        let mut fields = vec![
            (Field::Data, record.call().data_json()),
            (Field::Origin, record.origin.clone()),
            (Field::Status, record.status.to_string()),
            (Field::Description, record.description.clone()),
            (Field::CreatedAt, record.created_at.to_string()),
        ];
        if let Some(enqueued_at) = &record.enqueued_at {
            fields.push((Field::EnqueuedAt, enqueued_at.to_string()));
        }
        if let Some(ended_at) = &record.ended_at {
            fields.push((Field::EndedAt, ended_at.to_string()));
        }
        if let Some(timeout) = &record.timeout {
            fields.push((Field::Timeout, timeout.as_secs().to_string()));
        }
        if let Some(result) = &record.result {
            fields.push((Field::Result, result.to_string()));
        }
        if let Some(exc_info) = &record.exc_info {
            fields.push((Field::ExcInfo, exc_info.clone()));
        }
        fields
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn submit(
        &self,
        queue: &str,
        call: &JobCall,
        default_timeout: Option<Duration>,
    ) -> BrokerResult<JobId> {
        let mut record = JobRecord::new(new_job_id(), queue, call, Status::Queued);
        if record.timeout.is_none() {
            record.timeout = default_timeout;
        }

        let job_key = self.keys.job_key(&record.id);
        let queue_key = self.keys.queue_key(queue);
        let mut conn = self.conn().await?;

        let mut pipeline = redis::pipe();
        pipeline
            .atomic()
            .hset_multiple(&job_key, &Self::job_fields(&record))
            .ignore()
            .sadd(&self.keys.queues_key, &queue_key)
            .ignore()
            .rpush(&queue_key, &record.id)
            .ignore();
        query_atomic::<_, ()>(&mut conn, &pipeline).await?;

        info!("[{}] [{}] enqueued", &queue_key, &job_key);
        Ok(record.id)
    }

    async fn count(&self, queue: &str) -> BrokerResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(self.keys.queue_key(queue)).await?)
    }

    async fn list_jobs(&self, queue: &str) -> BrokerResult<Vec<JobRecord>> {
        let mut conn = self.conn().await?;
        let job_ids: Vec<String> = conn.lrange(self.keys.queue_key(queue), 0, -1).await?;

        let mut pipeline = redis::pipe();
        for job_id in &job_ids {
            pipeline.hgetall(self.keys.job_key(job_id));
        }

        let hashes: Vec<HashMap<String, String>> = vec_from_redis_pipe(&mut conn, &pipeline).await?;
        let mut jobs = Vec::with_capacity(job_ids.len());
        for (job_id, hash) in job_ids.iter().zip(hashes) {
            // job may have been deleted between the two calls
            if hash.is_empty() {
                continue;
            }
            jobs.push(JobRecord::from_hash(job_id, hash)?);
        }
        Ok(jobs)
    }

    async fn fetch_job(&self, job_id: &str) -> BrokerResult<JobRecord> {
        let mut conn = self.conn().await?;
        let hash: HashMap<String, String> = conn.hgetall(self.keys.job_key(job_id)).await?;
        JobRecord::from_hash(job_id, hash)
    }

    async fn delete_job(&self, queue: &str, job_id: &str) -> BrokerResult<bool> {
        let job_key = self.keys.job_key(job_id);
        let failed_key = &self.keys.failed_queue_key;
        let mut conn = self.conn().await?;

        let deleted: bool = transaction_async!(&mut conn, &[job_key.as_str(), failed_key.as_str()][..], {
            let origin: Option<String> = conn.hget(&job_key, Field::Origin).await?;
            let belongs = match &origin {
                None => false,
                Some(_) if queue == FAILED_QUEUE_NAME => {
                    let failed_ids: Vec<String> = conn.lrange(failed_key, 0, -1).await?;
                    failed_ids.iter().any(|id| id == job_id)
                }
                Some(origin) => origin == queue,
            };

            match origin {
                // removed from wherever it's listed, not only the queue it was asked for by
                Some(origin) if belongs => {
                    let result: Option<()> = redis::pipe()
                        .atomic()
                        .lrem(self.keys.queue_key(&origin), 0, job_id)
                        .ignore()
                        .lrem(failed_key, 0, job_id)
                        .ignore()
                        .del(&job_key)
                        .ignore()
                        .query_async(&mut conn)
                        .await?;
                    result.map(|_| true)
                }
                _ => Some(false),
            }
        });

        if deleted {
            info!("[{}] deleted", &job_key);
        }
        Ok(deleted)
    }

    async fn requeue_job(&self, job_id: &str) -> BrokerResult<()> {
        let job_key = self.keys.job_key(job_id);
        let failed_key = &self.keys.failed_queue_key;
        let mut conn = self.conn().await?;

        let origin: String = transaction_async!(&mut conn, &[job_key.as_str(), failed_key.as_str()][..], {
            let origin: Option<String> = conn.hget(&job_key, Field::Origin).await?;
            let origin = match origin {
                Some(origin) => origin,
                None => return Err(BrokerError::NoSuchJob(job_id.to_owned())),
            };

            let failed_ids: Vec<String> = conn.lrange(failed_key, 0, -1).await?;
            if !failed_ids.iter().any(|id| id == job_id) {
                return Err(BrokerError::bad_request(format!(
                    "Job {} is not in the failed queue",
                    job_id
                )));
            }

            let queue_key = self.keys.queue_key(&origin);
            let result: Option<()> = redis::pipe()
                .atomic()
                .lrem(failed_key, 0, job_id)
                .ignore()
                .hset(&job_key, Field::Status, Status::Queued)
                .ignore()
                .hset(&job_key, Field::EnqueuedAt, DateTime::now())
                .ignore()
                .hdel(&job_key, &[Field::ExcInfo, Field::EndedAt][..])
                .ignore()
                .sadd(&self.keys.queues_key, &queue_key)
                .ignore()
                .rpush(&queue_key, job_id)
                .ignore()
                .query_async(&mut conn)
                .await?;
            result.map(|_| origin)
        });

        info!("[{}] requeued on '{}'", &job_key, origin);
        Ok(())
    }

    async fn worker_queue_names(&self) -> BrokerResult<HashMap<String, u64>> {
        let mut conn = self.conn().await?;
        let mut worker_keys = Vec::new();
        {
            let mut iter: redis::AsyncIter<String> = conn.scan_match(self.keys.worker_pattern()).await?;
            while let Some(key) = iter.next_item().await {
                worker_keys.push(key);
            }
        }

        let mut counts = HashMap::new();
        for key in &worker_keys {
            *counts.entry(keys::worker_queue_name(key).to_owned()).or_insert(0) += 1;
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
        match outcome {
            Ok(result) => record.result = Some(result),
            Err(exc_info) => {
                record.status = Status::Failed;
                record.exc_info = Some(exc_info);
            }
        }

        let job_key = self.keys.job_key(&record.id);
        let mut conn = self.conn().await?;
        let mut pipeline = redis::pipe();
        let pipe = pipeline
            .atomic()
            .hset_multiple(&job_key, &Self::job_fields(&record))
            .ignore();

        if record.status == Status::Failed {
            pipe.sadd(&self.keys.queues_key, &self.keys.failed_queue_key)
                .ignore()
                .rpush(&self.keys.failed_queue_key, &record.id)
                .ignore();
            warn!("[{}] failed inline: {}", &job_key, record.exc_info.as_deref().unwrap_or_default());
        }

        query_atomic::<_, ()>(&mut conn, pipe).await?;
        debug!("[{}] ran inline as {}", &job_key, record.status);
        Ok(record.id)
    }

    async fn schedule(&self, queue: &str, call: &JobCall, at: &DateTime) -> BrokerResult<JobId> {
        let record = JobRecord::new(new_job_id(), queue, call, Status::Scheduled);
        let job_key = self.keys.job_key(&record.id);
        let mut conn = self.conn().await?;

        let mut pipeline = redis::pipe();
        pipeline
            .atomic()
            .hset_multiple(&job_key, &Self::job_fields(&record))
            .ignore()
            .zadd(&self.keys.scheduled_jobs_key, &record.id, at.timestamp())
            .ignore();
        query_atomic::<_, ()>(&mut conn, &pipeline).await?;

        info!("[{}] scheduled for {}", &job_key, at);
        Ok(record.id)
    }

    async fn enqueue_scheduled(&self, now: &DateTime) -> BrokerResult<Vec<JobId>> {
        let scheduled_key = &self.keys.scheduled_jobs_key;
        let mut conn = self.conn().await?;
        let due: Vec<String> = conn.zrangebyscore(scheduled_key, "-inf", now.timestamp()).await?;

        let mut released = Vec::with_capacity(due.len());
        for job_id in due {
            let job_key = self.keys.job_key(&job_id);

            // the claim (ZREM) and the push happen in one MULTI, so a job is never in neither place
            let queue_key: Option<String> =
                transaction_async!(&mut conn, &[scheduled_key.as_str(), job_key.as_str()][..], {
                    let score: Option<f64> = conn.zscore(scheduled_key, &job_id).await?;
                    let origin: Option<String> = conn.hget(&job_key, Field::Origin).await?;

                    match (score, origin) {
                        // another scheduler already claimed it
                        (None, _) => Some(None),
                        (Some(_), None) => {
                            warn!("[{}] scheduled, but job no longer exists", &job_key);
                            let result: Option<()> = redis::pipe()
                                .atomic()
                                .zrem(scheduled_key, &job_id)
                                .ignore()
                                .query_async(&mut conn)
                                .await?;
                            result.map(|_| None)
                        }
                        (Some(_), Some(origin)) => {
                            let queue_key = self.keys.queue_key(&origin);
                            let result: Option<()> = redis::pipe()
                                .atomic()
                                .zrem(scheduled_key, &job_id)
                                .ignore()
                                .hset(&job_key, Field::Status, Status::Queued)
                                .ignore()
                                .hset(&job_key, Field::EnqueuedAt, DateTime::now())
                                .ignore()
                                .sadd(&self.keys.queues_key, &queue_key)
                                .ignore()
                                .rpush(&queue_key, &job_id)
                                .ignore()
                                .query_async(&mut conn)
                                .await?;
                            result.map(|_| Some(queue_key))
                        }
                    }
                });

            if let Some(queue_key) = queue_key {
                info!("[{}] [{}] released by scheduler", &queue_key, &job_key);
                released.push(job_id);
            }
        }
        Ok(released)
    }

    async fn ping(&self) -> BrokerResult<()> {
        let mut conn = self.conn().await?;
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        match reply.as_ref() {
            "PONG" => Ok(()),
            other => Err(BrokerError::internal(format!(
                "unexpected PING response from Redis: {}",
                other
            ))),
        }
    }
}
