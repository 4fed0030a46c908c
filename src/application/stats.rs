//! Queue statistics across every connection.

use log::debug;

use super::factory::QueueFactory;
use crate::models::{BrokerResult, QueueStats, FAILED_QUEUE_NAME};

/// Pending job and worker counts for every queue that has active workers, plus each connection's
/// failed queue.
///
/// Connections are listed in name order. Within a connection, queues are listed in name order,
/// followed by the failed queue.
pub async fn queue_stats(factory: &QueueFactory) -> BrokerResult<Vec<QueueStats>> {
    let registry = factory.registry();
    let mut stats = Vec::new();

    for name in registry.names() {
        let connection = registry.connection(name)?;
        let storage = connection.storage();

        let mut workers: Vec<(String, u64)> = storage.worker_queue_names().await?.into_iter().collect();
        workers.sort();
        debug!("[{}] {} queues with active workers", name, workers.len());

        for (queue, worker_count) in workers {
            let jobs = storage.count(&queue).await?;
            stats.push(QueueStats {
                connection: name.to_owned(),
                name: queue,
                jobs,
                workers: Some(worker_count),
            });
        }

        let failed = factory.get_failed_queue(name)?;
        stats.push(QueueStats {
            connection: name.to_owned(),
            name: FAILED_QUEUE_NAME.to_owned(),
            jobs: failed.jobs_count().await?,
            workers: None,
        });
    }

    Ok(stats)
}
