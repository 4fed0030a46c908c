//! Creates queue handles bound to named connections.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::debug;

use super::deferred::{FlushPolicy, UnitOfWork};
use super::inline::JobFunctions;
use super::queue::{Enqueued, FailedQueueHandle, QueueHandle};
use super::registry::ConnectionRegistry;
use super::scheduler::SchedulerHandle;
use crate::config::{Config, RqConfig};
use crate::models::job::JobCall;
use crate::models::{BrokerError, BrokerResult, Duration};

/// Connection used when none is named.
pub const DEFAULT_CONNECTION: &str = "default";

/// Queue used when none is named.
pub const DEFAULT_QUEUE: &str = "default";

/// Per-queue overrides of connection and global defaults.
#[derive(Clone, Debug, Default)]
pub struct QueueOptions {
    /// Timeout for jobs that don't set their own.
    pub default_timeout: Option<Duration>,

    /// Overrides the connection's `async` setting.
    pub is_async: Option<bool>,

    /// Overrides the global commit mode.
    pub autocommit: Option<bool>,
}

/// Entry point for getting queues. Cheap to clone, and safe to share between requests.
#[derive(Clone, Debug)]
pub struct QueueFactory {
    registry: Arc<ConnectionRegistry>,
    functions: Arc<JobFunctions>,
    autocommit: bool,
    flush_policy: FlushPolicy,
    scheduler_interval: Duration,
    scheduler_available: bool,
}

impl QueueFactory {
    pub fn new(registry: ConnectionRegistry, config: &RqConfig) -> Self {
        let scheduler_available = cfg!(feature = "scheduler");
        debug!(
            "Queue factory: {} connections, commit mode {}, scheduler {}",
            registry.len(),
            config.commit_mode.as_str(),
            if scheduler_available { "available" } else { "unavailable" }
        );

        Self {
            registry: Arc::new(registry),
            functions: Arc::new(JobFunctions::new()),
            autocommit: config.commit_mode.autocommit(),
            flush_policy: config.flush_policy,
            scheduler_interval: config.scheduler_interval,
            scheduler_available,
        }
    }

    /// Connect to every configured Redis connection and build a factory for them.
    pub fn from_config(config: &Config) -> BrokerResult<Self> {
        let registry = ConnectionRegistry::from_config(config)?;
        Ok(Self::new(registry, &config.rq))
    }

    /// Functions available to synchronous queues.
    pub fn with_functions(mut self, functions: JobFunctions) -> Self {
        self.functions = Arc::new(functions);
        self
    }

    /// Make the scheduler unavailable, even if it was built in.
    pub fn without_scheduler(mut self) -> Self {
        self.scheduler_available = false;
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Global default for whether queues submit jobs immediately.
    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        self.flush_policy
    }

    pub fn scheduler_available(&self) -> bool {
        self.scheduler_available
    }

    /// Start a new unit of work using the configured flush policy.
    pub fn unit_of_work(&self) -> UnitOfWork {
        UnitOfWork::new(self.flush_policy)
    }

    /// Get a queue on the named connection.
    ///
    /// `async` comes from the options if set, then from the connection. `autocommit` comes from
    /// the options if set, then from the global commit mode.
    pub fn get_queue(
        &self,
        name: &str,
        connection_name: &str,
        options: &QueueOptions,
    ) -> BrokerResult<QueueHandle> {
        if !QueueHandle::is_valid_name(name) {
            return Err(BrokerError::bad_request(format!("Invalid queue name: '{}'", name)));
        }

        let connection = self.registry.connection(connection_name)?;
        let is_async = options.is_async.unwrap_or_else(|| connection.is_async());
        let autocommit = options.autocommit.unwrap_or(self.autocommit);

        Ok(QueueHandle::new(
            name.to_owned(),
            connection,
            options.default_timeout,
            is_async,
            autocommit,
            self.functions.clone(),
        ))
    }

    /// Get a queue on the default connection, with default options.
    pub fn queue(&self, name: &str) -> BrokerResult<QueueHandle> {
        self.get_queue(name, DEFAULT_CONNECTION, &QueueOptions::default())
    }

    /// Get several queues, which must all share one connection.
    ///
    /// Names may be qualified with a connection, as `"<connection>.<queue>"`. Unqualified names
    /// use the default connection. With no names at all, returns the default queue.
    pub fn get_queues(&self, names: &[&str], autocommit: Option<bool>) -> BrokerResult<Vec<QueueHandle>> {
        let options = QueueOptions {
            autocommit,
            ..Default::default()
        };
        if names.is_empty() {
            return Ok(vec![self.get_queue(DEFAULT_QUEUE, DEFAULT_CONNECTION, &options)?]);
        }

        let mut connections = BTreeSet::new();
        let mut queues = Vec::with_capacity(names.len());
        for name in names {
            let (connection_name, queue_name) = split_queue_name(name);
            self.registry.resolve(connection_name)?;
            connections.insert(connection_name);
            queues.push(self.get_queue(queue_name, connection_name, &options)?);
        }

        if connections.len() > 1 {
            return Err(BrokerError::MixedConnections(
                connections.into_iter().map(str::to_owned).collect(),
            ));
        }
        Ok(queues)
    }

    pub fn get_failed_queue(&self, connection_name: &str) -> BrokerResult<FailedQueueHandle> {
        let connection = self.registry.connection(connection_name)?;
        Ok(FailedQueueHandle::new(connection))
    }

    /// Enqueue a job on the default queue.
    pub async fn enqueue(&self, ctx: &mut UnitOfWork, call: JobCall) -> BrokerResult<Enqueued> {
        self.queue(DEFAULT_QUEUE)?.enqueue(ctx, call).await
    }

    /// Get a scheduler for a queue, checking for due jobs every `interval` (or the configured
    /// default).
    ///
    /// Fails with `FeatureUnavailable` if scheduling isn't available in this build.
    pub fn get_scheduler(
        &self,
        connection_name: &str,
        queue_name: &str,
        interval: Option<Duration>,
    ) -> BrokerResult<SchedulerHandle> {
        if !self.scheduler_available {
            return Err(BrokerError::FeatureUnavailable("scheduler".to_owned()));
        }

        let queue = self.get_queue(queue_name, connection_name, &QueueOptions::default())?;
        Ok(SchedulerHandle::new(queue, interval.unwrap_or(self.scheduler_interval)))
    }
}

/// Split a possibly connection-qualified queue name into (connection, queue).
pub fn split_queue_name(name: &str) -> (&str, &str) {
    match name.find('.') {
        Some(pos) => (&name[..pos], &name[pos + 1..]),
        None => (DEFAULT_CONNECTION, name),
    }
}

/// Factory over three in-memory connections: "default" (db 0), "secondary" (db 1), and "sync"
/// (db 2, running jobs inline).
#[cfg(test)]
pub(crate) fn test_factory() -> (QueueFactory, super::registry::MemoryConnector) {
    use std::collections::HashMap;

    use super::registry::{CacheClients, MemoryConnector};
    use crate::config::ConnectionConfig;

    let connection = |db, is_async| ConnectionConfig {
        url: Some("redis://localhost:6379".to_owned()),
        db: Some(db),
        is_async: Some(is_async),
        ..Default::default()
    };

    let mut configs = HashMap::new();
    configs.insert("default".to_owned(), connection(0, true));
    configs.insert("secondary".to_owned(), connection(1, true));
    configs.insert("sync".to_owned(), connection(2, false));

    let connector = MemoryConnector::new();
    let registry = ConnectionRegistry::new(configs, &CacheClients::new(), &connector)
        .expect("test registry");
    (QueueFactory::new(registry, &RqConfig::default()), connector)
}
