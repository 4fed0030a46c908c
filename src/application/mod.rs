//! Main application logic, generally reached through a [`QueueFactory`].

mod deferred;
mod factory;
mod inline;
mod queue;
mod registry;
mod scheduler;
mod stats;

pub use self::deferred::{BufferState, DeferredBuffer, DeferredItem, FlushPolicy, FlushReport, UnitOfWork};
pub use self::factory::{split_queue_name, QueueFactory, QueueOptions, DEFAULT_CONNECTION, DEFAULT_QUEUE};
pub use self::inline::JobFunctions;
pub use self::queue::{Enqueued, FailedQueueHandle, QueueHandle};
pub use self::registry::{
    CacheClients, Connection, ConnectionRegistry, Connector, Endpoint, MemoryConnector, RedisConnector,
};
pub use self::scheduler::SchedulerHandle;
pub use self::stats::queue_stats;
