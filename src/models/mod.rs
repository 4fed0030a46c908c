//! Data structures used throughout the application.

pub mod job;
mod datetime;
mod duration;
mod error;
mod state;

pub use self::datetime::DateTime;
pub use self::duration::Duration;
pub use self::error::{BrokerError, BrokerResult};
pub use self::state::ApplicationState;

use serde::Serialize;

/// Name of the queue holding jobs that permanently failed.
pub const FAILED_QUEUE_NAME: &str = "failed";

/// Summary of a single queue, as listed by introspection.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct QueueStats {
    pub connection: String,
    pub name: String,

    /// Number of jobs currently waiting in the queue.
    pub jobs: u64,

    /// Number of active workers listening on the queue. Not tracked for the failed queue.
    pub workers: Option<u64>,
}

/// General information about this broker, returned by `GET /info`.
#[derive(Debug, Serialize)]
pub struct BrokerInfo {
    pub version: &'static str,
    pub connections: Vec<String>,
    pub commit_mode: &'static str,
    pub scheduler_available: bool,
    pub show_admin_link: bool,
    pub worker_name: String,
    pub burst: bool,
}
