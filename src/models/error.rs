//! Defines basic error and result types used throughout the application.

use std::{error::Error, fmt};

use redis::RedisError;

/// Result type used throughout the application.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Error type used throughout the application.
#[derive(Debug)]
pub enum BrokerError {
    /// Error occurred during interaction with Redis.
    Redis(RedisError),

    /// Error occurred while trying to get a pooled DB connection to Redis.
    RedisConnection(String),

    /// No connections were configured at all. Fatal at startup.
    MisconfiguredRegistry(String),

    /// A connection name was referenced that isn't in the registry.
    UnknownConnection(String),

    /// A multi-queue request resolved to more than one connection.
    MixedConnections(Vec<String>),

    /// An optional capability (e.g. the scheduler) isn't available in this build.
    FeatureUnavailable(String),

    /// A single job submission to storage failed.
    Submission {
        queue: String,
        source: Box<BrokerError>,
    },

    /// Operation attempted on job that does not exist.
    NoSuchJob(String),

    /// Inline execution requested for a function with no registered implementation.
    UnknownFunction(String),

    /// Could not complete request with given parameters.
    BadRequest(String),

    /// Internal application error.
    Internal(String),
}

impl BrokerError {
    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        BrokerError::BadRequest(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        BrokerError::Internal(msg.into())
    }

    /// Wrap an error raised while submitting a job to the given queue.
    pub fn submission<S: Into<String>>(queue: S, source: BrokerError) -> Self {
        BrokerError::Submission {
            queue: queue.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error comes from invalid configuration or a bad connection reference.
    ///
    /// These are surfaced to callers as-is and never retried.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            BrokerError::MisconfiguredRegistry(_)
                | BrokerError::UnknownConnection(_)
                | BrokerError::MixedConnections(_)
        )
    }
}

impl From<RedisError> for BrokerError {
    fn from(err: RedisError) -> Self {
        BrokerError::Redis(err)
    }
}

impl From<deadpool_redis::PoolError> for BrokerError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        BrokerError::RedisConnection(err.to_string())
    }
}

impl From<deadpool_redis::CreatePoolError> for BrokerError {
    fn from(err: deadpool_redis::CreatePoolError) -> Self {
        BrokerError::RedisConnection(err.to_string())
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BrokerError::Redis(err) => err.fmt(f),
            BrokerError::RedisConnection(msg) => write!(f, "Failed to connect to Redis: {}", msg),
            BrokerError::MisconfiguredRegistry(msg) => write!(f, "Improperly configured: {}", msg),
            BrokerError::UnknownConnection(name) => write!(f, "Unknown connection '{}'", name),
            BrokerError::MixedConnections(names) => write!(
                f,
                "Queues must share the same connection, got: {}",
                names.join(", ")
            ),
            BrokerError::FeatureUnavailable(feature) => write!(f, "{} is not available", feature),
            BrokerError::Submission { queue, source } => {
                write!(f, "Failed to enqueue job on '{}': {}", queue, source)
            }
            BrokerError::NoSuchJob(job_id) => write!(f, "Job with ID {} does not exist", job_id),
            BrokerError::UnknownFunction(name) => {
                write!(f, "No function registered under '{}'", name)
            }
            BrokerError::BadRequest(msg) | BrokerError::Internal(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error for BrokerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BrokerError::Redis(err) => Some(err),
            BrokerError::Submission { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
