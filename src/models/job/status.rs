//! Defines structs used to represent the status of a job in Redis.

use std::fmt;
use std::str::FromStr;

use redis::{self, FromRedisValue, RedisWrite, ToRedisArgs};
use serde::{Deserialize, Serialize};

const QUEUED_STATUS: &str = "queued";
const STARTED_STATUS: &str = "started";
const FINISHED_STATUS: &str = "finished";
const FAILED_STATUS: &str = "failed";
const SCHEDULED_STATUS: &str = "scheduled";

/// Status of a job that exists in Redis, using the same strings as RQ workers.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Job is in a queue, waiting for a worker to start it.
    Queued,

    /// Job has been picked up by a worker.
    Started,

    /// Job ran to completion, either on a worker or inline.
    Finished,

    /// Job raised an error and was moved to the failed queue.
    Failed,

    /// Job is held by the scheduler until its release time.
    Scheduled,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl AsRef<str> for Status {
    fn as_ref(&self) -> &str {
        match self {
            Status::Queued    => QUEUED_STATUS,
            Status::Started   => STARTED_STATUS,
            Status::Finished  => FINISHED_STATUS,
            Status::Failed    => FAILED_STATUS,
            Status::Scheduled => SCHEDULED_STATUS,
        }
    }
}

impl FromStr for Status {
    type Err = ();

    fn from_str(s: &str) -> Result<Status, ()> {
        match s {
            QUEUED_STATUS    => Ok(Status::Queued),
            STARTED_STATUS   => Ok(Status::Started),
            FINISHED_STATUS  => Ok(Status::Finished),
            FAILED_STATUS    => Ok(Status::Failed),
            SCHEDULED_STATUS => Ok(Status::Scheduled),
            _ => Err(()),
        }
    }
}

impl ToRedisArgs for Status {
    fn write_redis_args<W: ?Sized + RedisWrite>(&self, out: &mut W) {
        self.as_ref().write_redis_args(out)
    }
}

impl FromRedisValue for Status {
    fn from_redis_value(v: &redis::Value) -> redis::RedisResult<Self> {
        let s = String::from_redis_value(v)?;
        Status::from_str(&s).map_err(|_| (redis::ErrorKind::TypeError, "Invalid job status").into())
    }
}
