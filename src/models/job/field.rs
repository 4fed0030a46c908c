use redis::{self, RedisWrite, ToRedisArgs};
use std::fmt;

const DATA_FIELD: &str = "data";
const ORIGIN_FIELD: &str = "origin";
const STATUS_FIELD: &str = "status";
const DESCRIPTION_FIELD: &str = "description";
const CREATED_AT_FIELD: &str = "created_at";
const ENQUEUED_AT_FIELD: &str = "enqueued_at";
const ENDED_AT_FIELD: &str = "ended_at";
const TIMEOUT_FIELD: &str = "timeout";
const RESULT_FIELD: &str = "result";
const EXC_INFO_FIELD: &str = "exc_info";

/// Fields of a job hash in Redis.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Field {
    /// JSON encoded function name and arguments.
    Data,
    /// Name of the queue the job was enqueued on.
    Origin,
    Status,
    Description,
    CreatedAt,
    EnqueuedAt,
    EndedAt,
    Timeout,
    /// JSON encoded return value, for finished jobs.
    Result,
    /// Error text, for failed jobs.
    ExcInfo,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl AsRef<str> for Field {
    fn as_ref(&self) -> &str {
        match self {
            Field::Data        => DATA_FIELD,
            Field::Origin      => ORIGIN_FIELD,
            Field::Status      => STATUS_FIELD,
            Field::Description => DESCRIPTION_FIELD,
            Field::CreatedAt   => CREATED_AT_FIELD,
            Field::EnqueuedAt  => ENQUEUED_AT_FIELD,
            Field::EndedAt     => ENDED_AT_FIELD,
            Field::Timeout     => TIMEOUT_FIELD,
            Field::Result      => RESULT_FIELD,
            Field::ExcInfo     => EXC_INFO_FIELD,
        }
    }
}

impl ToRedisArgs for Field {
    fn write_redis_args<W: ?Sized + RedisWrite>(&self, out: &mut W) {
        self.as_ref().write_redis_args(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hash_field_names() {
        assert_eq!(Field::CreatedAt.to_string(), "created_at");
        assert_eq!(Field::ExcInfo.as_ref(), "exc_info");
        assert_eq!(redis::cmd("HGET").arg("k").arg(Field::Origin).get_packed_command(),
                   redis::cmd("HGET").arg("k").arg("origin").get_packed_command());
    }
}
