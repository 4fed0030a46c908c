//! Defines custom `DateTime` type.

use std::fmt;

use redis::{self, FromRedisValue, RedisResult, RedisWrite, ToRedisArgs};
use serde::{Deserialize, Serialize};

/// Thin wrapper around a `chrono::DateTime<Utc>`, stored in Redis as an RFC3339 string.
#[derive(Clone, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub struct DateTime(chrono::DateTime<chrono::Utc>);

impl DateTime {
    /// Get current UTC date/time.
    pub fn now() -> Self {
        DateTime(chrono::Utc::now())
    }

    /// Seconds since the Unix epoch, used as the score of scheduled jobs.
    pub fn timestamp(&self) -> i64 {
        self.0.timestamp()
    }

    /// Get this date/time moved forward by the given number of seconds.
    pub fn plus_seconds(&self, seconds: i64) -> Self {
        DateTime(self.0 + chrono::Duration::seconds(seconds))
    }

    /// Get this date/time moved forward by `duration`, or `None` if that's out of range.
    pub fn checked_plus(&self, duration: std::time::Duration) -> Option<Self> {
        let duration = chrono::Duration::from_std(duration).ok()?;
        self.0.checked_add_signed(duration).map(DateTime)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DateTime {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        DateTime(dt)
    }
}

impl FromRedisValue for DateTime {
    fn from_redis_value(v: &redis::Value) -> RedisResult<Self> {
        let dt: String = redis::from_redis_value(v)?;
        chrono::DateTime::parse_from_rfc3339(&dt)
            .map(|dt| DateTime(dt.with_timezone(&chrono::Utc)))
            .map_err(|_| (redis::ErrorKind::TypeError, "Invalid RFC3339 date/time").into())
    }
}

impl ToRedisArgs for DateTime {
    fn write_redis_args<W: ?Sized + RedisWrite>(&self, out: &mut W) {
        self.0.to_rfc3339().write_redis_args(out)
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn redis_string_parsing() {
        let v = redis::Value::Data(b"2024-02-01T10:00:00+00:00".to_vec());
        let dt: DateTime = redis::from_redis_value(&v).unwrap();
        assert_eq!(dt.timestamp(), 1706781600);

        let v = redis::Value::Data(b"yesterday".to_vec());
        assert!(redis::from_redis_value::<DateTime>(&v).is_err());
    }

    #[test]
    fn ordering() {
        let now = DateTime::now();
        assert!(now.plus_seconds(10) > now);
        assert_eq!(now.plus_seconds(10).timestamp() - now.timestamp(), 10);
        assert_eq!(now.checked_plus(std::time::Duration::from_secs(10)), Some(now.plus_seconds(10)));
        assert_eq!(now.checked_plus(std::time::Duration::from_secs(u64::MAX)), None);
    }
}
