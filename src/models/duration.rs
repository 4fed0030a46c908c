//! Defines custom `Duration` type.

use std::{fmt, time};

use redis::{self, FromRedisValue, RedisResult, RedisWrite, ToRedisArgs};
use serde::de::{Deserialize, Deserializer, Error};
use serde::ser::{Serialize, Serializer};

/// Duration to second resolution, thin wrapper around `time::Duration` allowing for custom
/// (de)serialisation.
///
/// Read from config files and JSON as a human readable time (e.g. "60s", "1m", "1h 30m").
/// Stored in Redis as whole seconds, which is how job timeouts are kept in job hashes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Duration(pub time::Duration);

impl Duration {
    pub fn from_secs(seconds: u64) -> Self {
        Duration(time::Duration::from_secs(seconds))
    }

    pub fn as_secs(&self) -> u64 {
        self.0.as_secs()
    }

    pub fn is_zero(&self) -> bool {
        self.0.as_nanos() == 0
    }
}

impl From<time::Duration> for Duration {
    fn from(duration: time::Duration) -> Self {
        Duration(duration)
    }
}

impl FromRedisValue for Duration {
    fn from_redis_value(v: &redis::Value) -> RedisResult<Self> {
        let seconds: u64 = redis::from_redis_value(v)?;
        Ok(Self::from_secs(seconds))
    }
}

impl ToRedisArgs for Duration {
    fn write_redis_args<W: ?Sized + RedisWrite>(&self, out: &mut W) {
        self.as_secs().write_redis_args(out)
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s: String = Deserialize::deserialize(deserializer)?;
        humantime::parse_duration(&s)
            .map(Duration)
            .map_err(D::Error::custom)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", humantime::format_duration(self.0))
    }
}
