//! Miscellaneous Redis utilities and helper functions.

use redis::{
    aio::ConnectionLike, from_redis_value, ErrorKind, FromRedisValue, Pipeline, RedisError, RedisResult, Value,
};

/// Helper function for getting nested data structures from Redis pipelines.
///
/// Used for e.g. querying for vectors of tuples from:
/// pipe.hget(key1, [x, y, z])
///     .hget(key2, [x, y, z])
///     .hget(key3, [x, y, z])
///
/// let (a, b, c): Vec<(x_type, y_type, z_type)> = vec_from_redis_pipe(conn, pipe).await?;
pub async fn vec_from_redis_pipe<C: ConnectionLike, T: FromRedisValue>(
    conn: &mut C,
    pipe: &Pipeline,
) -> RedisResult<Vec<T>> {
    let values: Vec<Value> = pipe.query_async(conn).await?;
    let mut results = Vec::with_capacity(values.len());
    for v in values {
        results.push(from_redis_value::<T>(&v)?);
    }

    Ok(results)
}

/// Runs an atomic (MULTI/EXEC) pipeline outside of a WATCH transaction.
///
/// EXEC replies nil when a key watched on this connection changed, in which case nothing was
/// written. That's reported as an `ExecAbortError` rather than decoded as an empty success.
pub async fn query_atomic<C: ConnectionLike, T: FromRedisValue>(conn: &mut C, pipe: &Pipeline) -> RedisResult<T> {
    let result: Option<T> = pipe.query_async(conn).await?;
    result.ok_or_else(|| RedisError::from((ErrorKind::ExecAbortError, "transaction discarded by EXEC")))
}

/// Performs a WATCH/MULTI/EXEC transaction on an async connection.
///
/// The body must evaluate to an `Option<T>`. `Some(T)` means that the transaction succeeded and
/// the loop terminates with that value. `None` means that a watched key was modified before EXEC,
/// and the body is run again.
///
/// The body runs inside an async block, so `?` and `return Err(..)` leave the body rather than
/// the enclosing function. Keys are unwatched before the error is propagated, so the connection
/// goes back to its pool clean.
#[macro_export]
macro_rules! transaction_async {
    ($conn:expr, $keys:expr, $body:expr) => {
        loop {
            redis::cmd("WATCH").arg($keys).query_async::<_, ()>($conn).await?;

            let outcome = async {
                let response = $body;
                Ok::<_, $crate::models::BrokerError>(response)
            }
            .await;

            match outcome {
                Ok(Some(response)) => {
                    // ensure no watch is left in connection, regardless of whether pipeline was used
                    redis::cmd("UNWATCH").query_async::<_, ()>($conn).await?;
                    break response;
                }
                Ok(None) => continue,
                Err(err) => {
                    if let Err(unwatch_err) = redis::cmd("UNWATCH").query_async::<_, ()>($conn).await {
                        log::warn!("Failed to UNWATCH after transaction error: {}", unwatch_err);
                    }
                    return Err(err);
                }
            }
        }
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exec_abort_is_an_error() {
        // what EXEC replies once a watched key has changed
        let discarded: Option<()> = from_redis_value(&Value::Nil).unwrap();
        assert!(discarded.is_none());

        let applied: Option<()> = from_redis_value(&Value::Bulk(vec![])).unwrap();
        assert_eq!(applied, Some(()));
    }
}
