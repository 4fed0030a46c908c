mod call;
mod field;
mod status;

pub use self::call::JobCall;
pub use self::field::Field;
pub use self::status::Status;

use std::collections::HashMap;

use serde::Serialize;

use crate::models::{BrokerError, BrokerResult, DateTime, Duration};

/// Identifier assigned to a job when it's submitted to storage.
pub type JobId = String;

/// Read-only projection of a job as currently held in storage.
///
/// Never cached, each read goes back to storage.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub origin: String,
    pub status: Status,
    pub func: String,
    pub args: Vec<serde_json::Value>,
    pub kwargs: serde_json::Map<String, serde_json::Value>,
    pub description: String,
    pub created_at: DateTime,
    pub enqueued_at: Option<DateTime>,
    pub ended_at: Option<DateTime>,
    pub timeout: Option<Duration>,
    pub result: Option<serde_json::Value>,
    pub exc_info: Option<String>,
}

impl JobRecord {
    /// Build a new record for a call about to be submitted to `origin`.
    pub fn new(id: JobId, origin: &str, call: &JobCall, status: Status) -> Self {
        let now = DateTime::now();
        let enqueued_at = if status == Status::Queued {
            Some(now.clone())
        } else {
            None
        };
        Self {
            id,
            origin: origin.to_owned(),
            status,
            func: call.func.clone(),
            args: call.args.clone(),
            kwargs: call.kwargs.clone(),
            description: call.description(),
            created_at: now,
            enqueued_at,
            ended_at: None,
            timeout: call.timeout,
            result: None,
            exc_info: None,
        }
    }

    /// The call this job will make when run.
    pub fn call(&self) -> JobCall {
        JobCall {
            func: self.func.clone(),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            timeout: self.timeout,
            description: Some(self.description.clone()),
        }
    }

    /// Parse a record from the raw contents of a job hash.
    ///
    /// An empty hash means the job doesn't exist.
    pub fn from_hash(id: &str, mut hash: HashMap<String, String>) -> BrokerResult<Self> {
        if hash.is_empty() {
            return Err(BrokerError::NoSuchJob(id.to_owned()));
        }

        let mut take = |field: Field| hash.remove(field.as_ref());
        let corrupt = |field: Field| {
            BrokerError::internal(format!("job {} has invalid or missing '{}' field", id, field))
        };

        let data = take(Field::Data).ok_or_else(|| corrupt(Field::Data))?;
        let call = JobCall::from_data_json(&data).map_err(|_| corrupt(Field::Data))?;
        let origin = take(Field::Origin).ok_or_else(|| corrupt(Field::Origin))?;
        let status = take(Field::Status)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| corrupt(Field::Status))?;
        let created_at = take(Field::CreatedAt)
            .and_then(|s| parse_datetime(&s))
            .ok_or_else(|| corrupt(Field::CreatedAt))?;
        let description = take(Field::Description).unwrap_or_else(|| call.description());

        Ok(Self {
            id: id.to_owned(),
            origin,
            status,
            func: call.func,
            args: call.args,
            kwargs: call.kwargs,
            description,
            created_at,
            enqueued_at: take(Field::EnqueuedAt).and_then(|s| parse_datetime(&s)),
            ended_at: take(Field::EndedAt).and_then(|s| parse_datetime(&s)),
            timeout: take(Field::Timeout)
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs),
            result: take(Field::Result).and_then(|s| serde_json::from_str(&s).ok()),
            exc_info: take(Field::ExcInfo),
        })
    }
}

fn parse_datetime(s: &str) -> Option<DateTime> {
    redis::from_redis_value(&redis::Value::Data(s.as_bytes().to_vec())).ok()
}
