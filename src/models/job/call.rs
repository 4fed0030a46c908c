use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::Duration;

/// A function reference plus the arguments to call it with, captured verbatim at enqueue time.
///
/// Workers look `func` up by name, so it's whatever dotted path they register functions under.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct JobCall {
    pub func: String,

    #[serde(default)]
    pub args: Vec<Value>,

    #[serde(default)]
    pub kwargs: Map<String, Value>,

    /// Per-job execution timeout. Falls back to the queue's default timeout when not given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The part of a call that's stored in the job hash's `data` field.
#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct CallData<'a> {
    pub func: std::borrow::Cow<'a, str>,
    pub args: std::borrow::Cow<'a, [Value]>,
    pub kwargs: std::borrow::Cow<'a, Map<String, Value>>,
}

impl JobCall {
    pub fn new<S: Into<String>>(func: S) -> Self {
        Self {
            func: func.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            timeout: None,
            description: None,
        }
    }

    /// Append a positional argument.
    pub fn arg<V: Into<Value>>(mut self, value: V) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn kwarg<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Human readable description, e.g. `tasks.add(1, 2)`. Generated from the call if not set.
    pub fn description(&self) -> String {
        if let Some(description) = &self.description {
            return description.clone();
        }

        let mut parts: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        parts.extend(self.kwargs.iter().map(|(k, v)| format!("{}={}", k, v)));
        format!("{}({})", self.func, parts.join(", "))
    }

    /// JSON stored in the job hash's `data` field.
    pub fn data_json(&self) -> String {
        let data = CallData {
            func: self.func.as_str().into(),
            args: self.args.as_slice().into(),
            kwargs: std::borrow::Cow::Borrowed(&self.kwargs),
        };
        serde_json::to_string(&data).unwrap_or_default()
    }

    /// Rebuild a call from a job hash's `data` field.
    pub fn from_data_json(data: &str) -> serde_json::Result<Self> {
        let data: CallData<'static> = serde_json::from_str(data)?;
        Ok(Self {
            func: data.func.into_owned(),
            args: data.args.into_owned(),
            kwargs: data.kwargs.into_owned(),
            timeout: None,
            description: None,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn generated_description() {
        let call = JobCall::new("mail.send").arg(1).arg("x").kwarg("retry", true);
        assert_eq!(call.description(), "mail.send(1, \"x\", retry=true)");

        let call = JobCall { description: Some("nightly".to_owned()), ..JobCall::new("f") };
        assert_eq!(call.description(), "nightly");
    }

    #[test]
    fn data_field() {
        let call = JobCall::new("reports.build").arg(json!({"id": 3})).kwarg("fmt", "pdf");
        let data = call.data_json();
        assert_eq!(data, r#"{"func":"reports.build","args":[{"id":3}],"kwargs":{"fmt":"pdf"}}"#);
        assert_eq!(JobCall::from_data_json(&data).unwrap(), call);
    }

    #[test]
    fn request_body_defaults() {
        let call: JobCall = serde_json::from_str(r#"{"func": "ping"}"#).unwrap();
        assert_eq!(call, JobCall::new("ping"));

        let call: JobCall = serde_json::from_str(r#"{"func": "ping", "timeout": "30s"}"#).unwrap();
        assert_eq!(call.timeout, Some(Duration::from_secs(30)));
    }
}
