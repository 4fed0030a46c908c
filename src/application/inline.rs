//! Functions that synchronous queues can run inline instead of handing jobs to a worker.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::models::job::JobCall;
use crate::models::{BrokerError, BrokerResult};
use crate::storage::InlineOutcome;

type JobFn = dyn Fn(&[Value], &Map<String, Value>) -> Result<Value, String> + Send + Sync;

/// Registry of job functions, keyed by the name jobs refer to them by.
#[derive(Clone, Default)]
pub struct JobFunctions {
    functions: HashMap<String, Arc<JobFn>>,
}

impl JobFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` under `name`, replacing any previous function of that name.
    pub fn register<S, F>(&mut self, name: S, f: F) -> &mut Self
    where
        S: Into<String>,
        F: Fn(&[Value], &Map<String, Value>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Run the function a call refers to.
    ///
    /// The function returning an error is a normal outcome to be recorded against the job, so it's
    /// returned in `Ok`. Only a call to an unregistered function is an error.
    pub fn run(&self, call: &JobCall) -> BrokerResult<InlineOutcome> {
        match self.functions.get(&call.func) {
            Some(f) => Ok(f(&call.args, &call.kwargs)),
            None => Err(BrokerError::UnknownFunction(call.func.clone())),
        }
    }
}

impl fmt::Debug for JobFunctions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("JobFunctions").field("functions", &names).finish()
    }
}
