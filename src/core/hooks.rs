//! Execution hooks invoked around every statement execution.
use crate::core::value::Value;
use tracing::debug;

/// What a pre-execute hook sees.
#[derive(Debug)]
pub struct ExecuteEvent<'a> {
    pub query: &'a str,
    pub is_manip: bool,
    /// Bound parameters in placeholder order; `None` for streamed values
    pub parameters: Vec<(&'a str, Option<&'a Value>)>,
}

/// Summary of an execution, handed to post-execute hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteOutcome {
    Affected(u64),
    Rows,
    Native,
    Nothing,
}

/// Observer of statement execution.
pub trait ExecutionHook: Send + Sync {
    fn pre_execute(&self, _event: &ExecuteEvent<'_>) {}

    fn post_execute(&self, _event: &ExecuteEvent<'_>, _outcome: ExecuteOutcome) {}
}

/// Default hook: logs executions through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHook;

impl ExecutionHook for TracingHook {
    fn pre_execute(&self, event: &ExecuteEvent<'_>) {
        debug!(
            query = event.query,
            is_manip = event.is_manip,
            parameters = event.parameters.len(),
            "executing statement"
        );
    }

    fn post_execute(&self, event: &ExecuteEvent<'_>, outcome: ExecuteOutcome) {
        debug!(query = event.query, ?outcome, "statement executed");
    }
}
