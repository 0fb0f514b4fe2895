//! The `failure-policy` aspect.
//!
//! A task element carrying `keel:failonerror="false"` does not fail its
//! target: the failure is dropped after execution. The frame reports every
//! dropped failure as a warning.

use crate::execution::aspects::{Aspect, AspectContext};
use crate::execution::error::ExecutionError;
use crate::execution::task::Task;
use crate::stdlib::converters::parse_bool;

/// Aspect attribute read by [`FailurePolicy`].
pub const FAIL_ON_ERROR: &str = "failonerror";

pub struct FailurePolicy;

impl Aspect for FailurePolicy {
    fn name(&self) -> &str {
        "failure-policy"
    }

    fn pre_execute(&self, task: &Task) -> Result<Option<AspectContext>, ExecutionError> {
        let tolerant = task
            .element()
            .keel_aspect(FAIL_ON_ERROR)
            .and_then(parse_bool)
            == Some(false);
        Ok(tolerant.then(|| Box::new(()) as AspectContext))
    }

    fn post_execute(
        &self,
        _context: AspectContext,
        failure: Option<ExecutionError>,
    ) -> Option<ExecutionError> {
        if let Some(error) = &failure {
            tracing::debug!("ignoring failure: {}", error);
        }
        None
    }
}
