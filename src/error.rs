//! Structured execution errors.
//!
//! Every failure raised while running a workflow carries an error *name*
//! (matched verbatim against `ErrorEquals` entries in Catch tables) and a
//! human-readable cause. Uncaught errors surface to the `run` caller intact.

use thiserror::Error;

/// A named failure raised during workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {cause}")]
pub struct ExecutionError {
    /// Error name, matched against `ErrorEquals` entries in Catch tables.
    pub name: String,
    /// Human-readable description of what went wrong.
    pub cause: String,
}

impl ExecutionError {
    pub fn new(name: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cause: cause.into(),
        }
    }
}

/// Result type alias using [`ExecutionError`].
pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Well-known error names.
///
/// The `States.*` names are reserved by the definition language; the rest are
/// raised by this engine for definition-level faults and are never matched
/// implicitly (a Catch table must name them, or use [`names::ALL`]).
pub mod names {
    /// Wildcard matching any error name in a Catch table.
    pub const ALL: &str = "States.ALL";
    /// A Choice state matched no rule and declared no `Default`.
    pub const NO_CHOICE_MATCHED: &str = "States.NoChoiceMatched";
    /// A branch of a Parallel state failed.
    pub const BRANCH_FAILED: &str = "States.BranchFailed";
    /// The resource invoked by a Task state failed.
    pub const TASK_FAILED: &str = "States.TaskFailed";
    /// A Task state's result exceeded the service payload limit.
    pub const DATA_LIMIT_EXCEEDED: &str = "States.DataLimitExceeded";
    /// An intrinsic function call failed at evaluation time.
    pub const INTRINSIC_FAILURE: &str = "States.IntrinsicFailure";
    /// A `ResultPath` could not be applied to the state's input.
    pub const RESULT_PATH_MATCH_FAILURE: &str = "States.ResultPathMatchFailure";

    /// A transition named a state absent from the definition.
    pub const STATE_NOT_FOUND: &str = "StateNotFound";
    /// An expression was syntactically invalid or not a string.
    pub const INVALID_PATH: &str = "InvalidPath";
    /// An expression referenced an unknown intrinsic function.
    pub const INVALID_INTRINSIC_FUNCTION: &str = "InvalidIntrinsicFunction";
    /// A Map state's items did not resolve to an array.
    pub const INVALID_MAP_INPUT: &str = "InvalidMapInput";
    /// A `States.Format` template failed to parse.
    pub const INVALID_TEMPLATE: &str = "InvalidTemplate";
    /// A path expression resolved to no value.
    pub const PATH_NOT_FOUND: &str = "PathNotFound";
    /// Default error name for a Fail state that declares none.
    pub const STATE_FAILED: &str = "StateFailed";
    /// Engine-internal fault that should not occur during normal execution.
    pub const RUNTIME: &str = "States.Runtime";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_name_and_cause() {
        let err = ExecutionError::new("SomeError", "something broke");
        assert_eq!(err.to_string(), "SomeError: something broke");
    }
}
