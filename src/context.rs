//! Execution context records, addressable via `$$.` path expressions.
//!
//! The driver loop builds one base context per run and derives a fresh
//! per-activation context for every state entry. Derived contexts are
//! independent values: concurrent branches and Map iterations never share
//! mutable state, only the cloned identity fields.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{names, ExecutionError, Result};

/// Caller-supplied overrides for the run's execution identity.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    pub execution_id: Option<String>,
    pub execution_name: Option<String>,
    pub role_arn: Option<String>,
}

/// Identity of the machine driving the run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateMachineInfo {
    pub id: String,
    pub name: String,
}

/// Identity and original input of the current run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecutionInfo {
    pub id: String,
    pub name: String,
    pub role_arn: String,
    pub start_time: DateTime<Utc>,
    pub input: Value,
}

/// Per-activation record for the state currently being executed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateInfo {
    pub name: String,
    pub entered_time: DateTime<Utc>,
    /// Always zero: automatic retry scheduling is not implemented.
    pub retry_count: u32,
}

/// Present only while a Task state is active.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskInfo {
    pub token: String,
}

/// Present only inside a Map iteration; `$$.Map.Item.Value` resolves here.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapInfo {
    pub item: MapItem,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapItem {
    pub index: usize,
    pub value: Value,
}

/// The execution context threaded through every state activation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Context {
    pub state_machine: StateMachineInfo,
    pub execution: ExecutionInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<StateInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map: Option<MapInfo>,
}

impl Context {
    /// Create the run-scoped base context.
    pub fn new(initial_input: Value, options: ExecutionOptions) -> Self {
        Self {
            state_machine: StateMachineInfo {
                id: format!("machine-{}", Uuid::new_v4()),
                name: "machine".to_string(),
            },
            execution: ExecutionInfo {
                id: options
                    .execution_id
                    .unwrap_or_else(|| format!("execution-{}", Uuid::new_v4())),
                name: options
                    .execution_name
                    .unwrap_or_else(|| "execution".to_string()),
                role_arn: options
                    .role_arn
                    .unwrap_or_else(|| "machine-role".to_string()),
                start_time: Utc::now(),
                input: initial_input,
            },
            state: None,
            task: None,
            map: None,
        }
    }

    /// Derive the per-activation context for entering `state_name`.
    ///
    /// Task activations additionally receive a fresh task token. A `Map`
    /// record inherited from an enclosing iteration is kept, so nested
    /// states can still resolve `$$.Map.Item.*`.
    pub(crate) fn enter_state(&self, state_name: &str, is_task: bool) -> Context {
        let mut context = self.clone();
        context.state = Some(StateInfo {
            name: state_name.to_string(),
            entered_time: Utc::now(),
            retry_count: 0,
        });
        context.task = is_task.then(|| TaskInfo {
            token: format!("task-{}", Uuid::new_v4()),
        });
        context
    }

    /// Derive the per-item context for one Map iteration.
    pub(crate) fn for_map_item(&self, index: usize, value: Value) -> Context {
        let mut context = self.clone();
        context.map = Some(MapInfo {
            item: MapItem { index, value },
        });
        context
    }

    /// JSON rendering used by `$$.` path lookups.
    pub(crate) fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| {
            ExecutionError::new(names::RUNTIME, format!("context is not addressable: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_serializes_with_definition_field_names() {
        let context = Context::new(json!({"a": 1}), ExecutionOptions::default());
        let value = context.to_value().unwrap();
        assert_eq!(value["Execution"]["Input"], json!({"a": 1}));
        assert_eq!(value["Execution"]["RoleArn"], json!("machine-role"));
        assert_eq!(value["StateMachine"]["Name"], json!("machine"));
        assert!(value.get("State").is_none());
    }

    #[test]
    fn derived_state_context_keeps_map_record() {
        let base = Context::new(json!(null), ExecutionOptions::default());
        let item = base.for_map_item(2, json!("x"));
        let derived = item.enter_state("Validate", true);
        assert_eq!(derived.state.as_ref().unwrap().name, "Validate");
        assert_eq!(derived.state.as_ref().unwrap().retry_count, 0);
        assert!(derived.task.is_some());
        assert_eq!(derived.map.as_ref().unwrap().item.index, 2);

        let plain = item.enter_state("Validate", false);
        assert!(plain.task.is_none());
    }

    #[test]
    fn execution_options_override_identity() {
        let context = Context::new(
            json!(null),
            ExecutionOptions {
                execution_id: Some("run-42".to_string()),
                execution_name: Some("nightly".to_string()),
                role_arn: None,
            },
        );
        assert_eq!(context.execution.id, "run-42");
        assert_eq!(context.execution.name, "nightly");
        assert_eq!(context.execution.role_arn, "machine-role");
    }
}
