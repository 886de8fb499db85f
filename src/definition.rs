//! Workflow definition model.
//!
//! The definition is a plain JSON document: a `StartAt` pointer plus a map of
//! named states. Everything deserializes through serde with the wire-format
//! PascalCase field names, and [`WorkflowDefinition::validate`] checks the
//! structural rules before a definition is accepted for execution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::choice::TopLevelChoiceRule;
use crate::error::{names, ExecutionError, Result};

/// A state machine: a start pointer and its named states.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkflowDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub start_at: String,
    pub states: HashMap<String, State>,
}

/// The closed set of state types, discriminated by the `Type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum State {
    Pass(PassState),
    Task(TaskState),
    Parallel(ParallelState),
    Map(MapState),
    Wait(WaitState),
    Choice(ChoiceState),
    Succeed(SucceedState),
    Fail(FailState),
}

/// Discriminant of a [`State`], for alias lookups and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Pass,
    Task,
    Parallel,
    Map,
    Wait,
    Choice,
    Succeed,
    Fail,
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Pass => "Pass",
            StateKind::Task => "Task",
            StateKind::Parallel => "Parallel",
            StateKind::Map => "Map",
            StateKind::Wait => "Wait",
            StateKind::Choice => "Choice",
            StateKind::Succeed => "Succeed",
            StateKind::Fail => "Fail",
        }
    }
}

/// Where a state routes after it completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Next(String),
    End,
}

/// `ResultPath` is either a reference path or an explicit JSON `null`,
/// which discards the state's result and forwards its input unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultPath {
    Path(String),
    Discard,
}

/// Distinguishes an explicit `"ResultPath": null` (`Discard`) from an absent
/// field (`None`); plain `Option` deserialization collapses both into `None`.
fn deserialize_result_path<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<ResultPath>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let path = Option::<String>::deserialize(deserializer)?;
    Ok(Some(path.map_or(ResultPath::Discard, ResultPath::Path)))
}

/// A retry policy entry. Parsed and validated but not acted upon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Retrier {
    pub error_equals: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_rate: Option<f64>,
}

/// A catch policy entry: the error names it absorbs and where it routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Catcher {
    pub error_equals: Vec<String>,
    pub next: String,
    #[serde(default, deserialize_with = "deserialize_result_path")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<ResultPath>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PassState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, deserialize_with = "deserialize_result_path")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<ResultPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_selector: Option<Map<String, Value>>,
    #[serde(default, deserialize_with = "deserialize_result_path")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<ResultPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<Vec<Retrier>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catch: Option<Vec<Catcher>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_seconds_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParallelState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub branches: Vec<WorkflowDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_selector: Option<Map<String, Value>>,
    #[serde(default, deserialize_with = "deserialize_result_path")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<ResultPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<Vec<Retrier>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catch: Option<Vec<Catcher>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub iterator: WorkflowDefinition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_path: Option<String>,
    /// `None` or `Some(0)` means unbounded fan-out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_selector: Option<Map<String, Value>>,
    #[serde(default, deserialize_with = "deserialize_result_path")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<ResultPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<Vec<Retrier>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catch: Option<Vec<Catcher>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
}

/// The four mutually exclusive ways a Wait state expresses its delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaitDelay {
    Seconds {
        #[serde(rename = "Seconds")]
        seconds: f64,
    },
    SecondsPath {
        #[serde(rename = "SecondsPath")]
        seconds_path: String,
    },
    Timestamp {
        #[serde(rename = "Timestamp")]
        timestamp: String,
    },
    TimestampPath {
        #[serde(rename = "TimestampPath")]
        timestamp_path: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WaitState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(flatten)]
    pub delay: WaitDelay,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    pub choices: Vec<TopLevelChoiceRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SucceedState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FailState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

/// The I/O processing fields a state exposes to the data pipeline.
#[derive(Debug, Default)]
pub(crate) struct IoFields<'a> {
    pub input_path: Option<&'a str>,
    pub parameters: Option<&'a Map<String, Value>>,
    pub result_selector: Option<&'a Map<String, Value>>,
    pub result_path: Option<&'a ResultPath>,
    pub output_path: Option<&'a str>,
}

impl State {
    pub fn kind(&self) -> StateKind {
        match self {
            State::Pass(_) => StateKind::Pass,
            State::Task(_) => StateKind::Task,
            State::Parallel(_) => StateKind::Parallel,
            State::Map(_) => StateKind::Map,
            State::Wait(_) => StateKind::Wait,
            State::Choice(_) => StateKind::Choice,
            State::Succeed(_) => StateKind::Succeed,
            State::Fail(_) => StateKind::Fail,
        }
    }

    /// The transition declared on the state itself. `End: true` takes
    /// precedence over `Next`; Choice, Succeed and Fail declare none.
    pub fn declared_transition(&self) -> Option<Transition> {
        let (next, end) = match self {
            State::Pass(s) => (s.next.as_ref(), s.end),
            State::Task(s) => (s.next.as_ref(), s.end),
            State::Parallel(s) => (s.next.as_ref(), s.end),
            State::Map(s) => (s.next.as_ref(), s.end),
            State::Wait(s) => (s.next.as_ref(), s.end),
            State::Choice(_) | State::Succeed(_) | State::Fail(_) => (None, None),
        };
        if end == Some(true) {
            return Some(Transition::End);
        }
        next.map(|n| Transition::Next(n.clone()))
    }

    pub fn catchers(&self) -> &[Catcher] {
        match self {
            State::Task(s) => s.catch.as_deref().unwrap_or(&[]),
            State::Parallel(s) => s.catch.as_deref().unwrap_or(&[]),
            State::Map(s) => s.catch.as_deref().unwrap_or(&[]),
            _ => &[],
        }
    }

    pub(crate) fn io(&self) -> IoFields<'_> {
        match self {
            State::Pass(s) => IoFields {
                input_path: s.input_path.as_deref(),
                parameters: s.parameters.as_ref(),
                result_selector: None,
                result_path: s.result_path.as_ref(),
                output_path: s.output_path.as_deref(),
            },
            State::Task(s) => IoFields {
                input_path: s.input_path.as_deref(),
                parameters: s.parameters.as_ref(),
                result_selector: s.result_selector.as_ref(),
                result_path: s.result_path.as_ref(),
                output_path: s.output_path.as_deref(),
            },
            State::Parallel(s) => IoFields {
                input_path: s.input_path.as_deref(),
                parameters: s.parameters.as_ref(),
                result_selector: s.result_selector.as_ref(),
                result_path: s.result_path.as_ref(),
                output_path: s.output_path.as_deref(),
            },
            // Map applies its Parameters per item, against the iterator
            // context, so they stay out of the state-level input stage.
            State::Map(s) => IoFields {
                input_path: s.input_path.as_deref(),
                parameters: None,
                result_selector: s.result_selector.as_ref(),
                result_path: s.result_path.as_ref(),
                output_path: s.output_path.as_deref(),
            },
            State::Wait(s) => IoFields {
                input_path: s.input_path.as_deref(),
                output_path: s.output_path.as_deref(),
                ..IoFields::default()
            },
            State::Choice(s) => IoFields {
                input_path: s.input_path.as_deref(),
                output_path: s.output_path.as_deref(),
                ..IoFields::default()
            },
            State::Succeed(s) => IoFields {
                input_path: s.input_path.as_deref(),
                output_path: s.output_path.as_deref(),
                ..IoFields::default()
            },
            State::Fail(_) => IoFields::default(),
        }
    }
}

impl WorkflowDefinition {
    /// Checks the structural rules: `StartAt` and every transition target
    /// must name an existing state, and each non-terminal state must declare
    /// exactly one of `Next` and `End`. Branch and iterator definitions are
    /// validated recursively.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| ExecutionError::new("InvalidDefinition", message);

        if !self.states.contains_key(&self.start_at) {
            return Err(invalid(format!(
                "StartAt '{}' does not name a state",
                self.start_at
            )));
        }

        for (name, state) in &self.states {
            let mut targets: Vec<&str> = Vec::new();
            let (next, end) = match state {
                State::Pass(s) => (s.next.as_deref(), s.end),
                State::Task(s) => (s.next.as_deref(), s.end),
                State::Parallel(s) => (s.next.as_deref(), s.end),
                State::Map(s) => (s.next.as_deref(), s.end),
                State::Wait(s) => (s.next.as_deref(), s.end),
                State::Choice(s) => {
                    for choice in &s.choices {
                        targets.push(&choice.next);
                    }
                    if let Some(default) = &s.default {
                        targets.push(default);
                    }
                    (None, None)
                }
                State::Succeed(_) | State::Fail(_) => (None, None),
            };

            match state {
                State::Choice(_) | State::Succeed(_) | State::Fail(_) => {}
                _ => {
                    let ends = end == Some(true);
                    if next.is_some() == ends {
                        return Err(invalid(format!(
                            "state '{name}' must declare exactly one of Next and End"
                        )));
                    }
                }
            }

            if let Some(next) = next {
                targets.push(next);
            }
            for catcher in state.catchers() {
                targets.push(&catcher.next);
            }
            for target in targets {
                if !self.states.contains_key(target) {
                    return Err(invalid(format!(
                        "state '{name}' routes to unknown state '{target}'"
                    )));
                }
            }

            match state {
                State::Parallel(s) => {
                    for branch in &s.branches {
                        branch.validate()?;
                    }
                }
                State::Map(s) => s.iterator.validate()?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Looks up a state by name, with the error the driver loop raises for a
    /// dangling transition.
    pub fn state(&self, name: &str) -> Result<&State> {
        self.states.get(name).ok_or_else(|| {
            ExecutionError::new(names::STATE_NOT_FOUND, format!("State '{name}' not found"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> WorkflowDefinition {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn deserializes_a_task_definition() {
        let definition = parse(json!({
            "StartAt": "Work",
            "States": {
                "Work": {
                    "Type": "Task",
                    "Resource": "arn:aws:lambda:us-east-1:123:function:work",
                    "InputPath": "$.payload",
                    "ResultPath": "$.result",
                    "TimeoutSeconds": 30,
                    "End": true
                }
            }
        }));
        let State::Task(task) = definition.state("Work").unwrap() else {
            panic!("expected a Task state");
        };
        assert_eq!(task.input_path.as_deref(), Some("$.payload"));
        assert_eq!(
            task.result_path,
            Some(ResultPath::Path("$.result".to_string()))
        );
        assert_eq!(task.timeout_seconds, Some(30.0));
        assert_eq!(
            definition.state("Work").unwrap().declared_transition(),
            Some(Transition::End)
        );
    }

    #[test]
    fn null_result_path_parses_as_discard() {
        let definition = parse(json!({
            "StartAt": "Drop",
            "States": {
                "Drop": { "Type": "Pass", "ResultPath": null, "End": true }
            }
        }));
        let State::Pass(pass) = definition.state("Drop").unwrap() else {
            panic!("expected a Pass state");
        };
        assert_eq!(pass.result_path, Some(ResultPath::Discard));
    }

    #[test]
    fn wait_delay_variants_deserialize() {
        let definition = parse(json!({
            "StartAt": "A",
            "States": {
                "A": { "Type": "Wait", "Seconds": 10, "Next": "B" },
                "B": { "Type": "Wait", "SecondsPath": "$.delay", "Next": "C" },
                "C": { "Type": "Wait", "Timestamp": "2030-01-01T00:00:00Z", "Next": "D" },
                "D": { "Type": "Wait", "TimestampPath": "$.until", "End": true }
            }
        }));
        let delay_of = |name: &str| {
            let State::Wait(wait) = definition.state(name).unwrap() else {
                panic!("expected a Wait state");
            };
            wait.delay.clone()
        };
        assert!(matches!(delay_of("A"), WaitDelay::Seconds { seconds } if seconds == 10.0));
        assert!(matches!(delay_of("B"), WaitDelay::SecondsPath { .. }));
        assert!(matches!(delay_of("C"), WaitDelay::Timestamp { .. }));
        assert!(matches!(delay_of("D"), WaitDelay::TimestampPath { .. }));
    }

    #[test]
    fn end_true_wins_over_next() {
        let definition = parse(json!({
            "StartAt": "A",
            "States": {
                "A": { "Type": "Pass", "Next": "A", "End": true }
            }
        }));
        assert_eq!(
            definition.state("A").unwrap().declared_transition(),
            Some(Transition::End)
        );
    }

    #[test]
    fn validate_rejects_unknown_start_at() {
        let definition = parse(json!({
            "StartAt": "Missing",
            "States": { "A": { "Type": "Succeed" } }
        }));
        let err = definition.validate().unwrap_err();
        assert_eq!(err.name, "InvalidDefinition");
    }

    #[test]
    fn validate_rejects_dangling_next() {
        let definition = parse(json!({
            "StartAt": "A",
            "States": { "A": { "Type": "Pass", "Next": "Nowhere" } }
        }));
        assert!(definition.validate().is_err());
    }

    #[test]
    fn validate_requires_exactly_one_of_next_and_end() {
        let neither = parse(json!({
            "StartAt": "A",
            "States": { "A": { "Type": "Pass" } }
        }));
        assert!(neither.validate().is_err());

        let both = parse(json!({
            "StartAt": "A",
            "States": { "A": { "Type": "Pass", "Next": "A", "End": true } }
        }));
        assert!(both.validate().is_err());
    }

    #[test]
    fn validate_recurses_into_map_iterator() {
        let definition = parse(json!({
            "StartAt": "Each",
            "States": {
                "Each": {
                    "Type": "Map",
                    "Iterator": {
                        "StartAt": "Inner",
                        "States": { "Inner": { "Type": "Pass", "Next": "Gone" } }
                    },
                    "End": true
                }
            }
        }));
        assert!(definition.validate().is_err());
    }

    #[test]
    fn validate_checks_catcher_targets() {
        let definition = parse(json!({
            "StartAt": "Work",
            "States": {
                "Work": {
                    "Type": "Task",
                    "Resource": "res",
                    "Catch": [ { "ErrorEquals": ["States.ALL"], "Next": "Nowhere" } ],
                    "End": true
                }
            }
        }));
        assert!(definition.validate().is_err());
    }
}
