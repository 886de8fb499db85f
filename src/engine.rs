//! The execution engine: the definition registry, the driver loop and the
//! per-state executors.
//!
//! [`Engine`] holds registered workflow definitions behind a shared lock and
//! a [`ResourceInvoker`] for Task states. An execution is a loop over the
//! state map: run the current state through its executor, then follow the
//! transition it reports until a terminal state or an unrecovered error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{self, BoxFuture};
use serde_json::{json, Value};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};

use crate::choice::evaluate_choices;
use crate::context::{Context, ExecutionOptions};
use crate::definition::{MapState, State, StateKind, Transition, WaitDelay, WaitState, WorkflowDefinition};
use crate::error::{names, ExecutionError, Result};
use crate::pipeline;
use crate::resource::{NoResources, ResourceInvoker};
use crate::{path, pipeline::apply_result_path};

/// Reserved error names a Task catcher may list to absorb any task failure.
const TASK_FAILURE_ALIASES: &[&str] = &[
    names::TASK_FAILED,
    names::DATA_LIMIT_EXCEEDED,
    "Lambda.Unknown",
    "Lambda.TooManyRequestsException",
    "Lambda.ServiceException",
    "Lambda.AWSLambdaException",
    "Lambda.SdkClientException",
];

/// Reserved error names for branch failures in Parallel and Map states.
const BRANCH_FAILURE_ALIASES: &[&str] = &[names::BRANCH_FAILED];

fn implicit_aliases(kind: StateKind) -> &'static [&'static str] {
    match kind {
        StateKind::Task => TASK_FAILURE_ALIASES,
        StateKind::Parallel | StateKind::Map => BRANCH_FAILURE_ALIASES,
        _ => &[],
    }
}

/// What one state activation produced: the output payload the next state
/// receives and where the machine goes next. `None` ends the execution.
#[derive(Debug, Clone)]
pub struct StateOutcome {
    pub output: Value,
    pub transition: Option<Transition>,
}

/// Workflow execution engine.
pub struct Engine {
    definitions: Arc<RwLock<HashMap<String, WorkflowDefinition>>>,
    resources: Arc<dyn ResourceInvoker>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Arc::new(NoResources))
    }
}

impl Engine {
    pub fn new(resources: Arc<dyn ResourceInvoker>) -> Self {
        Self {
            definitions: Arc::new(RwLock::new(HashMap::new())),
            resources,
        }
    }

    /// Validates and stores a definition under `name`, replacing any
    /// previous registration.
    pub async fn register(
        &self,
        name: impl Into<String>,
        definition: WorkflowDefinition,
    ) -> Result<()> {
        definition.validate()?;
        let name = name.into();
        info!(workflow = %name, states = definition.states.len(), "registered workflow definition");
        self.definitions.write().await.insert(name, definition);
        Ok(())
    }

    pub async fn definition(&self, name: &str) -> Option<WorkflowDefinition> {
        self.definitions.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<String> {
        self.definitions.read().await.keys().cloned().collect()
    }

    /// Runs a registered definition to completion.
    pub async fn execute(
        &self,
        name: &str,
        input: Value,
        options: ExecutionOptions,
    ) -> Result<Value> {
        let definition = self.definition(name).await.ok_or_else(|| {
            ExecutionError::new(
                "DefinitionNotFound",
                format!("workflow '{name}' is not registered"),
            )
        })?;
        self.run_with(&definition, input, options).await
    }

    /// Runs an unregistered definition to completion with default options.
    pub async fn run_definition(
        &self,
        definition: &WorkflowDefinition,
        input: Value,
    ) -> Result<Value> {
        self.run_with(definition, input, ExecutionOptions::default()).await
    }

    pub async fn run_with(
        &self,
        definition: &WorkflowDefinition,
        input: Value,
        options: ExecutionOptions,
    ) -> Result<Value> {
        definition.validate()?;
        let context = Context::new(input.clone(), options);
        info!(
            execution = %context.execution.id,
            start_at = %definition.start_at,
            "starting execution"
        );
        let result = self
            .drive(definition, &context, input, definition.start_at.clone())
            .await;
        match &result {
            Ok(_) => info!(execution = %context.execution.id, "execution completed"),
            Err(error) => warn!(
                execution = %context.execution.id,
                error = %error.name,
                cause = %error.cause,
                "execution failed"
            ),
        }
        result
    }

    /// The driver loop. Boxed because Parallel branches and Map iterations
    /// re-enter it recursively.
    fn drive<'a>(
        &'a self,
        definition: &'a WorkflowDefinition,
        base: &'a Context,
        input: Value,
        start_at: String,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let mut current = start_at;
            let mut payload = input;
            loop {
                let state = definition.state(&current)?;
                let context = base.enter_state(&current, state.kind() == StateKind::Task);
                debug!(state = %current, kind = state.kind().as_str(), "entering state");
                let outcome = self.run_state(&context, state, payload).await?;
                payload = outcome.output;
                match outcome.transition {
                    Some(Transition::Next(next)) => current = next,
                    Some(Transition::End) | None => return Ok(payload),
                }
            }
        })
    }

    /// Runs one state, routing failures through its Catch policy.
    pub async fn run_state(
        &self,
        context: &Context,
        state: &State,
        input: Value,
    ) -> Result<StateOutcome> {
        match self.execute_state(context, state, input.clone()).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => intercept(state, &input, error),
        }
    }

    async fn execute_state(
        &self,
        context: &Context,
        state: &State,
        input: Value,
    ) -> Result<StateOutcome> {
        let io = state.io();
        match state {
            State::Pass(s) => {
                // A literal Result bypasses the input stages entirely.
                let result = match &s.result {
                    Some(value) => value.clone(),
                    None => pipeline::process_input(&io, &input, context)?,
                };
                let output = pipeline::process_output(&io, &input, result, context)?;
                Ok(StateOutcome { output, transition: state.declared_transition() })
            }
            State::Task(s) => {
                let effective = pipeline::process_input(&io, &input, context)?;
                let raw = self.resources.invoke(&s.resource, effective).await?;
                let output = pipeline::process_output(&io, &input, raw, context)?;
                Ok(StateOutcome { output, transition: state.declared_transition() })
            }
            State::Parallel(s) => {
                let effective = pipeline::process_input(&io, &input, context)?;
                let branches = s.branches.iter().map(|branch| {
                    self.drive(branch, context, effective.clone(), branch.start_at.clone())
                });
                let results = future::try_join_all(branches).await?;
                let output =
                    pipeline::process_output(&io, &input, Value::Array(results), context)?;
                Ok(StateOutcome { output, transition: state.declared_transition() })
            }
            State::Map(s) => {
                let effective = pipeline::process_input(&io, &input, context)?;
                let results = self.run_map_items(s, &effective, context).await?;
                let output = pipeline::process_output(&io, &input, results, context)?;
                Ok(StateOutcome { output, transition: state.declared_transition() })
            }
            State::Wait(s) => {
                let effective = pipeline::process_input(&io, &input, context)?;
                let delay = wait_delay(s, &effective, context)?;
                debug!(millis = delay.as_millis() as u64, "wait state sleeping");
                tokio::time::sleep(delay).await;
                let output = pipeline::process_output(&io, &input, effective, context)?;
                Ok(StateOutcome { output, transition: state.declared_transition() })
            }
            State::Choice(s) => {
                let effective = pipeline::process_input(&io, &input, context)?;
                let matched = evaluate_choices(&s.choices, &effective, context)?;
                let next = matched.or_else(|| s.default.clone()).ok_or_else(|| {
                    let name = context
                        .state
                        .as_ref()
                        .map_or("unnamed", |s| s.name.as_str());
                    ExecutionError::new(
                        names::NO_CHOICE_MATCHED,
                        format!("no choice rule matched in state '{name}'"),
                    )
                })?;
                // Choice forwards its raw input; the pipeline stages only
                // shape what the rules evaluate against.
                Ok(StateOutcome { output: input, transition: Some(Transition::Next(next)) })
            }
            State::Succeed(_) => {
                let effective = pipeline::process_input(&io, &input, context)?;
                let output = pipeline::process_output(&io, &input, effective, context)?;
                Ok(StateOutcome { output, transition: Some(Transition::End) })
            }
            State::Fail(s) => Err(ExecutionError::new(
                s.error.as_deref().unwrap_or(names::STATE_FAILED),
                s.cause.as_deref().unwrap_or("Terminated in a failed state"),
            )),
        }
    }

    /// Fans the iterator out over the items, bounded by `MaxConcurrency`.
    /// Results come back in item order regardless of completion order.
    async fn run_map_items(
        &self,
        state: &MapState,
        effective: &Value,
        context: &Context,
    ) -> Result<Value> {
        let items = match &state.items_path {
            Some(expression) => path::select(expression, effective, context)?,
            None => effective.clone(),
        };
        let Value::Array(items) = items else {
            return Err(ExecutionError::new(
                names::INVALID_MAP_INPUT,
                "Map state input must be an array",
            ));
        };

        let limiter = state
            .max_concurrency
            .filter(|&n| n > 0)
            .map(|n| Semaphore::new(n as usize));
        let limiter = &limiter;

        let iterations = items.into_iter().enumerate().map(|(index, item)| {
            let item_context = context.for_map_item(index, item.clone());
            async move {
                let _permit = match limiter {
                    Some(semaphore) => Some(semaphore.acquire().await.map_err(|e| {
                        ExecutionError::new(names::RUNTIME, e.to_string())
                    })?),
                    None => None,
                };
                let item_input = match &state.parameters {
                    Some(parameters) => pipeline::replace_template_fields(
                        &Value::Object(parameters.clone()),
                        effective,
                        &item_context,
                    )?,
                    None => item,
                };
                self.drive(
                    &state.iterator,
                    &item_context,
                    item_input,
                    state.iterator.start_at.clone(),
                )
                .await
            }
        });
        let results = future::try_join_all(iterations).await?;
        Ok(Value::Array(results))
    }
}

/// Routes a raised error through the state's Catch policy: the first catcher
/// whose `ErrorEquals` names the error, `States.ALL`, or a reserved alias
/// for the state type absorbs it and routes to its `Next` with an error
/// record as output. Anything uncaught propagates.
fn intercept(state: &State, input: &Value, error: ExecutionError) -> Result<StateOutcome> {
    let aliases = implicit_aliases(state.kind());
    for catcher in state.catchers() {
        let matched = catcher.error_equals.iter().any(|candidate| {
            candidate == &error.name
                || candidate == names::ALL
                || aliases.contains(&candidate.as_str())
        });
        if !matched {
            continue;
        }
        warn!(error = %error.name, next = %catcher.next, "error caught");
        let record = json!({ "Error": error.name, "Cause": error.cause });
        let output = apply_result_path(catcher.result_path.as_ref(), input, record)?;
        return Ok(StateOutcome {
            output,
            transition: Some(Transition::Next(catcher.next.clone())),
        });
    }
    Err(error)
}

/// Computes a Wait state's delay, clamped at zero for instants in the past.
fn wait_delay(state: &WaitState, input: &Value, context: &Context) -> Result<Duration> {
    let millis = match &state.delay {
        WaitDelay::Seconds { seconds } => seconds * 1000.0,
        WaitDelay::SecondsPath { seconds_path } => {
            let selected = path::select(seconds_path, input, context)?;
            let seconds = selected.as_f64().ok_or_else(|| {
                ExecutionError::new(
                    names::RUNTIME,
                    format!("SecondsPath '{seconds_path}' must select a number"),
                )
            })?;
            seconds * 1000.0
        }
        WaitDelay::Timestamp { timestamp } => millis_until(timestamp)?,
        WaitDelay::TimestampPath { timestamp_path } => {
            let selected = path::select(timestamp_path, input, context)?;
            let text = selected.as_str().ok_or_else(|| {
                ExecutionError::new(
                    names::RUNTIME,
                    format!("TimestampPath '{timestamp_path}' must select a string"),
                )
            })?;
            millis_until(text)?
        }
    };
    Ok(Duration::from_millis(millis.max(0.0) as u64))
}

fn millis_until(timestamp: &str) -> Result<f64> {
    let target = chrono::DateTime::parse_from_rfc3339(timestamp).map_err(|_| {
        ExecutionError::new(
            "InvalidTimestamp",
            format!("cannot parse '{timestamp}' as an RFC 3339 timestamp"),
        )
    })?;
    Ok(target.signed_duration_since(Utc::now()).num_milliseconds() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn definition(value: Value) -> WorkflowDefinition {
        serde_json::from_value(value).unwrap()
    }

    fn engine_with(f: impl Fn(&str, Value) -> Result<Value> + Send + Sync + 'static) -> Engine {
        Engine::new(Arc::new(f))
    }

    #[tokio::test]
    async fn task_state_runs_the_full_pipeline() {
        let machine = definition(json!({
            "StartAt": "Work",
            "States": {
                "Work": {
                    "Type": "Task",
                    "Resource": "double",
                    "InputPath": "$.payload",
                    "Parameters": { "n.$": "$.n" },
                    "ResultSelector": { "picked.$": "$.doubled" },
                    "ResultPath": "$.outcome",
                    "OutputPath": "$.outcome",
                    "End": true
                }
            }
        }));
        let engine = engine_with(|resource, payload| {
            assert_eq!(resource, "double");
            assert_eq!(payload, json!({"n": 21}));
            let n = payload["n"].as_f64().unwrap();
            Ok(json!({"doubled": n * 2.0, "noise": true}))
        });
        let output = engine
            .run_definition(&machine, json!({"payload": {"n": 21}, "extra": "ignored"}))
            .await
            .unwrap();
        assert_eq!(output, json!({"picked": 42.0}));
    }

    #[tokio::test]
    async fn pass_result_bypasses_input_stages() {
        let machine = definition(json!({
            "StartAt": "Inject",
            "States": {
                "Inject": {
                    "Type": "Pass",
                    // InputPath would dangle, but Result makes it moot.
                    "InputPath": "$.does.not.exist",
                    "Result": { "fixed": true },
                    "ResultPath": "$.injected",
                    "End": true
                }
            }
        }));
        let engine = Engine::default();
        let output = engine
            .run_definition(&machine, json!({"original": 1}))
            .await
            .unwrap();
        assert_eq!(output, json!({"original": 1, "injected": {"fixed": true}}));
    }

    #[tokio::test]
    async fn bare_pass_state_is_the_identity() {
        let machine = definition(json!({
            "StartAt": "Noop",
            "States": { "Noop": { "Type": "Pass", "End": true } }
        }));
        let input = json!({"a": [1, {"b": null}], "c": "kept"});
        let output = Engine::default()
            .run_definition(&machine, input.clone())
            .await
            .unwrap();
        assert_eq!(output, input);
    }

    #[tokio::test]
    async fn pass_states_chain_through_next() {
        let machine = definition(json!({
            "StartAt": "First",
            "States": {
                "First": { "Type": "Pass", "Result": "a", "ResultPath": "$.first", "Next": "Second" },
                "Second": { "Type": "Pass", "Result": "b", "ResultPath": "$.second", "End": true }
            }
        }));
        let output = Engine::default()
            .run_definition(&machine, json!({}))
            .await
            .unwrap();
        assert_eq!(output, json!({"first": "a", "second": "b"}));
    }

    #[tokio::test]
    async fn choice_routes_and_forwards_raw_input() {
        let machine = definition(json!({
            "StartAt": "Route",
            "States": {
                "Route": {
                    "Type": "Choice",
                    "InputPath": "$.verdict",
                    "Choices": [
                        { "Variable": "$.kind", "StringEquals": "big", "Next": "Big" },
                        { "Variable": "$.kind", "StringEquals": "small", "Next": "Small" }
                    ],
                    "Default": "Small"
                },
                "Big": { "Type": "Pass", "Result": "big branch", "ResultPath": "$.took", "End": true },
                "Small": { "Type": "Pass", "Result": "small branch", "ResultPath": "$.took", "End": true }
            }
        }));
        let engine = Engine::default();
        let output = engine
            .run_definition(&machine, json!({"verdict": {"kind": "big"}}))
            .await
            .unwrap();
        // The raw input flows on, not the InputPath selection.
        assert_eq!(output, json!({"verdict": {"kind": "big"}, "took": "big branch"}));

        let output = engine
            .run_definition(&machine, json!({"verdict": {"kind": "other"}}))
            .await
            .unwrap();
        assert_eq!(output["took"], json!("small branch"));
    }

    #[tokio::test]
    async fn choice_without_match_or_default_fails() {
        let machine = definition(json!({
            "StartAt": "Route",
            "States": {
                "Route": {
                    "Type": "Choice",
                    "Choices": [
                        { "Variable": "$.kind", "StringEquals": "big", "Next": "Big" }
                    ]
                },
                "Big": { "Type": "Succeed" }
            }
        }));
        let err = Engine::default()
            .run_definition(&machine, json!({"kind": "tiny"}))
            .await
            .unwrap_err();
        assert_eq!(err.name, names::NO_CHOICE_MATCHED);
    }

    #[tokio::test]
    async fn parallel_preserves_branch_order() {
        let machine = definition(json!({
            "StartAt": "Fan",
            "States": {
                "Fan": {
                    "Type": "Parallel",
                    "Branches": [
                        { "StartAt": "Add", "States": { "Add": { "Type": "Task", "Resource": "add", "End": true } } },
                        { "StartAt": "Sub", "States": { "Sub": { "Type": "Task", "Resource": "sub", "End": true } } }
                    ],
                    "End": true
                }
            }
        }));
        let engine = engine_with(|resource, payload| {
            let a = payload["a"].as_f64().unwrap();
            let b = payload["b"].as_f64().unwrap();
            Ok(match resource {
                "add" => json!(a + b),
                "sub" => json!(a - b),
                other => panic!("unexpected resource {other}"),
            })
        });
        let output = engine
            .run_definition(&machine, json!({"a": 3, "b": 2}))
            .await
            .unwrap();
        assert_eq!(output, json!([5.0, 1.0]));
    }

    #[tokio::test]
    async fn map_runs_the_iterator_per_item() {
        let machine = definition(json!({
            "StartAt": "Each",
            "States": {
                "Each": {
                    "Type": "Map",
                    "ItemsPath": "$.parcels",
                    "Iterator": {
                        "StartAt": "Stamp",
                        "States": {
                            "Stamp": { "Type": "Pass", "Result": true, "ResultPath": "$.shipped", "End": true }
                        }
                    },
                    "ResultPath": "$.parcels",
                    "End": true
                }
            }
        }));
        let output = Engine::default()
            .run_definition(&machine, json!({"parcels": [{"id": 1}, {"id": 2}]}))
            .await
            .unwrap();
        assert_eq!(
            output,
            json!({"parcels": [{"id": 1, "shipped": true}, {"id": 2, "shipped": true}]})
        );
    }

    #[tokio::test]
    async fn map_parameters_use_the_item_context() {
        let machine = definition(json!({
            "StartAt": "Each",
            "States": {
                "Each": {
                    "Type": "Map",
                    "ItemsPath": "$.items",
                    "Parameters": {
                        "index.$": "$$.Map.Item.Index",
                        "value.$": "$$.Map.Item.Value",
                        "courier.$": "$.courier"
                    },
                    "Iterator": {
                        "StartAt": "Keep",
                        "States": { "Keep": { "Type": "Pass", "End": true } }
                    },
                    "End": true
                }
            }
        }));
        let output = Engine::default()
            .run_definition(&machine, json!({"items": ["a", "b"], "courier": "acme"}))
            .await
            .unwrap();
        assert_eq!(
            output,
            json!([
                { "index": 0, "value": "a", "courier": "acme" },
                { "index": 1, "value": "b", "courier": "acme" }
            ])
        );
    }

    #[tokio::test]
    async fn map_rejects_non_array_input() {
        let machine = definition(json!({
            "StartAt": "Each",
            "States": {
                "Each": {
                    "Type": "Map",
                    "Iterator": {
                        "StartAt": "Keep",
                        "States": { "Keep": { "Type": "Pass", "End": true } }
                    },
                    "End": true
                }
            }
        }));
        let err = Engine::default()
            .run_definition(&machine, json!({"not": "an array"}))
            .await
            .unwrap_err();
        assert_eq!(err.name, names::INVALID_MAP_INPUT);
    }

    struct SlowEcho {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ResourceInvoker for SlowEcho {
        async fn invoke(&self, _resource: &str, payload: Value) -> Result<Value> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            // Later items sleep less, so completion order inverts.
            let n = payload.as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(100 - 10 * n)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(payload)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn map_bounds_concurrency_and_keeps_item_order() {
        let invoker = Arc::new(SlowEcho {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let engine = Engine::new(invoker.clone());
        let machine = definition(json!({
            "StartAt": "Each",
            "States": {
                "Each": {
                    "Type": "Map",
                    "MaxConcurrency": 2,
                    "Iterator": {
                        "StartAt": "Echo",
                        "States": { "Echo": { "Type": "Task", "Resource": "echo", "End": true } }
                    },
                    "End": true
                }
            }
        }));
        let output = engine
            .run_definition(&machine, json!([0, 1, 2, 3, 4]))
            .await
            .unwrap();
        assert_eq!(output, json!([0, 1, 2, 3, 4]));
        assert!(invoker.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_max_concurrency_means_unbounded() {
        let invoker = Arc::new(SlowEcho {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let engine = Engine::new(invoker.clone());
        let machine = definition(json!({
            "StartAt": "Each",
            "States": {
                "Each": {
                    "Type": "Map",
                    "MaxConcurrency": 0,
                    "Iterator": {
                        "StartAt": "Echo",
                        "States": { "Echo": { "Type": "Task", "Resource": "echo", "End": true } }
                    },
                    "End": true
                }
            }
        }));
        engine
            .run_definition(&machine, json!([0, 1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(invoker.peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_seconds_sleeps_for_the_declared_delay() {
        let machine = definition(json!({
            "StartAt": "Hold",
            "States": { "Hold": { "Type": "Wait", "Seconds": 10, "End": true } }
        }));
        let before = tokio::time::Instant::now();
        let output = Engine::default()
            .run_definition(&machine, json!({"kept": true}))
            .await
            .unwrap();
        assert!(before.elapsed() >= Duration::from_secs(10));
        assert_eq!(output, json!({"kept": true}));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_seconds_path_reads_the_delay_from_input() {
        let machine = definition(json!({
            "StartAt": "Hold",
            "States": { "Hold": { "Type": "Wait", "SecondsPath": "$.delay", "End": true } }
        }));
        let before = tokio::time::Instant::now();
        Engine::default()
            .run_definition(&machine, json!({"delay": 7}))
            .await
            .unwrap();
        let elapsed = before.elapsed();
        assert!(elapsed >= Duration::from_secs(7) && elapsed < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timestamp_in_the_past_resumes_immediately() {
        let machine = definition(json!({
            "StartAt": "Hold",
            "States": {
                "Hold": { "Type": "Wait", "Timestamp": "2001-01-01T00:00:00Z", "End": true }
            }
        }));
        let before = tokio::time::Instant::now();
        Engine::default()
            .run_definition(&machine, json!({}))
            .await
            .unwrap();
        assert!(before.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn wait_with_invalid_timestamp_fails() {
        let machine = definition(json!({
            "StartAt": "Hold",
            "States": {
                "Hold": { "Type": "Wait", "TimestampPath": "$.until", "End": true }
            }
        }));
        let err = Engine::default()
            .run_definition(&machine, json!({"until": "soon"}))
            .await
            .unwrap_err();
        assert_eq!(err.name, "InvalidTimestamp");
    }

    #[tokio::test]
    async fn fail_state_uses_declared_and_default_fields() {
        let machine = definition(json!({
            "StartAt": "Boom",
            "States": {
                "Boom": { "Type": "Fail", "Error": "Custom.Problem", "Cause": "went sideways" }
            }
        }));
        let err = Engine::default()
            .run_definition(&machine, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.name, "Custom.Problem");
        assert_eq!(err.cause, "went sideways");

        let machine = definition(json!({
            "StartAt": "Boom",
            "States": { "Boom": { "Type": "Fail" } }
        }));
        let err = Engine::default()
            .run_definition(&machine, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.name, names::STATE_FAILED);
        assert_eq!(err.cause, "Terminated in a failed state");
    }

    #[tokio::test]
    async fn catch_routes_a_named_error_with_result_path() {
        let machine = definition(json!({
            "StartAt": "Work",
            "States": {
                "Work": {
                    "Type": "Task",
                    "Resource": "explode",
                    "Catch": [
                        { "ErrorEquals": ["SomeError"], "ResultPath": "$.error", "Next": "Recover" }
                    ],
                    "End": true
                },
                "Recover": { "Type": "Pass", "End": true }
            }
        }));
        let engine = engine_with(|_, _| Err(ExecutionError::new("SomeError", "it broke")));
        let output = engine
            .run_definition(&machine, json!({"a": [1, 2, 3, 4]}))
            .await
            .unwrap();
        assert_eq!(
            output,
            json!({"a": [1, 2, 3, 4], "error": {"Error": "SomeError", "Cause": "it broke"}})
        );
    }

    #[tokio::test]
    async fn catch_with_null_result_path_keeps_the_input() {
        let machine = definition(json!({
            "StartAt": "Work",
            "States": {
                "Work": {
                    "Type": "Task",
                    "Resource": "explode",
                    "Catch": [
                        { "ErrorEquals": ["SomeError"], "ResultPath": null, "Next": "Recover" }
                    ],
                    "End": true
                },
                "Recover": { "Type": "Pass", "End": true }
            }
        }));
        let engine = engine_with(|_, _| Err(ExecutionError::new("SomeError", "it broke")));
        let output = engine
            .run_definition(&machine, json!({"kept": true}))
            .await
            .unwrap();
        assert_eq!(output, json!({"kept": true}));
    }

    #[tokio::test]
    async fn reserved_alias_catches_any_task_failure() {
        let machine = definition(json!({
            "StartAt": "Work",
            "States": {
                "Work": {
                    "Type": "Task",
                    "Resource": "explode",
                    "Catch": [
                        { "ErrorEquals": ["Known.Error"], "Next": "Specific" },
                        { "ErrorEquals": ["States.TaskFailed"], "Next": "Generic" }
                    ],
                    "End": true
                },
                "Specific": { "Type": "Pass", "Result": "specific", "End": true },
                "Generic": { "Type": "Pass", "Result": "generic", "End": true }
            }
        }));

        let engine = engine_with(|_, _| Err(ExecutionError::new("Known.Error", "known")));
        let output = engine.run_definition(&machine, json!({})).await.unwrap();
        assert_eq!(output, json!("specific"));

        let engine = engine_with(|_, _| Err(ExecutionError::new("Surprise.Error", "unknown")));
        let output = engine.run_definition(&machine, json!({})).await.unwrap();
        assert_eq!(output, json!("generic"));
    }

    #[tokio::test]
    async fn uncaught_errors_propagate() {
        let machine = definition(json!({
            "StartAt": "Work",
            "States": {
                "Work": { "Type": "Task", "Resource": "explode", "End": true }
            }
        }));
        let engine = engine_with(|_, _| Err(ExecutionError::new("Surprise.Error", "unknown")));
        let err = engine.run_definition(&machine, json!({})).await.unwrap_err();
        assert_eq!(err.name, "Surprise.Error");
    }

    #[tokio::test]
    async fn parallel_branch_failure_surfaces_through_catch() {
        let machine = definition(json!({
            "StartAt": "Fan",
            "States": {
                "Fan": {
                    "Type": "Parallel",
                    "Branches": [
                        { "StartAt": "Ok", "States": { "Ok": { "Type": "Pass", "End": true } } },
                        { "StartAt": "Bad", "States": { "Bad": { "Type": "Fail", "Error": "Branch.Error" } } }
                    ],
                    "Catch": [
                        { "ErrorEquals": ["States.BranchFailed"], "ResultPath": "$.error", "Next": "Recover" }
                    ],
                    "End": true
                },
                "Recover": { "Type": "Pass", "End": true }
            }
        }));
        let output = Engine::default()
            .run_definition(&machine, json!({"id": 9}))
            .await
            .unwrap();
        assert_eq!(output["id"], json!(9));
        assert_eq!(output["error"]["Error"], json!("Branch.Error"));
    }

    #[tokio::test]
    async fn registry_round_trip_and_unknown_lookup() {
        let engine = Engine::default();
        let machine = definition(json!({
            "StartAt": "Done",
            "States": { "Done": { "Type": "Succeed" } }
        }));
        engine.register("simple", machine).await.unwrap();
        assert_eq!(engine.list().await, vec!["simple".to_string()]);
        assert!(engine.definition("simple").await.is_some());

        let output = engine
            .execute("simple", json!({"ok": true}), ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(output, json!({"ok": true}));

        let err = engine
            .execute("missing", json!({}), ExecutionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.name, "DefinitionNotFound");
    }

    #[tokio::test]
    async fn register_rejects_invalid_definitions() {
        let engine = Engine::default();
        let machine = definition(json!({
            "StartAt": "Nope",
            "States": { "Done": { "Type": "Succeed" } }
        }));
        let err = engine.register("broken", machine).await.unwrap_err();
        assert_eq!(err.name, "InvalidDefinition");
    }

    #[tokio::test]
    async fn task_parameters_can_read_the_context_object() {
        let machine = definition(json!({
            "StartAt": "Work",
            "States": {
                "Work": {
                    "Type": "Task",
                    "Resource": "inspect",
                    "Parameters": {
                        "who.$": "$$.State.Name",
                        "payload.$": "$"
                    },
                    "End": true
                }
            }
        }));
        let engine = engine_with(|_, payload| Ok(payload));
        let output = engine
            .run_definition(&machine, json!({"v": 1}))
            .await
            .unwrap();
        assert_eq!(output, json!({"who": "Work", "payload": {"v": 1}}));
    }
}
