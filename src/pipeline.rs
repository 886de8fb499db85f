//! The per-state data pipeline.
//!
//! Every state activation runs its payload through up to five stages:
//! `InputPath` selection and `Parameters` templating on the way in, then
//! `ResultSelector` templating, `ResultPath` merging and `OutputPath`
//! selection on the way out. Each stage is skipped when its field is absent.

use serde_json::{Map, Value};

use crate::context::Context;
use crate::definition::{IoFields, ResultPath};
use crate::error::{names, ExecutionError, Result};
use crate::path;

/// Stages 1-2: `InputPath` selection, then `Parameters` templating.
pub(crate) fn process_input(io: &IoFields<'_>, input: &Value, context: &Context) -> Result<Value> {
    let selected = match io.input_path {
        Some(expression) => path::select(expression, input, context)?,
        None => input.clone(),
    };
    match io.parameters {
        Some(parameters) => {
            replace_template_fields(&Value::Object(parameters.clone()), &selected, context)
        }
        None => Ok(selected),
    }
}

/// Stages 3-5: `ResultSelector` templating, `ResultPath` merging and
/// `OutputPath` selection. `input` is the state's raw input, which the
/// `ResultPath` stage may merge the result into.
pub(crate) fn process_output(
    io: &IoFields<'_>,
    input: &Value,
    output: Value,
    context: &Context,
) -> Result<Value> {
    let selected = match io.result_selector {
        Some(selector) => {
            replace_template_fields(&Value::Object(selector.clone()), &output, context)?
        }
        None => output,
    };
    let merged = apply_result_path(io.result_path, input, selected)?;
    match io.output_path {
        Some("$") | None => Ok(merged),
        Some(expression) => path::select(expression, &merged, context),
    }
}

/// Combines a state's result with its raw input under the `ResultPath` rules:
/// absent or `"$"` forwards the result, `null` discards it and forwards the
/// input, and any other path writes the result into a copy of the input.
pub fn apply_result_path(
    result_path: Option<&ResultPath>,
    input: &Value,
    output: Value,
) -> Result<Value> {
    match result_path {
        None => Ok(output),
        Some(ResultPath::Discard) => Ok(input.clone()),
        Some(ResultPath::Path(expression)) if expression == "$" => Ok(output),
        Some(ResultPath::Path(expression)) => {
            let mut merged = input.clone();
            path::write_path(&mut merged, expression, output)?;
            Ok(merged)
        }
    }
}

/// Recursively instantiates a payload template against `input`. Object keys
/// ending in `.$` are renamed without the suffix and their string value is
/// evaluated as a path or intrinsic expression; everything else is copied,
/// descending through nested objects and arrays.
pub fn replace_template_fields(
    template: &Value,
    input: &Value,
    context: &Context,
) -> Result<Value> {
    match template {
        Value::Object(fields) => {
            let mut out = Map::with_capacity(fields.len());
            for (key, value) in fields {
                match key.strip_suffix(".$") {
                    Some(target) => {
                        let Value::String(expression) = value else {
                            return Err(ExecutionError::new(
                                names::INVALID_PATH,
                                format!("value of template field '{key}' must be a string"),
                            ));
                        };
                        out.insert(target.to_string(), path::select(expression, input, context)?);
                    }
                    None => {
                        out.insert(key.clone(), replace_template_fields(value, input, context)?);
                    }
                }
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(replace_template_fields(item, input, context)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}
