//! Resource invocation seam for Task states.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ExecutionError, Result};

/// Dispatches a Task state's `Resource` identifier with its processed input
/// and produces the task's raw result.
///
/// Implementations decide what the identifier means: a lambda ARN, an HTTP
/// endpoint, an in-process function table. Errors returned here flow into
/// the state's Catch policy under the name carried by the error.
#[async_trait]
pub trait ResourceInvoker: Send + Sync {
    async fn invoke(&self, resource: &str, payload: Value) -> Result<Value>;
}

/// Invoker for machines without Task states. Any invocation fails.
#[derive(Debug, Default)]
pub struct NoResources;

#[async_trait]
impl ResourceInvoker for NoResources {
    async fn invoke(&self, resource: &str, _payload: Value) -> Result<Value> {
        Err(ExecutionError::new(
            "ResourceNotConfigured",
            format!("no invoker configured for resource '{resource}'"),
        ))
    }
}

#[async_trait]
impl<F> ResourceInvoker for F
where
    F: Fn(&str, Value) -> Result<Value> + Send + Sync,
{
    async fn invoke(&self, resource: &str, payload: Value) -> Result<Value> {
        self(resource, payload)
    }
}
