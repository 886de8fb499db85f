//! stateloom — an execution engine for declarative JSON workflow machines.
//!
//! A workflow is a map of named states (Pass, Task, Parallel, Map, Wait,
//! Choice, Succeed, Fail) plus a `StartAt` pointer. The [`engine::Engine`]
//! drives a JSON payload through the states, shaping it at each step with
//! the `InputPath`/`Parameters`/`ResultSelector`/`ResultPath`/`OutputPath`
//! pipeline, and routes failures through declared Catch policies. Task
//! states call out through a [`resource::ResourceInvoker`] the host
//! application supplies.
//!
//! ```no_run
//! use serde_json::json;
//! use stateloom::prelude::*;
//!
//! # async fn demo() -> stateloom::Result<()> {
//! let definition: WorkflowDefinition = serde_json::from_value(json!({
//!     "StartAt": "Hello",
//!     "States": {
//!         "Hello": { "Type": "Pass", "Result": "world", "ResultPath": "$.hello", "End": true }
//!     }
//! })).map_err(|e| ExecutionError::new("InvalidDefinition", e.to_string()))?;
//!
//! let engine = Engine::default();
//! let output = engine.run_definition(&definition, json!({})).await?;
//! assert_eq!(output, json!({"hello": "world"}));
//! # Ok(())
//! # }
//! ```

pub mod choice;
pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod path;
pub mod pipeline;
pub mod resource;

pub use context::{Context, ExecutionOptions};
pub use definition::{State, StateKind, Transition, WorkflowDefinition};
pub use engine::{Engine, StateOutcome};
pub use error::{ExecutionError, Result};
pub use resource::{NoResources, ResourceInvoker};

/// Common imports for embedding the engine.
pub mod prelude {
    pub use crate::context::{Context, ExecutionOptions};
    pub use crate::definition::{State, StateKind, Transition, WorkflowDefinition};
    pub use crate::engine::{Engine, StateOutcome};
    pub use crate::error::{ExecutionError, Result};
    pub use crate::resource::{NoResources, ResourceInvoker};
}
