//! # durable-worker
//!
//! Worker-side engine for durable workflows whose state is rebuilt from an
//! append-only history supplied by a remote orchestration backend.
//!
//! Workflow code is ordinary async Rust. Each time the backend hands the
//! worker a work item, the workflow function is re-executed from the top
//! against an [`OrchestrationContext`] that has folded the history so far:
//! steps that already happened resolve instantly from history, and the first
//! step with no history yet parks the function. Whatever new work was
//! discovered on the way is returned to the backend as pending actions.
//!
//! ## Example
//!
//! ```rust,no_run
//! use durable_worker::runtime::{Registry, Worker, WorkerOptions};
//! use durable_worker::providers::in_memory::InMemoryProvider;
//! use durable_worker::{OrchestrationContext, WorkflowError};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::builder()
//!     .register_activity_fn("Double", |_ctx, x: i64| async move { Ok::<_, WorkflowError>(x * 2) })
//!     .register_workflow_fn("Doubler", |ctx: OrchestrationContext, x: i64| async move {
//!         let doubled: i64 = ctx.call_activity("Double", &x, None).await?;
//!         Ok::<_, WorkflowError>(doubled)
//!     })
//!     .build()?;
//!
//! let (provider, _handle) = InMemoryProvider::new();
//! let worker = Worker::new(Arc::new(registry), Arc::new(provider), WorkerOptions::default())?;
//! let shutdown = tokio_util::sync::CancellationToken::new();
//! worker.run(shutdown).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Determinism rules
//!
//! - Use [`OrchestrationContext::current_utc_ms`] instead of the wall clock.
//! - Use [`OrchestrationContext::new_guid`] instead of random identifiers.
//! - Do all I/O in activities; workflow code only awaits durable futures.
//! - Use the `workflow_*!` logging macros so replays stay quiet.

pub mod actions;
pub mod context;
pub mod errors;
pub mod futures;
pub mod history;
pub mod logging;
pub mod providers;
pub mod retry;
pub mod runtime;

pub use actions::{ActionKind, CompleteOrchestrationAction, OrchestrationStatus, OrchestratorAction, TaskRouter};
pub use context::OrchestrationContext;
pub use errors::{FailureDetails, WorkflowError};
pub use crate::futures::{DurableFuture, ExternalEventFuture};
pub use history::{EventKind, HistoryEvent, ParentInstance};
pub use retry::{ChildWorkflowOptions, RetryPolicy, RetryPolicyError, TaskOptions};
pub use runtime::{ActivityContext, ActivityHandler, OrchestrationHandler};

// Internal codec used by the typed helpers on the context and the registry.
pub mod _typed_codec {
    use crate::errors::WorkflowError;
    use serde::Serialize;
    use serde::de::DeserializeOwned;

    pub trait Codec {
        fn encode<T: Serialize + ?Sized>(v: &T) -> Result<String, WorkflowError>;
        fn decode<T: DeserializeOwned>(s: &str) -> Result<T, WorkflowError>;
    }

    pub struct Json;

    impl Codec for Json {
        fn encode<T: Serialize + ?Sized>(v: &T) -> Result<String, WorkflowError> {
            serde_json::to_string(v).map_err(|e| WorkflowError::Serialization(format!("encode: {e}")))
        }

        fn decode<T: DeserializeOwned>(s: &str) -> Result<T, WorkflowError> {
            // An absent payload reads as JSON null so `()` and `Option<T>` accept it.
            let s = if s.trim().is_empty() { "null" } else { s };
            serde_json::from_str(s).map_err(|e| WorkflowError::Serialization(format!("decode: {e}")))
        }
    }

    impl Json {
        pub fn decode_opt<T: DeserializeOwned>(s: Option<&str>) -> Result<T, WorkflowError> {
            <Json as Codec>::decode(s.unwrap_or(""))
        }
    }

}
