//! Backend boundary.
//!
//! A provider is the worker's only view of the orchestration backend: it
//! yields work items, accepts responses, and serves history that did not fit
//! in a single work item. Transport details (streaming RPC, reconnects,
//! wire encoding) live behind this trait.

use crate::actions::OrchestratorAction;
use crate::errors::FailureDetails;
use crate::history::HistoryEvent;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub mod error;
pub mod in_memory;

pub use error::ProviderError;

/// One orchestration turn to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub instance_id: String,
    pub execution_id: Option<String>,
    /// Events already durably recorded before this turn.
    pub past_events: Vec<HistoryEvent>,
    /// Events delivered with this turn.
    pub new_events: Vec<HistoryEvent>,
    /// History is too large for the request; fetch it with
    /// [`Provider::stream_instance_history`] before executing.
    pub requires_history_streaming: bool,
    /// Opaque token the backend expects back on the response.
    #[serde(default)]
    pub completion_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationResponse {
    pub instance_id: String,
    pub actions: Vec<OrchestratorAction>,
    pub custom_status: Option<String>,
    /// Echo of [`OrchestrationRequest::completion_token`].
    pub completion_token: Option<String>,
}

impl OrchestrationResponse {
    /// Response with no actions; tells the backend to retry the turn later.
    pub fn empty(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            actions: Vec::new(),
            custom_status: None,
            completion_token: None,
        }
    }

    pub fn completion(&self) -> Option<&crate::actions::CompleteOrchestrationAction> {
        self.actions.iter().find_map(|a| a.completion())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRequest {
    pub name: String,
    pub instance_id: String,
    pub task_id: i32,
    pub input: Option<String>,
    /// Backend-assigned id of this particular attempt.
    pub task_execution_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityResponse {
    pub instance_id: String,
    pub task_id: i32,
    pub result: Option<String>,
    pub failure: Option<FailureDetails>,
}

impl ActivityResponse {
    pub fn success(request: &ActivityRequest, result: Option<String>) -> Self {
        Self {
            instance_id: request.instance_id.clone(),
            task_id: request.task_id,
            result,
            failure: None,
        }
    }

    pub fn failure(request: &ActivityRequest, failure: FailureDetails) -> Self {
        Self {
            instance_id: request.instance_id.clone(),
            task_id: request.task_id,
            result: None,
            failure: Some(failure),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// Unit of work pulled from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkItem {
    Orchestration(OrchestrationRequest),
    Activity(ActivityRequest),
}

impl WorkItem {
    pub fn instance_id(&self) -> &str {
        match self {
            WorkItem::Orchestration(r) => &r.instance_id,
            WorkItem::Activity(r) => &r.instance_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkItem::Orchestration(_) => "Orchestration",
            WorkItem::Activity(_) => "Activity",
        }
    }
}

/// Slice of an instance's history delivered by a streaming fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryChunk {
    pub events: Vec<HistoryEvent>,
}

#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Next work item, or `Ok(None)` once the backend closed the stream.
    async fn next_work_item(&self) -> Result<Option<WorkItem>, ProviderError>;

    async fn complete_orchestration(&self, response: OrchestrationResponse) -> Result<(), ProviderError>;

    async fn complete_activity(&self, response: ActivityResponse) -> Result<(), ProviderError>;

    /// Stream the full history of one execution, chunk by chunk, in order.
    fn stream_instance_history(
        &self,
        instance_id: &str,
        execution_id: Option<&str>,
    ) -> BoxStream<'static, Result<HistoryChunk, ProviderError>>;
}
