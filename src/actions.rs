//! Pending actions emitted by a workflow turn.

use crate::errors::FailureDetails;
use crate::history::HistoryEvent;
use serde::{Deserialize, Serialize};

/// Terminal status reported on a completion action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrchestrationStatus {
    Completed,
    Failed,
    ContinuedAsNew,
}

/// Routes an activity or child workflow to a different application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRouter {
    pub target_app_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorAction {
    /// Sequence id that produced this action.
    pub id: i32,
    pub kind: ActionKind,
    pub router: Option<TaskRouter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    ScheduleTask {
        name: String,
        input: Option<String>,
    },
    CreateTimer {
        fire_at_ms: u64,
    },
    CreateSubOrchestration {
        name: String,
        instance_id: String,
        input: Option<String>,
    },
    SendEvent {
        instance_id: String,
        name: String,
        data: Option<String>,
    },
    CompleteOrchestration(CompleteOrchestrationAction),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteOrchestrationAction {
    pub status: OrchestrationStatus,
    /// Workflow output, or the next input when continuing as new.
    pub result: Option<String>,
    pub failure: Option<FailureDetails>,
    /// Unclaimed external events forwarded into the next execution.
    pub carryover_events: Vec<HistoryEvent>,
}

impl OrchestratorAction {
    pub fn completion(&self) -> Option<&CompleteOrchestrationAction> {
        match &self.kind {
            ActionKind::CompleteOrchestration(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_continue_as_new(&self) -> bool {
        self.completion()
            .is_some_and(|c| c.status == OrchestrationStatus::ContinuedAsNew)
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ActionKind::ScheduleTask { .. } => "ScheduleTask",
            ActionKind::CreateTimer { .. } => "CreateTimer",
            ActionKind::CreateSubOrchestration { .. } => "CreateSubOrchestration",
            ActionKind::SendEvent { .. } => "SendEvent",
            ActionKind::CompleteOrchestration(_) => "CompleteOrchestration",
        }
    }
}
