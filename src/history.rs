//! History data model.
//!
//! A history is the append-only, backend-owned log of everything that already
//! happened to one workflow instance. The worker never mutates it; it folds
//! the events into an [`OrchestrationContext`](crate::OrchestrationContext)
//! and derives pending work from the difference between history and code.

use crate::errors::FailureDetails;
use crate::OrchestrationStatus;
use serde::{Deserialize, Serialize};

/// Parent linkage carried on the start event of a child workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentInstance {
    pub name: String,
    pub instance_id: String,
    pub task_scheduled_id: i32,
}

/// One immutable history record.
///
/// `event_id` is the sequence id for scheduling kinds (`TaskScheduled`,
/// `TimerCreated`, `SubOrchestrationCreated`, `EventSent`). Completion kinds
/// point back at that id through their `task_scheduled_id` / `timer_id` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: i32,
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// First event of every execution. Names the workflow and carries its input.
    ExecutionStarted {
        name: String,
        instance_id: String,
        input: Option<String>,
        parent: Option<ParentInstance>,
    },
    /// Marks the beginning of a new turn; its timestamp is the turn's logical time.
    OrchestratorStarted,
    TaskScheduled {
        name: String,
        input: Option<String>,
    },
    TaskCompleted {
        task_scheduled_id: i32,
        result: Option<String>,
    },
    TaskFailed {
        task_scheduled_id: i32,
        failure: FailureDetails,
    },
    TimerCreated {
        fire_at_ms: u64,
    },
    TimerFired {
        timer_id: i32,
        fire_at_ms: u64,
    },
    SubOrchestrationCreated {
        name: String,
        instance_id: String,
        input: Option<String>,
    },
    SubOrchestrationCompleted {
        task_scheduled_id: i32,
        result: Option<String>,
    },
    SubOrchestrationFailed {
        task_scheduled_id: i32,
        failure: FailureDetails,
    },
    EventRaised {
        name: String,
        input: Option<String>,
    },
    EventSent {
        instance_id: String,
        name: String,
        input: Option<String>,
    },
    ExecutionCompleted {
        status: OrchestrationStatus,
        result: Option<String>,
        failure: Option<FailureDetails>,
    },
}

impl HistoryEvent {
    pub fn new(event_id: i32, timestamp_ms: u64, kind: EventKind) -> Self {
        Self {
            event_id,
            timestamp_ms,
            kind,
        }
    }

    /// Sequence id this completion event resolves, if it is a completion kind.
    pub fn scheduled_id(&self) -> Option<i32> {
        match &self.kind {
            EventKind::TaskCompleted { task_scheduled_id, .. }
            | EventKind::TaskFailed { task_scheduled_id, .. }
            | EventKind::SubOrchestrationCompleted { task_scheduled_id, .. }
            | EventKind::SubOrchestrationFailed { task_scheduled_id, .. } => Some(*task_scheduled_id),
            EventKind::TimerFired { timer_id, .. } => Some(*timer_id),
            _ => None,
        }
    }

    /// True for the kinds that acknowledge a previously emitted action.
    pub fn is_schedule(&self) -> bool {
        matches!(
            self.kind,
            EventKind::TaskScheduled { .. }
                | EventKind::TimerCreated { .. }
                | EventKind::SubOrchestrationCreated { .. }
                | EventKind::EventSent { .. }
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            EventKind::ExecutionStarted { .. } => "ExecutionStarted",
            EventKind::OrchestratorStarted => "OrchestratorStarted",
            EventKind::TaskScheduled { .. } => "TaskScheduled",
            EventKind::TaskCompleted { .. } => "TaskCompleted",
            EventKind::TaskFailed { .. } => "TaskFailed",
            EventKind::TimerCreated { .. } => "TimerCreated",
            EventKind::TimerFired { .. } => "TimerFired",
            EventKind::SubOrchestrationCreated { .. } => "SubOrchestrationCreated",
            EventKind::SubOrchestrationCompleted { .. } => "SubOrchestrationCompleted",
            EventKind::SubOrchestrationFailed { .. } => "SubOrchestrationFailed",
            EventKind::EventRaised { .. } => "EventRaised",
            EventKind::EventSent { .. } => "EventSent",
            EventKind::ExecutionCompleted { .. } => "ExecutionCompleted",
        }
    }

    // Builders. Used by providers that translate a wire format and by tests.

    pub fn execution_started(timestamp_ms: u64, name: &str, instance_id: &str, input: Option<&str>) -> Self {
        Self::new(
            -1,
            timestamp_ms,
            EventKind::ExecutionStarted {
                name: name.to_string(),
                instance_id: instance_id.to_string(),
                input: input.map(str::to_string),
                parent: None,
            },
        )
    }

    pub fn orchestrator_started(timestamp_ms: u64) -> Self {
        Self::new(-1, timestamp_ms, EventKind::OrchestratorStarted)
    }

    pub fn task_scheduled(id: i32, name: &str, input: Option<&str>) -> Self {
        Self::new(
            id,
            0,
            EventKind::TaskScheduled {
                name: name.to_string(),
                input: input.map(str::to_string),
            },
        )
    }

    pub fn task_completed(id: i32, result: Option<&str>) -> Self {
        Self::new(
            -1,
            0,
            EventKind::TaskCompleted {
                task_scheduled_id: id,
                result: result.map(str::to_string),
            },
        )
    }

    pub fn task_failed(id: i32, failure: FailureDetails) -> Self {
        Self::new(
            -1,
            0,
            EventKind::TaskFailed {
                task_scheduled_id: id,
                failure,
            },
        )
    }

    pub fn timer_created(id: i32, fire_at_ms: u64) -> Self {
        Self::new(id, 0, EventKind::TimerCreated { fire_at_ms })
    }

    pub fn timer_fired(id: i32, fire_at_ms: u64) -> Self {
        Self::new(
            -1,
            fire_at_ms,
            EventKind::TimerFired {
                timer_id: id,
                fire_at_ms,
            },
        )
    }

    pub fn sub_orchestration_created(id: i32, name: &str, instance_id: &str, input: Option<&str>) -> Self {
        Self::new(
            id,
            0,
            EventKind::SubOrchestrationCreated {
                name: name.to_string(),
                instance_id: instance_id.to_string(),
                input: input.map(str::to_string),
            },
        )
    }

    pub fn sub_orchestration_completed(id: i32, result: Option<&str>) -> Self {
        Self::new(
            -1,
            0,
            EventKind::SubOrchestrationCompleted {
                task_scheduled_id: id,
                result: result.map(str::to_string),
            },
        )
    }

    pub fn sub_orchestration_failed(id: i32, failure: FailureDetails) -> Self {
        Self::new(
            -1,
            0,
            EventKind::SubOrchestrationFailed {
                task_scheduled_id: id,
                failure,
            },
        )
    }

    pub fn event_raised(name: &str, input: Option<&str>) -> Self {
        Self::new(
            -1,
            0,
            EventKind::EventRaised {
                name: name.to_string(),
                input: input.map(str::to_string),
            },
        )
    }

    pub fn event_sent(id: i32, instance_id: &str, name: &str, input: Option<&str>) -> Self {
        Self::new(
            id,
            0,
            EventKind::EventSent {
                instance_id: instance_id.to_string(),
                name: name.to_string(),
                input: input.map(str::to_string),
            },
        )
    }
}
