//! Shared helpers for integration tests.
#![allow(dead_code)]


use durable_worker::HistoryEvent;
use durable_worker::providers::{ActivityRequest, OrchestrationRequest, WorkItem};

pub const START_MS: u64 = 1_700_000_000_000;

pub fn started(name: &str, instance_id: &str, input: Option<&str>) -> HistoryEvent {
    HistoryEvent::execution_started(START_MS, name, instance_id, input)
}

pub fn orchestration_request(
    instance_id: &str,
    past_events: Vec<HistoryEvent>,
    new_events: Vec<HistoryEvent>,
) -> OrchestrationRequest {
    OrchestrationRequest {
        instance_id: instance_id.to_string(),
        execution_id: Some(format!("{instance_id}-exec")),
        past_events,
        new_events,
        requires_history_streaming: false,
        completion_token: None,
    }
}

pub fn activity_request(name: &str, instance_id: &str, task_id: i32, input: Option<&str>) -> ActivityRequest {
    ActivityRequest {
        name: name.to_string(),
        instance_id: instance_id.to_string(),
        task_id,
        input: input.map(str::to_string),
        task_execution_id: Some(format!("{instance_id}-{task_id}")),
    }
}

pub fn orchestration_item(
    instance_id: &str,
    past_events: Vec<HistoryEvent>,
    new_events: Vec<HistoryEvent>,
) -> WorkItem {
    WorkItem::Orchestration(orchestration_request(instance_id, past_events, new_events))
}
