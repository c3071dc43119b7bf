//! Helpers for building histories, handlers and asserting on turn outcomes.
#![allow(dead_code)]

use durable_worker::runtime::replay_engine::{ReplayEngine, TurnResult};
use durable_worker::runtime::{FnOrchestration, OrchestrationHandler, typed_orchestration};
use durable_worker::{
    ActionKind, CompleteOrchestrationAction, FailureDetails, HistoryEvent, OrchestrationContext, OrchestratorAction,
    WorkflowError,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;

pub const INSTANCE: &str = "test-instance";
pub const WORKFLOW: &str = "TestWorkflow";
pub const START_MS: u64 = 1_700_000_000_000;

pub fn started(input: Option<&str>) -> HistoryEvent {
    HistoryEvent::execution_started(START_MS, WORKFLOW, INSTANCE, input)
}

/// Handler over raw serialized input and output.
pub fn raw_handler<F, Fut>(f: F) -> Arc<dyn OrchestrationHandler>
where
    F: Fn(OrchestrationContext, Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<String>, WorkflowError>> + Send + 'static,
{
    Arc::new(FnOrchestration::new(f))
}

/// Handler with JSON-decoded input and JSON-encoded output.
pub fn typed_handler<In, Out, F, Fut>(f: F) -> Arc<dyn OrchestrationHandler>
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
    F: Fn(OrchestrationContext, In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, WorkflowError>> + Send + 'static,
{
    Arc::new(typed_orchestration(f))
}

pub struct Turn {
    pub result: TurnResult,
    pub actions: Vec<OrchestratorAction>,
    pub custom_status: Option<String>,
}

impl Turn {
    pub fn completion(&self) -> Option<&CompleteOrchestrationAction> {
        self.actions.iter().find_map(OrchestratorAction::completion)
    }

    /// `(id, name)` of every scheduled activity.
    pub fn scheduled_tasks(&self) -> Vec<(i32, String)> {
        self.actions
            .iter()
            .filter_map(|a| match &a.kind {
                ActionKind::ScheduleTask { name, .. } => Some((a.id, name.clone())),
                _ => None,
            })
            .collect()
    }

    /// `(id, fire_at_ms)` of every created timer.
    pub fn timers(&self) -> Vec<(i32, u64)> {
        self.actions
            .iter()
            .filter_map(|a| match &a.kind {
                ActionKind::CreateTimer { fire_at_ms } => Some((a.id, *fire_at_ms)),
                _ => None,
            })
            .collect()
    }

    pub fn failure(&self) -> &FailureDetails {
        match &self.result {
            TurnResult::Failed(details) => details,
            other => panic!("expected a failed turn, got {other:?}"),
        }
    }
}

/// Run one turn against `past` then `new` history. The input is taken from
/// the execution started event, as the dispatcher does.
pub fn run_turn(past: Vec<HistoryEvent>, new: Vec<HistoryEvent>, handler: &Arc<dyn OrchestrationHandler>) -> Turn {
    let input = past.iter().chain(new.iter()).find_map(|e| match &e.kind {
        durable_worker::EventKind::ExecutionStarted { input, .. } => input.clone(),
        _ => None,
    });
    let mut engine = ReplayEngine::new(INSTANCE, WORKFLOW, past, new);
    let result = engine.execute(handler, input);
    let custom_status = engine.custom_status();
    let actions = engine.into_actions(&result);
    Turn {
        result,
        actions,
        custom_status,
    }
}

pub fn assert_continue(turn: &Turn) {
    assert_eq!(turn.result, TurnResult::Continue, "expected the workflow to be parked");
    assert!(turn.completion().is_none(), "a parked turn must not complete");
}

pub fn assert_completed(turn: &Turn, expected: &str) {
    assert_eq!(turn.result, TurnResult::Completed(Some(expected.to_string())));
}
