use crate::actions::{ActionKind, CompleteOrchestrationAction, OrchestrationStatus, OrchestratorAction};
use crate::errors::FailureDetails;
use crate::history::{EventKind, HistoryEvent};
use crate::providers::{OrchestrationRequest, OrchestrationResponse};
use crate::runtime::Worker;
use crate::runtime::limits::MAX_CUSTOM_STATUS_BYTES;
use crate::runtime::registry::panic_message;
use crate::runtime::replay_engine::{ReplayEngine, TurnResult};
use futures::{FutureExt, TryStreamExt};
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};

const TARGET: &str = "durable_worker::runtime::dispatchers::orchestration";

/// Outcome of one attempt at running a turn, before it becomes a response.
enum Turn {
    Response(OrchestrationResponse),
    /// Nothing to run yet; the backend retries later.
    Skipped,
}

impl Worker {
    /// Run one orchestration turn and package its actions.
    ///
    /// Always returns a well-formed response: a registry miss yields an empty
    /// response, and any error or panic while handling the request becomes a
    /// failed completion.
    pub async fn handle_orchestration(&self, request: OrchestrationRequest) -> OrchestrationResponse {
        let instance_id = request.instance_id.clone();
        let completion_token = request.completion_token.clone();
        debug!(target: TARGET, instance_id = %instance_id, "Handling orchestration request");

        let outcome = AssertUnwindSafe(self.run_turn(request)).catch_unwind().await;
        let mut response = match outcome {
            Ok(Ok(Turn::Response(response))) => response,
            Ok(Ok(Turn::Skipped)) => OrchestrationResponse::empty(&instance_id),
            Ok(Err(details)) => {
                error!(
                    target: TARGET,
                    instance_id = %instance_id,
                    error_type = %details.error_type,
                    error = %details.message,
                    "Orchestration request failed"
                );
                self.metrics.record_orchestration_failed();
                failed_response(&instance_id, details)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(target: TARGET, instance_id = %instance_id, panic = %message, "Orchestration request panicked");
                self.metrics.record_orchestration_failed();
                failed_response(&instance_id, FailureDetails::new(crate::errors::error_types::PANIC, message))
            }
        };
        response.completion_token = completion_token;
        response
    }

    async fn run_turn(&self, request: OrchestrationRequest) -> Result<Turn, FailureDetails> {
        let OrchestrationRequest {
            instance_id,
            execution_id,
            past_events,
            new_events,
            requires_history_streaming,
            ..
        } = request;

        let past_events = if requires_history_streaming {
            self.fetch_history(&instance_id, execution_id.as_deref()).await?
        } else {
            past_events
        };

        let Some((name, input)) = find_execution_started(&past_events, &new_events) else {
            warn!(target: TARGET, instance_id = %instance_id, "No execution started event in history");
            self.metrics.record_orchestration_not_found();
            return Ok(Turn::Skipped);
        };

        let scope = self.services.create_scope();
        let Some(handler) = self.registry.try_create_workflow(&name, &scope) else {
            warn!(
                target: TARGET,
                instance_id = %instance_id,
                workflow_name = %name,
                "Workflow not found in registry; leaving the turn for a later retry"
            );
            self.metrics.record_orchestration_not_found();
            return Ok(Turn::Skipped);
        };

        let mut engine = ReplayEngine::new(instance_id.clone(), name.clone(), past_events, new_events);
        let result = engine.execute(&handler, input);
        let custom_status = engine.custom_status();

        if let Some(status) = custom_status.as_ref().filter(|s| s.len() > MAX_CUSTOM_STATUS_BYTES) {
            return Err(FailureDetails::new(
                "CustomStatusTooLarge",
                format!(
                    "custom status is {} bytes, exceeding the {} byte limit",
                    status.len(),
                    MAX_CUSTOM_STATUS_BYTES
                ),
            ));
        }

        match &result {
            TurnResult::Continue => self.metrics.record_orchestration_yielded(),
            TurnResult::Completed(_) => self.metrics.record_orchestration_completed(),
            TurnResult::Failed(_) => self.metrics.record_orchestration_failed(),
            TurnResult::ContinuedAsNew => self.metrics.record_continued_as_new(),
        }
        if let TurnResult::Failed(details) = &result {
            warn!(
                target: TARGET,
                instance_id = %instance_id,
                workflow_name = %name,
                error_type = %details.error_type,
                error = %details.message,
                "Workflow failed"
            );
        }

        let actions = engine.into_actions(&result);
        info!(
            target: TARGET,
            instance_id = %instance_id,
            workflow_name = %name,
            actions = actions.len(),
            terminal = result.is_terminal(),
            "Orchestration turn completed"
        );

        Ok(Turn::Response(OrchestrationResponse {
            instance_id,
            actions,
            custom_status,
            completion_token: None,
        }))
    }

    /// Pull the full history through the provider's streaming fetch.
    async fn fetch_history(&self, instance_id: &str, execution_id: Option<&str>) -> Result<Vec<HistoryEvent>, FailureDetails> {
        debug!(target: TARGET, instance_id = %instance_id, "Streaming instance history");
        let chunks: Vec<_> = self
            .provider
            .stream_instance_history(instance_id, execution_id)
            .try_collect()
            .await
            .map_err(|e| e.to_failure_details())?;
        let events: Vec<HistoryEvent> = chunks.into_iter().flat_map(|chunk| chunk.events).collect();
        debug!(target: TARGET, instance_id = %instance_id, events = events.len(), "Streamed instance history");
        Ok(events)
    }
}

/// Workflow name and input from the first execution started event, past before new.
fn find_execution_started(past: &[HistoryEvent], new: &[HistoryEvent]) -> Option<(String, Option<String>)> {
    past.iter().chain(new).find_map(|event| match &event.kind {
        EventKind::ExecutionStarted { name, input, .. } if !name.is_empty() => Some((name.clone(), input.clone())),
        _ => None,
    })
}

fn failed_response(instance_id: &str, details: FailureDetails) -> OrchestrationResponse {
    let mut response = OrchestrationResponse::empty(instance_id);
    response.actions.push(OrchestratorAction {
        id: 0,
        kind: ActionKind::CompleteOrchestration(CompleteOrchestrationAction {
            status: OrchestrationStatus::Failed,
            result: None,
            failure: Some(details),
            carryover_events: Vec::new(),
        }),
        router: None,
    });
    response
}
