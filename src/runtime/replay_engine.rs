use crate::actions::{ActionKind, CompleteOrchestrationAction, OrchestrationStatus, OrchestratorAction};
use crate::errors::{FailureDetails, error_types};
use crate::futures::poll_once;
use crate::history::HistoryEvent;
use crate::runtime::OrchestrationHandler;
use crate::runtime::registry::panic_message;
use crate::OrchestrationContext;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::task::Poll;
use tracing::{debug, warn};

/// Result of executing an orchestration turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnResult {
    /// Workflow is parked on an unresolved await
    Continue,
    /// Workflow returned with output
    Completed(Option<String>),
    /// Workflow failed, panicked or diverged from history
    Failed(FailureDetails),
    /// Workflow requested continue-as-new
    ContinuedAsNew,
}

impl TurnResult {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnResult::Continue)
    }
}

/// Folds one work item's history into a fresh context and runs the workflow
/// to its first unresolved await.
pub struct ReplayEngine {
    instance_id: String,
    ctx: OrchestrationContext,
    past_events: Vec<HistoryEvent>,
    new_events: Vec<HistoryEvent>,
}

impl ReplayEngine {
    pub fn new(
        instance_id: impl Into<String>,
        name: impl Into<String>,
        past_events: Vec<HistoryEvent>,
        new_events: Vec<HistoryEvent>,
    ) -> Self {
        let instance_id = instance_id.into();
        Self {
            ctx: OrchestrationContext::new(instance_id.clone(), name),
            instance_id,
            past_events,
            new_events,
        }
    }

    pub fn context(&self) -> &OrchestrationContext {
        &self.ctx
    }

    /// Fold past then new history, then poll the workflow once.
    ///
    /// A single dispatch never waits for future history: whatever the
    /// workflow could not resolve from the folded events stays pending.
    pub fn execute(&mut self, handler: &Arc<dyn OrchestrationHandler>, input: Option<String>) -> TurnResult {
        let past = std::mem::take(&mut self.past_events);
        let new = std::mem::take(&mut self.new_events);
        debug!(
            instance_id = %self.instance_id,
            past_events = past.len(),
            new_events = new.len(),
            "Executing orchestration turn"
        );
        self.ctx.process_events(&past, true);
        self.ctx.process_events(&new, false);

        let ctx = self.ctx.clone();
        let run_result = catch_unwind(AssertUnwindSafe(|| {
            let mut fut = handler.invoke(ctx, input);
            match poll_once(fut.as_mut()) {
                Poll::Ready(output) => Some(output),
                Poll::Pending => None,
            }
        }));

        let output = match run_result {
            Ok(output) => output,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(instance_id = %self.instance_id, panic = %message, "Workflow panicked");
                return TurnResult::Failed(FailureDetails::new(error_types::PANIC, message));
            }
        };

        // History disagreement wins over whatever the code returned.
        if let Some(message) = self.ctx.nondeterminism_error() {
            return TurnResult::Failed(FailureDetails::new(error_types::NONDETERMINISM, message));
        }

        if self.ctx.pending_actions().iter().any(OrchestratorAction::is_continue_as_new) {
            return TurnResult::ContinuedAsNew;
        }

        match output {
            None => TurnResult::Continue,
            Some(Ok(result)) => TurnResult::Completed(result),
            Some(Err(error)) => TurnResult::Failed(error.to_failure_details()),
        }
    }

    pub fn pending_actions(&self) -> Vec<OrchestratorAction> {
        self.ctx.pending_actions()
    }

    pub fn custom_status(&self) -> Option<String> {
        self.ctx.custom_status()
    }

    /// Pending actions for `result`, with the terminal completion appended
    /// when the workflow finished this turn.
    pub fn into_actions(self, result: &TurnResult) -> Vec<OrchestratorAction> {
        let mut actions = self.ctx.take_pending_actions();
        let completion = match result {
            TurnResult::Completed(output) => Some(CompleteOrchestrationAction {
                status: OrchestrationStatus::Completed,
                result: output.clone(),
                failure: None,
                carryover_events: Vec::new(),
            }),
            TurnResult::Failed(details) => Some(CompleteOrchestrationAction {
                status: OrchestrationStatus::Failed,
                result: None,
                failure: Some(details.clone()),
                carryover_events: Vec::new(),
            }),
            TurnResult::Continue | TurnResult::ContinuedAsNew => None,
        };
        if let Some(completion) = completion {
            // A failed turn only reports the failure.
            if matches!(result, TurnResult::Failed(_)) {
                actions.clear();
            }
            actions.push(OrchestratorAction {
                id: self.ctx.sequence_number(),
                kind: ActionKind::CompleteOrchestration(completion),
                router: None,
            });
        }
        actions
    }
}
