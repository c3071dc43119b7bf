use crate::errors::{FailureDetails, error_types};
use crate::providers::{ActivityRequest, ActivityResponse};
use crate::runtime::registry::panic_message;
use crate::runtime::{ActivityContext, Worker};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

const TARGET: &str = "durable_worker::runtime::dispatchers::activity";

impl Worker {
    /// Run one activity invocation and package its result or failure.
    ///
    /// A registry miss is a failure response: unlike an orchestration turn,
    /// a single activity call has nothing to retry later.
    pub async fn handle_activity(&self, request: ActivityRequest) -> ActivityResponse {
        debug!(
            target: TARGET,
            instance_id = %request.instance_id,
            activity_name = %request.name,
            task_id = request.task_id,
            "Handling activity request"
        );

        let scope = Arc::new(self.services.create_scope());
        let Some(handler) = self.registry.try_create_activity(&request.name, &scope) else {
            warn!(
                target: TARGET,
                instance_id = %request.instance_id,
                activity_name = %request.name,
                "Activity not found in registry"
            );
            self.metrics.record_activity_not_found();
            return ActivityResponse::failure(
                &request,
                FailureDetails::new(
                    error_types::ACTIVITY_NOT_FOUND,
                    format!("Activity '{}' not found", request.name),
                ),
            );
        };

        let ctx = ActivityContext::new(
            request.instance_id.clone(),
            request.name.clone(),
            request.task_id,
            request.task_execution_id.clone(),
            scope,
        );
        let outcome = AssertUnwindSafe(handler.invoke(ctx, request.input.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => {
                debug!(
                    target: TARGET,
                    instance_id = %request.instance_id,
                    activity_name = %request.name,
                    task_id = request.task_id,
                    "Activity completed"
                );
                self.metrics.record_activity_success();
                ActivityResponse::success(&request, result)
            }
            Ok(Err(err)) => {
                let details = err.to_failure_details();
                warn!(
                    target: TARGET,
                    instance_id = %request.instance_id,
                    activity_name = %request.name,
                    task_id = request.task_id,
                    error_type = %details.error_type,
                    error = %details.message,
                    "Activity failed"
                );
                self.metrics.record_activity_failure();
                ActivityResponse::failure(&request, details)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    target: TARGET,
                    instance_id = %request.instance_id,
                    activity_name = %request.name,
                    task_id = request.task_id,
                    panic = %message,
                    "Activity panicked"
                );
                self.metrics.record_activity_failure();
                ActivityResponse::failure(&request, FailureDetails::new(error_types::PANIC, message))
            }
        }
    }
}
