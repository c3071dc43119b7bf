//! Replay-safe logging macros for workflow code.
//!
//! Each macro checks [`OrchestrationContext::is_replaying`](crate::OrchestrationContext::is_replaying)
//! and attaches the instance id, so a line is emitted once per logical step
//! rather than once per replay.

#[macro_export]
macro_rules! workflow_trace {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::trace!(target: "durable_worker::workflow", instance_id = %$ctx.instance_id(), $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! workflow_debug {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::debug!(target: "durable_worker::workflow", instance_id = %$ctx.instance_id(), $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! workflow_info {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::info!(target: "durable_worker::workflow", instance_id = %$ctx.instance_id(), $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! workflow_warn {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::warn!(target: "durable_worker::workflow", instance_id = %$ctx.instance_id(), $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! workflow_error {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::error!(target: "durable_worker::workflow", instance_id = %$ctx.instance_id(), $($arg)+);
        }
    }};
}
