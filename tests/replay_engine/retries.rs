//! Retry policies run inside the workflow: each attempt and each backoff
//! timer consume their own sequence ids.

use super::helpers::*;
use durable_worker::errors::error_types;
use durable_worker::{FailureDetails, HistoryEvent, RetryPolicy, TaskOptions};
use std::sync::Arc;
use std::time::Duration;

fn flaky_handler(policy: RetryPolicy) -> Arc<dyn durable_worker::OrchestrationHandler> {
    typed_handler(move |ctx, _input: ()| {
        let policy = policy.clone();
        async move {
            let v: String = ctx.call_activity("Flaky", &(), Some(TaskOptions::with_retry(policy))).await?;
            Ok(v)
        }
    })
}

fn failed(id: i32) -> HistoryEvent {
    HistoryEvent::task_failed(id, FailureDetails::new("Transient", "try again"))
}

#[test]
fn failed_attempt_schedules_a_backoff_timer_then_retries() {
    let policy = RetryPolicy::new(3, Duration::from_secs(1)).unwrap();
    let h = flaky_handler(policy);

    let mut history = vec![started(None), HistoryEvent::task_scheduled(0, "Flaky", None)];
    let turn = run_turn(history.clone(), vec![failed(0)], &h);
    assert_continue(&turn);
    assert_eq!(turn.timers(), vec![(1, START_MS + 1_000)]);

    history.push(failed(0));
    history.push(HistoryEvent::timer_created(1, START_MS + 1_000));
    let turn = run_turn(history.clone(), vec![HistoryEvent::timer_fired(1, START_MS + 1_000)], &h);
    assert_continue(&turn);
    assert_eq!(turn.scheduled_tasks(), vec![(2, "Flaky".to_string())]);

    history.push(HistoryEvent::timer_fired(1, START_MS + 1_000));
    history.push(HistoryEvent::task_scheduled(2, "Flaky", None));
    let turn = run_turn(history, vec![HistoryEvent::task_completed(2, Some("\"ok\""))], &h);
    assert_completed(&turn, "\"ok\"");
}

#[test]
fn exhausted_attempts_fail_with_the_last_task_failure() {
    let policy = RetryPolicy::new(2, Duration::from_secs(1)).unwrap();
    let h = flaky_handler(policy);
    let past = vec![
        started(None),
        HistoryEvent::task_scheduled(0, "Flaky", None),
        failed(0),
        HistoryEvent::timer_created(1, START_MS + 1_000),
        HistoryEvent::timer_fired(1, START_MS + 1_000),
        HistoryEvent::task_scheduled(2, "Flaky", None),
    ];
    let turn = run_turn(past, vec![failed(2)], &h);

    let failure = turn.failure();
    assert_eq!(failure.error_type, error_types::TASK_FAILED);
    assert!(failure.message.contains("try again"));
    assert!(turn.timers().is_empty(), "no further backoff once attempts are exhausted");
}

#[test]
fn retry_timeout_bounds_the_total_backoff() {
    let policy = RetryPolicy::new(10, Duration::from_secs(1))
        .unwrap()
        .with_retry_timeout(Duration::from_millis(1_500))
        .unwrap();
    let h = flaky_handler(policy);
    let past = vec![
        started(None),
        HistoryEvent::task_scheduled(0, "Flaky", None),
        failed(0),
        HistoryEvent::timer_created(1, START_MS + 1_000),
        HistoryEvent::timer_fired(1, START_MS + 1_000),
        HistoryEvent::task_scheduled(2, "Flaky", None),
    ];
    let turn = run_turn(past, vec![failed(2)], &h);

    assert_eq!(turn.failure().error_type, error_types::TASK_FAILED);
}

#[test]
fn backoff_grows_by_the_coefficient() {
    let policy = RetryPolicy::new(5, Duration::from_secs(1))
        .unwrap()
        .with_backoff_coefficient(2.0)
        .unwrap();
    let h = flaky_handler(policy);
    let past = vec![
        started(None),
        HistoryEvent::task_scheduled(0, "Flaky", None),
        failed(0),
        HistoryEvent::timer_created(1, START_MS + 1_000),
        HistoryEvent::timer_fired(1, START_MS + 1_000),
        HistoryEvent::task_scheduled(2, "Flaky", None),
    ];
    let turn = run_turn(past, vec![failed(2)], &h);

    assert_continue(&turn);
    assert_eq!(turn.timers(), vec![(3, START_MS + 2_000)]);
}
