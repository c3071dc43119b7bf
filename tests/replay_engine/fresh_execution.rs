//! First turn of an instance: only the execution started event is in history.

use super::helpers::*;
use durable_worker::errors::error_types;
use durable_worker::runtime::replay_engine::TurnResult;
use durable_worker::{ActionKind, OrchestrationStatus, WorkflowError};
use std::time::Duration;

#[test]
fn immediate_return_completes() {
    let h = raw_handler(|_ctx, _input| async { Ok(Some("\"ok\"".to_string())) });
    let turn = run_turn(vec![started(None)], vec![], &h);

    assert_completed(&turn, "\"ok\"");
    assert_eq!(turn.actions.len(), 1);
    assert_eq!(turn.actions[0].id, 0);
    assert_eq!(turn.completion().unwrap().status, OrchestrationStatus::Completed);
}

#[test]
fn immediate_error_fails_with_structured_details() {
    let h = raw_handler(|_ctx, _input| async { Err(WorkflowError::typed("InvalidOrder", "order has no lines")) });
    let turn = run_turn(vec![started(None)], vec![], &h);

    let failure = turn.failure();
    assert_eq!(failure.error_type, "InvalidOrder");
    assert_eq!(failure.message, "order has no lines");
    let completion = turn.completion().unwrap();
    assert_eq!(completion.status, OrchestrationStatus::Failed);
    assert!(completion.result.is_none());
}

#[test]
fn single_activity_yields_one_schedule_action() {
    let h = typed_handler(|ctx, input: String| async move {
        let out: String = ctx.call_activity("Greet", &input, None).await?;
        Ok(out)
    });
    let turn = run_turn(vec![started(Some("\"x\""))], vec![], &h);

    assert_continue(&turn);
    assert_eq!(turn.actions.len(), 1);
    assert_eq!(turn.scheduled_tasks(), vec![(0, "Greet".to_string())]);
    match &turn.actions[0].kind {
        ActionKind::ScheduleTask { input, .. } => assert_eq!(input.as_deref(), Some("\"x\"")),
        other => panic!("unexpected action {other:?}"),
    }
}

#[test]
fn fan_out_schedules_every_branch_in_call_order() {
    let h = typed_handler(|ctx, _input: ()| async move {
        let calls = ["A", "B", "C"].map(|name| ctx.call_activity::<_, i32>(name, &(), None));
        let results = futures::future::try_join_all(calls).await?;
        Ok(results.iter().sum::<i32>())
    });
    let turn = run_turn(vec![started(None)], vec![], &h);

    assert_continue(&turn);
    assert_eq!(
        turn.scheduled_tasks(),
        vec![(0, "A".to_string()), (1, "B".to_string()), (2, "C".to_string())]
    );
}

#[test]
fn relative_timer_uses_logical_time() {
    let h = raw_handler(|ctx, _input| async move {
        ctx.create_timer_after(Duration::from_secs(10), None).await?;
        Ok(None)
    });
    let turn = run_turn(vec![started(None)], vec![], &h);

    assert_continue(&turn);
    assert_eq!(turn.timers(), vec![(0, START_MS + 10_000)]);
}

#[test]
fn undecodable_input_fails_the_turn() {
    let h = typed_handler(|_ctx, input: i32| async move { Ok(input) });
    let turn = run_turn(vec![started(Some("\"not a number\""))], vec![], &h);

    assert_eq!(turn.failure().error_type, error_types::SERIALIZATION);
    assert!(matches!(turn.result, TurnResult::Failed(_)));
}

#[test]
fn fire_and_forget_event_is_emitted_before_completion() {
    let h = raw_handler(|ctx, _input| async move {
        ctx.send_event("other-instance", "Ping", &"hello")?;
        Ok(None)
    });
    let turn = run_turn(vec![started(None)], vec![], &h);

    assert_eq!(turn.result, TurnResult::Completed(None));
    assert_eq!(turn.actions.len(), 2);
    match &turn.actions[0].kind {
        ActionKind::SendEvent { instance_id, name, data } => {
            assert_eq!(instance_id, "other-instance");
            assert_eq!(name, "Ping");
            assert_eq!(data.as_deref(), Some("\"hello\""));
        }
        other => panic!("unexpected action {other:?}"),
    }
    assert_eq!(turn.actions[1].id, 1);
}
