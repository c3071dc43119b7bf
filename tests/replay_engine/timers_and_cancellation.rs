//! Durable timers, logical time and local cancellation of waits.

use super::helpers::*;
use durable_worker::{HistoryEvent, WorkflowError};
use futures::future::{Either, select};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[test]
fn fired_timer_resumes_the_workflow() {
    let h = raw_handler(|ctx, _input| async move {
        ctx.create_timer(START_MS + 5_000, None).await?;
        Ok(Some("\"woke\"".to_string()))
    });
    let past = vec![started(None), HistoryEvent::timer_created(0, START_MS + 5_000)];
    let new = vec![HistoryEvent::orchestrator_started(START_MS + 5_001), HistoryEvent::timer_fired(0, START_MS + 5_000)];
    let turn = run_turn(past, new, &h);

    assert_completed(&turn, "\"woke\"");
}

#[test]
fn logical_time_is_stable_across_replays() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let observed = seen.clone();
    let h = raw_handler(move |ctx, _input| {
        let observed = observed.clone();
        async move {
            observed.lock().unwrap().push(ctx.current_utc_ms());
            ctx.schedule_activity_raw("A", None, None).await?;
            observed.lock().unwrap().push(ctx.current_utc_ms());
            ctx.schedule_activity_raw("B", None, None).await?;
            Ok(None)
        }
    });

    let first = run_turn(vec![started(None)], vec![], &h);
    assert_continue(&first);
    let second = run_turn(
        vec![started(None), HistoryEvent::task_scheduled(0, "A", None)],
        vec![HistoryEvent::orchestrator_started(START_MS + 9_000), HistoryEvent::task_completed(0, None)],
        &h,
    );
    assert_continue(&second);

    // Turn one reads once; turn two replays that read, then reads at the live edge.
    assert_eq!(*seen.lock().unwrap(), vec![START_MS, START_MS, START_MS + 9_000]);
}

#[test]
fn timer_deadline_from_logical_time_replays_unchanged() {
    let h = typed_handler(|ctx, _input: ()| async move {
        let deadline = ctx.current_utc_ms() + 10_000;
        ctx.create_timer_after(Duration::from_secs(10), None).await?;
        Ok(deadline)
    });
    let past = vec![started(None), HistoryEvent::timer_created(0, START_MS + 10_000)];
    let new = vec![HistoryEvent::orchestrator_started(START_MS + 10_500), HistoryEvent::timer_fired(0, START_MS + 10_000)];
    let turn = run_turn(past, new, &h);

    assert_completed(&turn, &(START_MS + 10_000).to_string());
}

#[test]
fn logical_time_past_recorded_history_is_the_newest_turn() {
    let h = typed_handler(|ctx, _input: ()| async move { Ok(ctx.current_utc_ms()) });
    let past = vec![started(None), HistoryEvent::orchestrator_started(START_MS + 1_000)];
    let new = vec![HistoryEvent::orchestrator_started(START_MS + 9_000)];
    let turn = run_turn(past, new, &h);

    assert_completed(&turn, &(START_MS + 9_000).to_string());
}

#[test]
fn canceled_timer_wait_returns_canceled_and_keeps_the_request() {
    let h = typed_handler(|ctx, _input: ()| async move {
        let token = CancellationToken::new();
        token.cancel();
        match ctx.create_timer(START_MS + 60_000, Some(token)).await {
            Err(WorkflowError::Canceled) => Ok("canceled".to_string()),
            Err(e) => Err(e),
            Ok(_) => Ok("fired".to_string()),
        }
    });
    let turn = run_turn(vec![started(None)], vec![], &h);

    assert_completed(&turn, "\"canceled\"");
    assert_eq!(turn.timers(), vec![(0, START_MS + 60_000)]);
}

#[test]
fn cancellation_after_resolution_has_no_effect() {
    let h = raw_handler(|ctx, _input| async move {
        let token = CancellationToken::new();
        token.cancel();
        ctx.create_timer(START_MS + 1, Some(token)).await?;
        Ok(Some("\"fired\"".to_string()))
    });
    let past = vec![
        started(None),
        HistoryEvent::timer_created(0, START_MS + 1),
        HistoryEvent::timer_fired(0, START_MS + 1),
    ];
    let turn = run_turn(past, vec![], &h);

    assert_completed(&turn, "\"fired\"");
}

#[test]
fn canceled_external_wait_returns_canceled() {
    let h = typed_handler(|ctx, _input: ()| async move {
        let token = CancellationToken::new();
        token.cancel();
        match ctx.wait_for_external_event::<String>("Approval", Some(token)).await {
            Err(WorkflowError::Canceled) => Ok(true),
            _ => Ok(false),
        }
    });
    let turn = run_turn(vec![started(None)], vec![], &h);

    assert_completed(&turn, "true");
    assert!(turn.actions.iter().all(|a| a.completion().is_some()));
}

#[test]
fn activity_racing_a_timer_wins_when_it_completes_first() {
    let h = typed_handler(|ctx, _input: ()| async move {
        let work = ctx.call_activity::<_, String>("Slow", &(), None);
        let deadline = ctx.create_timer_after(Duration::from_secs(30), None);
        match select(work, deadline).await {
            Either::Left((result, _)) => result,
            Either::Right(_) => Ok("deadline".to_string()),
        }
    });
    let past = vec![
        started(None),
        HistoryEvent::task_scheduled(0, "Slow", None),
        HistoryEvent::timer_created(1, START_MS + 30_000),
    ];
    let new = vec![HistoryEvent::task_completed(0, Some("\"done\""))];
    let turn = run_turn(past, new, &h);

    assert_completed(&turn, "\"done\"");
    assert_eq!(turn.actions.len(), 1);
    assert_eq!(turn.actions[0].id, 2);
}

#[test]
fn timer_racing_an_activity_wins_when_it_fires_first() {
    let h = typed_handler(|ctx, _input: ()| async move {
        let work = ctx.call_activity::<_, String>("Slow", &(), None);
        let deadline = ctx.create_timer_after(Duration::from_secs(30), None);
        match select(work, deadline).await {
            Either::Left((result, _)) => result,
            Either::Right(_) => Ok("deadline".to_string()),
        }
    });
    let past = vec![
        started(None),
        HistoryEvent::task_scheduled(0, "Slow", None),
        HistoryEvent::timer_created(1, START_MS + 30_000),
    ];
    let new = vec![HistoryEvent::timer_fired(1, START_MS + 30_000)];
    let turn = run_turn(past, new, &h);

    assert_completed(&turn, "\"deadline\"");
}
