//! External event buffering, FIFO matching and timed waits.

use super::helpers::*;
use durable_worker::errors::error_types;
use durable_worker::{HistoryEvent, OrchestrationContext, WorkflowError};
use futures::FutureExt;
use std::time::Duration;

#[test]
fn buffered_events_are_consumed_in_arrival_order() {
    let h = typed_handler(|ctx, _input: ()| async move {
        let first: String = ctx.wait_for_external_event("E", None).await?;
        let second: String = ctx.wait_for_external_event("E", None).await?;
        Ok(vec![first, second])
    });
    let new = vec![
        HistoryEvent::event_raised("E", Some("\"A\"")),
        HistoryEvent::event_raised("E", Some("\"B\"")),
    ];
    let turn = run_turn(vec![started(None)], new, &h);

    assert_completed(&turn, "[\"A\",\"B\"]");
}

#[test]
fn event_names_match_case_insensitively() {
    let h = typed_handler(|ctx, _input: ()| async move {
        let approved: bool = ctx.wait_for_external_event("approval", None).await?;
        Ok(approved)
    });
    let turn = run_turn(
        vec![started(None)],
        vec![HistoryEvent::event_raised("Approval", Some("true"))],
        &h,
    );

    assert_completed(&turn, "true");
}

#[test]
fn waiting_produces_no_action() {
    let h = typed_handler(|ctx, _input: ()| async move {
        let v: i32 = ctx.wait_for_external_event("Never", None).await?;
        Ok(v)
    });
    let turn = run_turn(vec![started(None)], vec![], &h);

    assert_continue(&turn);
    assert!(turn.actions.is_empty());
}

#[test]
fn events_for_other_names_do_not_satisfy_a_wait() {
    let h = typed_handler(|ctx, _input: ()| async move {
        let v: i32 = ctx.wait_for_external_event("Wanted", None).await?;
        Ok(v)
    });
    let turn = run_turn(
        vec![started(None)],
        vec![HistoryEvent::event_raised("Other", Some("1"))],
        &h,
    );

    assert_continue(&turn);
}

#[test]
fn event_arriving_after_the_wait_satisfies_the_oldest_waiter() {
    let ctx = OrchestrationContext::new(INSTANCE, WORKFLOW);
    let mut first = ctx.wait_for_external_event_raw("Signal", None);
    let mut second = ctx.wait_for_external_event_raw("Signal", None);
    assert!((&mut first).now_or_never().is_none());

    ctx.process_events(&[HistoryEvent::event_raised("SIGNAL", Some("1"))], false);

    assert!((&mut second).now_or_never().is_none());
    assert_eq!((&mut first).now_or_never().unwrap().unwrap().as_deref(), Some("1"));

    ctx.process_events(&[HistoryEvent::event_raised("signal", Some("2"))], false);
    assert_eq!((&mut second).now_or_never().unwrap().unwrap().as_deref(), Some("2"));
}

#[test]
fn timed_wait_returns_the_event_when_it_arrives_first() {
    let h = typed_handler(|ctx, _input: ()| async move {
        let answer: String = ctx
            .wait_for_external_event_with_timeout("Approval", Duration::from_secs(60))
            .await?;
        Ok(answer)
    });
    let turn = run_turn(
        vec![started(None)],
        vec![HistoryEvent::event_raised("Approval", Some("\"yes\""))],
        &h,
    );

    assert_completed(&turn, "\"yes\"");
    assert_eq!(turn.timers(), vec![(0, START_MS + 60_000)], "the timer request stays scheduled");
}

#[test]
fn timed_wait_times_out_when_the_timer_fires() {
    let h = typed_handler(|ctx, _input: ()| async move {
        match ctx
            .wait_for_external_event_with_timeout::<String>("Approval", Duration::from_secs(60))
            .await
        {
            Ok(answer) => Ok(answer),
            Err(WorkflowError::Timeout { name }) => Ok(format!("timed out waiting for {name}")),
            Err(e) => Err(e),
        }
    });
    let past = vec![started(None), HistoryEvent::timer_created(0, START_MS + 60_000)];
    let new = vec![HistoryEvent::timer_fired(0, START_MS + 60_000)];
    let turn = run_turn(past, new, &h);

    assert_completed(&turn, "\"timed out waiting for Approval\"");
    assert_eq!(turn.actions.len(), 1);
}

#[test]
fn unhandled_timeout_fails_with_timeout_type() {
    let h = typed_handler(|ctx, _input: ()| async move {
        let answer: String = ctx
            .wait_for_external_event_with_timeout("Approval", Duration::from_secs(1))
            .await?;
        Ok(answer)
    });
    let past = vec![started(None), HistoryEvent::timer_created(0, START_MS + 1_000)];
    let new = vec![HistoryEvent::timer_fired(0, START_MS + 1_000)];
    let turn = run_turn(past, new, &h);

    assert_eq!(turn.failure().error_type, error_types::TIMEOUT);
}

#[test]
fn abandoned_wait_leaves_its_event_for_the_next_wait() {
    let h = typed_handler(|ctx, _input: ()| async move {
        let wait = ctx.wait_for_external_event::<String>("E", None);
        drop(wait);
        let v: String = ctx.wait_for_external_event("E", None).await?;
        Ok(v)
    });
    let turn = run_turn(
        vec![started(None)],
        vec![HistoryEvent::event_raised("E", Some("\"kept\""))],
        &h,
    );

    assert_completed(&turn, "\"kept\"");
}
