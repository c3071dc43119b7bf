//! Continue-as-new completions and carry-over of unclaimed events.

use super::helpers::*;
use durable_worker::runtime::replay_engine::TurnResult;
use durable_worker::{EventKind, HistoryEvent, OrchestrationStatus};

fn carried_names_and_payloads(turn: &Turn) -> Vec<(String, Option<String>)> {
    turn.completion()
        .unwrap()
        .carryover_events
        .iter()
        .map(|e| match &e.kind {
            EventKind::EventRaised { name, input } => (name.clone(), input.clone()),
            other => panic!("unexpected carried event {other:?}"),
        })
        .collect()
}

#[test]
fn continue_as_new_carries_unclaimed_events() {
    let h = typed_handler(|ctx, round: u32| async move {
        ctx.continue_as_new(&(round + 1), true)?;
        Ok(())
    });
    let new = vec![HistoryEvent::event_raised("Extra", Some("\"payload\""))];
    let turn = run_turn(vec![started(Some("1"))], new, &h);

    assert_eq!(turn.result, TurnResult::ContinuedAsNew);
    assert_eq!(turn.actions.len(), 1, "no separate completion is appended");
    let completion = turn.completion().unwrap();
    assert_eq!(completion.status, OrchestrationStatus::ContinuedAsNew);
    assert_eq!(completion.result.as_deref(), Some("2"));
    assert_eq!(
        carried_names_and_payloads(&turn),
        vec![("Extra".to_string(), Some("\"payload\"".to_string()))]
    );
}

#[test]
fn continue_as_new_without_preserve_drops_events() {
    let h = typed_handler(|ctx, _input: ()| async move {
        ctx.continue_as_new(&(), false)?;
        Ok(())
    });
    let new = vec![HistoryEvent::event_raised("Extra", Some("1"))];
    let turn = run_turn(vec![started(None)], new, &h);

    assert!(turn.completion().unwrap().carryover_events.is_empty());
}

#[test]
fn claimed_events_are_not_carried_and_order_is_kept() {
    let h = typed_handler(|ctx, _input: ()| async move {
        let _first: i32 = ctx.wait_for_external_event("Job", None).await?;
        ctx.continue_as_new(&(), true)?;
        Ok(())
    });
    let new = vec![
        HistoryEvent::event_raised("Job", Some("1")),
        HistoryEvent::event_raised("Cancel", Some("\"now\"")),
        HistoryEvent::event_raised("Job", Some("2")),
    ];
    let turn = run_turn(vec![started(None)], new, &h);

    assert_eq!(
        carried_names_and_payloads(&turn),
        vec![
            ("Cancel".to_string(), Some("\"now\"".to_string())),
            ("Job".to_string(), Some("2".to_string())),
        ]
    );
}

#[test]
fn continue_as_new_consumes_a_sequence_id() {
    let h = typed_handler(|ctx, _input: ()| async move {
        let n: i32 = ctx.call_activity("Count", &(), None).await?;
        ctx.continue_as_new(&n, false)?;
        Ok(())
    });
    let past = vec![
        started(None),
        HistoryEvent::task_scheduled(0, "Count", None),
        HistoryEvent::task_completed(0, Some("3")),
    ];
    let turn = run_turn(past, vec![], &h);

    assert_eq!(turn.actions.len(), 1);
    assert_eq!(turn.actions[0].id, 1);
    assert_eq!(turn.completion().unwrap().result.as_deref(), Some("3"));
}

#[test]
fn continue_as_new_keeps_earlier_actions() {
    let h = typed_handler(|ctx, _input: ()| async move {
        ctx.send_event("peer", "Handoff", &42)?;
        ctx.continue_as_new(&(), false)?;
        Ok(())
    });
    let turn = run_turn(vec![started(None)], vec![], &h);

    assert_eq!(turn.result, TurnResult::ContinuedAsNew);
    let ids: Vec<i32> = turn.actions.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![0, 1]);
    assert!(turn.actions[1].is_continue_as_new());
}
