//! Replay engine tests: history folding, action emission and determinism
//! enforcement for a single orchestration turn.

mod helpers;

mod continue_as_new;
mod external_events;
mod fresh_execution;
mod retries;
mod timers_and_cancellation;
