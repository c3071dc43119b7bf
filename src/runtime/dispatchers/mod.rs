//! Work item handlers for the [`Worker`](super::Worker).
//!
//! - `orchestration`: assembles history, replays it and packages one orchestration turn
//! - `activity`: runs a single activity invocation

mod activity;
mod orchestration;
