//! Deterministic orchestration context.
//!
//! The context is rebuilt from history on every work item. Workflow code is
//! re-executed from the top; every await point it reaches consumes the next
//! sequence id, and that id is the only thing correlating the await with a
//! history event. Completions folded from history resolve task slots keyed by
//! id; actions the backend already acknowledged are never emitted again.

use crate::_typed_codec::{Codec, Json};
use crate::actions::{ActionKind, CompleteOrchestrationAction, OrchestrationStatus, OrchestratorAction, TaskRouter};
use crate::errors::{FailureDetails, WorkflowError};
use crate::futures::{DurableFuture, ExternalEventFuture, WaitState};
use crate::history::{EventKind, HistoryEvent};
use crate::retry::{ChildWorkflowOptions, RetryPolicy, TaskOptions};
use futures::future::{BoxFuture, Either};
use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Poll;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Namespace for instance ids that are not themselves UUIDs.
const INSTANCE_NAMESPACE: Uuid = Uuid::from_u128(0x5f0c_2a7e_91d4_4b8a_a3e6_0d7c_4e19_b2f8);

/// What an await point expects its completion to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    Activity,
    Timer,
    ChildWorkflow,
}

impl TaskKind {
    fn as_str(self) -> &'static str {
        match self {
            TaskKind::Activity => "activity",
            TaskKind::Timer => "timer",
            TaskKind::ChildWorkflow => "child workflow",
        }
    }
}

#[derive(Debug, Clone)]
enum TaskOutcome {
    Completed(Option<String>),
    Failed(FailureDetails),
    Fired,
}

#[derive(Debug)]
enum TaskSlot {
    /// Code reached the await; no completion folded yet.
    Open(TaskKind),
    /// Completion folded; waiting for code to claim it.
    Resolved { kind: TaskKind, outcome: TaskOutcome },
    Consumed,
    /// The await was canceled or dropped before resolution.
    Withdrawn,
    /// Code and history disagree about this id.
    Mismatched(String),
}

#[derive(Debug)]
struct ArrivedEvent {
    arrival: u64,
    name: String,
    payload: Option<String>,
}

/// Per-name FIFO. At most one of the two queues is non-empty.
#[derive(Debug, Default)]
struct EventQueue {
    arrived: VecDeque<ArrivedEvent>,
    waiters: VecDeque<u64>,
}

#[derive(Debug)]
struct CtxInner {
    instance_id: String,
    name: String,
    guid_namespace: Uuid,
    guid_counter: u64,
    sequence: i32,
    /// Timestamp of the newest "orchestration started" event folded.
    current_time_ms: u64,
    /// Turn timestamp under which each recorded id was scheduled.
    schedule_times: HashMap<i32, u64>,
    replaying: bool,
    pending_actions: BTreeMap<i32, OrchestratorAction>,
    /// Ids the backend already recorded, with the action kind and name it recorded.
    acknowledged: HashMap<i32, (&'static str, Option<String>)>,
    tasks: HashMap<i32, TaskSlot>,
    /// Ids whose completion came from past history.
    past_completions: HashSet<i32>,
    events: HashMap<String, EventQueue>,
    delivered: HashMap<u64, Option<String>>,
    next_waiter: u64,
    next_arrival: u64,
    custom_status: Option<String>,
    nondeterminism_error: Option<String>,
}

fn event_key(name: &str) -> String {
    name.to_lowercase()
}

fn acknowledged_kind(kind: &EventKind) -> Option<(&'static str, Option<String>)> {
    match kind {
        EventKind::TaskScheduled { name, .. } => Some(("ScheduleTask", Some(name.clone()))),
        EventKind::TimerCreated { .. } => Some(("CreateTimer", None)),
        EventKind::SubOrchestrationCreated { name, .. } => Some(("CreateSubOrchestration", Some(name.clone()))),
        EventKind::EventSent { name, .. } => Some(("SendEvent", Some(name.clone()))),
        _ => None,
    }
}

fn action_name(kind: &ActionKind) -> Option<&str> {
    match kind {
        ActionKind::ScheduleTask { name, .. }
        | ActionKind::CreateSubOrchestration { name, .. }
        | ActionKind::SendEvent { name, .. } => Some(name),
        ActionKind::CreateTimer { .. } | ActionKind::CompleteOrchestration(_) => None,
    }
}

fn completion_of(kind: &EventKind) -> Option<(i32, TaskKind, TaskOutcome)> {
    match kind {
        EventKind::TaskCompleted { task_scheduled_id, result } => Some((
            *task_scheduled_id,
            TaskKind::Activity,
            TaskOutcome::Completed(result.clone()),
        )),
        EventKind::TaskFailed { task_scheduled_id, failure } => Some((
            *task_scheduled_id,
            TaskKind::Activity,
            TaskOutcome::Failed(failure.clone()),
        )),
        EventKind::TimerFired { timer_id, .. } => Some((*timer_id, TaskKind::Timer, TaskOutcome::Fired)),
        EventKind::SubOrchestrationCompleted { task_scheduled_id, result } => Some((
            *task_scheduled_id,
            TaskKind::ChildWorkflow,
            TaskOutcome::Completed(result.clone()),
        )),
        EventKind::SubOrchestrationFailed { task_scheduled_id, failure } => Some((
            *task_scheduled_id,
            TaskKind::ChildWorkflow,
            TaskOutcome::Failed(failure.clone()),
        )),
        _ => None,
    }
}

impl CtxInner {
    fn new(instance_id: String, name: String) -> Self {
        let guid_namespace =
            Uuid::parse_str(&instance_id).unwrap_or_else(|_| Uuid::new_v5(&INSTANCE_NAMESPACE, instance_id.as_bytes()));
        Self {
            instance_id,
            name,
            guid_namespace,
            guid_counter: 0,
            sequence: 0,
            current_time_ms: 0,
            schedule_times: HashMap::new(),
            replaying: false,
            pending_actions: BTreeMap::new(),
            acknowledged: HashMap::new(),
            tasks: HashMap::new(),
            past_completions: HashSet::new(),
            events: HashMap::new(),
            delivered: HashMap::new(),
            next_waiter: 0,
            next_arrival: 0,
            custom_status: None,
            nondeterminism_error: None,
        }
    }

    fn next_id(&mut self) -> i32 {
        let id = self.sequence;
        self.sequence += 1;
        id
    }

    fn record_nondeterminism(&mut self, message: String) {
        tracing::warn!(
            target: "durable_worker::context",
            instance_id = %self.instance_id,
            error = %message,
            "Detected non-deterministic workflow"
        );
        if self.nondeterminism_error.is_none() {
            self.nondeterminism_error = Some(message);
        }
    }

    fn add_action(&mut self, id: i32, kind: ActionKind, router: Option<TaskRouter>) {
        let action = OrchestratorAction { id, kind, router };
        if let Some((recorded_kind, recorded_name)) = self.acknowledged.get(&id) {
            let same_kind = *recorded_kind == action.kind_name();
            let same_name = recorded_name.as_deref() == action_name(&action.kind);
            if !(same_kind && same_name) {
                let message = format!(
                    "history recorded {recorded_kind}({}) for id={id} but code issued {}({})",
                    recorded_name.as_deref().unwrap_or(""),
                    action.kind_name(),
                    action_name(&action.kind).unwrap_or("")
                );
                self.record_nondeterminism(message);
            }
            return;
        }
        self.pending_actions.insert(id, action);
    }

    fn open_task(&mut self, id: i32, kind: TaskKind) {
        let mismatch = match self.tasks.get(&id) {
            None => {
                self.tasks.insert(id, TaskSlot::Open(kind));
                None
            }
            Some(TaskSlot::Resolved { kind: resolved, .. }) if *resolved != kind => Some(format!(
                "completion kind mismatch for id={id}: history resolved a {} but code awaited a {}",
                resolved.as_str(),
                kind.as_str()
            )),
            Some(_) => None,
        };
        if let Some(message) = mismatch {
            self.tasks.insert(id, TaskSlot::Mismatched(message.clone()));
            self.record_nondeterminism(message);
        }
    }

    fn apply_schedule(&mut self, event: &HistoryEvent) {
        let Some((recorded_kind, recorded_name)) = acknowledged_kind(&event.kind) else {
            return;
        };
        let id = event.event_id;
        if let Some(action) = self.pending_actions.get(&id) {
            let same_kind = recorded_kind == action.kind_name();
            let same_name = recorded_name.as_deref() == action_name(&action.kind);
            if !(same_kind && same_name) {
                let message = format!(
                    "history recorded {}({}) for id={id} but code issued {}({})",
                    recorded_kind,
                    recorded_name.as_deref().unwrap_or(""),
                    action.kind_name(),
                    action_name(&action.kind).unwrap_or("")
                );
                self.record_nondeterminism(message);
            }
            self.pending_actions.remove(&id);
        }
        self.acknowledged.entry(id).or_insert((recorded_kind, recorded_name));
        self.schedule_times.entry(id).or_insert(self.current_time_ms);
    }

    /// Logical time at the current replay position: the turn that scheduled the
    /// next id, or the newest turn once past the recorded history.
    fn logical_time_ms(&self) -> u64 {
        self.schedule_times
            .get(&self.sequence)
            .copied()
            .unwrap_or(self.current_time_ms)
    }

    fn apply_completion(&mut self, id: i32, kind: TaskKind, outcome: TaskOutcome, from_past: bool) {
        let mismatch = match self.tasks.get(&id) {
            None => {
                self.tasks.insert(id, TaskSlot::Resolved { kind, outcome });
                None
            }
            Some(TaskSlot::Open(expected)) if *expected == kind => {
                self.tasks.insert(id, TaskSlot::Resolved { kind, outcome });
                None
            }
            Some(TaskSlot::Open(expected)) => Some(format!(
                "completion kind mismatch for id={id}: code awaited a {} but history resolved a {}",
                expected.as_str(),
                kind.as_str()
            )),
            Some(_) => {
                tracing::trace!(
                    target: "durable_worker::context",
                    instance_id = %self.instance_id,
                    task_id = id,
                    "Ignoring repeated completion for task with no open await"
                );
                return;
            }
        };
        if let Some(message) = mismatch {
            self.tasks.insert(id, TaskSlot::Mismatched(message.clone()));
            self.record_nondeterminism(message);
            return;
        }
        if from_past {
            self.past_completions.insert(id);
        }
    }

    fn apply_event_raised(&mut self, name: &str, payload: Option<String>) {
        let key = event_key(name);
        let queue = self.events.entry(key.clone()).or_default();
        if let Some(waiter) = queue.waiters.pop_front() {
            if queue.waiters.is_empty() && queue.arrived.is_empty() {
                self.events.remove(&key);
            }
            self.delivered.insert(waiter, payload);
            return;
        }
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        queue.arrived.push_back(ArrivedEvent {
            arrival,
            name: name.to_string(),
            payload,
        });
    }

    fn take_unclaimed_events(&mut self) -> Vec<HistoryEvent> {
        let mut unclaimed: Vec<ArrivedEvent> = self
            .events
            .values_mut()
            .flat_map(|queue| queue.arrived.drain(..))
            .collect();
        self.events.retain(|_, queue| !queue.waiters.is_empty());
        unclaimed.sort_by_key(|e| e.arrival);
        unclaimed
            .into_iter()
            .map(|e| {
                let mut event = HistoryEvent::event_raised(&e.name, e.payload.as_deref());
                event.timestamp_ms = self.current_time_ms;
                event
            })
            .collect()
    }
}

/// Handle passed to workflow code. Cheap to clone; all clones share one state machine.
#[derive(Clone)]
pub struct OrchestrationContext {
    inner: Arc<Mutex<CtxInner>>,
}

impl std::fmt::Debug for OrchestrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("OrchestrationContext")
            .field("instance_id", &inner.instance_id)
            .field("name", &inner.name)
            .field("sequence", &inner.sequence)
            .finish_non_exhaustive()
    }
}

impl OrchestrationContext {
    pub fn new(instance_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CtxInner::new(instance_id.into(), name.into()))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CtxInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn instance_id(&self) -> String {
        self.lock().instance_id.clone()
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    /// Logical time in epoch milliseconds.
    ///
    /// Depends only on the replay position: while re-executing recorded steps
    /// it is the timestamp of the turn that scheduled the next step, so every
    /// replay observes the same value at the same call site. Past the recorded
    /// history it is the timestamp of the newest turn. Workflow code must use
    /// this instead of reading the wall clock.
    pub fn current_utc_ms(&self) -> u64 {
        self.lock().logical_time_ms()
    }

    /// True while code is re-executing steps whose outcome came from past history.
    pub fn is_replaying(&self) -> bool {
        let inner = self.lock();
        inner.replaying || inner.past_completions.contains(&inner.sequence)
    }

    /// Next sequence id the workflow will consume.
    pub fn sequence_number(&self) -> i32 {
        self.lock().sequence
    }

    /// Fold history events into the state machine, in order.
    pub fn process_events(&self, events: &[HistoryEvent], is_replaying: bool) {
        let mut inner = self.lock();
        inner.replaying = is_replaying;
        for event in events {
            tracing::trace!(
                target: "durable_worker::context",
                instance_id = %inner.instance_id,
                event_id = event.event_id,
                kind = event.kind_name(),
                replaying = is_replaying,
                "Folding history event"
            );
            match &event.kind {
                EventKind::ExecutionStarted { .. } | EventKind::OrchestratorStarted => {
                    inner.current_time_ms = event.timestamp_ms;
                }
                EventKind::TaskScheduled { .. }
                | EventKind::TimerCreated { .. }
                | EventKind::SubOrchestrationCreated { .. }
                | EventKind::EventSent { .. } => inner.apply_schedule(event),
                EventKind::EventRaised { name, input } => inner.apply_event_raised(name, input.clone()),
                EventKind::ExecutionCompleted { .. } => {}
                other => {
                    if let Some((id, kind, outcome)) = completion_of(other) {
                        inner.apply_completion(id, kind, outcome, is_replaying);
                    }
                }
            }
        }
        inner.replaying = false;
    }

    // ------------------------------------------------------------------
    // Activities
    // ------------------------------------------------------------------

    /// Schedule an activity and await its result.
    ///
    /// The sequence id is consumed when this method is called, not when the
    /// returned future is first polled. With a retry policy, failed attempts
    /// are retried after a durable timer; each attempt and each timer consume
    /// their own ids.
    pub fn call_activity<I, O>(
        &self,
        name: &str,
        input: &I,
        options: Option<TaskOptions>,
    ) -> BoxFuture<'static, Result<O, WorkflowError>>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned + Send + 'static,
    {
        let encoded = match Json::encode(input) {
            Ok(s) => Some(s),
            Err(e) => return futures::future::ready(Err(e)).boxed(),
        };
        let options = options.unwrap_or_default();
        let router = options.router();
        let first = self.schedule_activity_raw(name, encoded.clone(), router.clone());
        match options.retry_policy {
            None => first.map(|r| r.and_then(|raw| Json::decode_opt(raw.as_deref()))).boxed(),
            Some(policy) => {
                let name = name.to_string();
                retry_loop(self.clone(), policy, first, move |ctx| {
                    ctx.schedule_activity_raw(&name, encoded.clone(), router.clone())
                })
                .map(|r| r.and_then(|raw| Json::decode_opt(raw.as_deref())))
                .boxed()
            }
        }
    }

    /// Schedule an activity with an already-serialized input.
    pub fn schedule_activity_raw(&self, name: &str, input: Option<String>, router: Option<TaskRouter>) -> DurableFuture {
        let mut inner = self.lock();
        let id = inner.next_id();
        inner.add_action(
            id,
            ActionKind::ScheduleTask {
                name: name.to_string(),
                input,
            },
            router,
        );
        inner.open_task(id, TaskKind::Activity);
        drop(inner);
        self.durable(id, TaskKind::Activity, None)
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Durable timer firing at `fire_at_ms`.
    ///
    /// Canceling `cancel` before the timer fires releases the local await with
    /// [`WorkflowError::Canceled`]; the timer request itself stays scheduled.
    pub fn create_timer(&self, fire_at_ms: u64, cancel: Option<CancellationToken>) -> DurableFuture {
        let mut inner = self.lock();
        let id = inner.next_id();
        inner.add_action(id, ActionKind::CreateTimer { fire_at_ms }, None);
        inner.open_task(id, TaskKind::Timer);
        drop(inner);
        self.durable(id, TaskKind::Timer, cancel)
    }

    pub fn create_timer_after(&self, delay: Duration, cancel: Option<CancellationToken>) -> DurableFuture {
        let fire_at_ms = self
            .current_utc_ms()
            .saturating_add(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        self.create_timer(fire_at_ms, cancel)
    }

    // ------------------------------------------------------------------
    // External events
    // ------------------------------------------------------------------

    /// Wait for the next event raised under `name` (case-insensitive).
    pub fn wait_for_external_event<T>(
        &self,
        name: &str,
        cancel: Option<CancellationToken>,
    ) -> BoxFuture<'static, Result<T, WorkflowError>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.wait_for_external_event_raw(name, cancel)
            .map(|r| r.and_then(|raw| Json::decode_opt(raw.as_deref())))
            .boxed()
    }

    pub fn wait_for_external_event_raw(&self, name: &str, cancel: Option<CancellationToken>) -> ExternalEventFuture {
        let mut inner = self.lock();
        let key = event_key(name);
        let queue = inner.events.entry(key.clone()).or_default();
        let state = match queue.arrived.pop_front() {
            Some(event) => {
                if queue.arrived.is_empty() && queue.waiters.is_empty() {
                    inner.events.remove(&key);
                }
                WaitState::Ready(event.payload)
            }
            None => {
                let waiter = inner.next_waiter;
                inner.next_waiter += 1;
                inner.events.entry(key.clone()).or_default().waiters.push_back(waiter);
                WaitState::Waiting(waiter)
            }
        };
        drop(inner);
        ExternalEventFuture {
            ctx: self.clone(),
            name: key,
            state,
            cancel,
        }
    }

    /// Wait for an external event, giving up after `timeout` of durable time.
    pub fn wait_for_external_event_with_timeout<T>(
        &self,
        name: &str,
        timeout: Duration,
    ) -> BoxFuture<'static, Result<T, WorkflowError>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let wait = self.wait_for_external_event_raw(name, None);
        let timer = self.create_timer_after(timeout, None);
        let name = name.to_string();
        async move {
            match futures::future::select(wait, timer).await {
                Either::Left((payload, _timer)) => Json::decode_opt(payload?.as_deref()),
                Either::Right((fired, _wait)) => {
                    fired?;
                    Err(WorkflowError::Timeout { name })
                }
            }
        }
        .boxed()
    }

    /// Fire-and-forget event to another instance.
    pub fn send_event<I: Serialize + ?Sized>(&self, instance_id: &str, name: &str, payload: &I) -> Result<(), WorkflowError> {
        let data = Json::encode(payload)?;
        let mut inner = self.lock();
        let id = inner.next_id();
        inner.add_action(
            id,
            ActionKind::SendEvent {
                instance_id: instance_id.to_string(),
                name: name.to_string(),
                data: Some(data),
            },
            None,
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Child workflows
    // ------------------------------------------------------------------

    /// Start a child workflow and await its result.
    ///
    /// Without an explicit instance id the child id comes from [`new_guid`](Self::new_guid),
    /// generated before the sequence id is consumed.
    pub fn call_child_workflow<I, O>(
        &self,
        name: &str,
        input: &I,
        options: Option<ChildWorkflowOptions>,
    ) -> BoxFuture<'static, Result<O, WorkflowError>>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned + Send + 'static,
    {
        let encoded = match Json::encode(input) {
            Ok(s) => Some(s),
            Err(e) => return futures::future::ready(Err(e)).boxed(),
        };
        let options = options.unwrap_or_default();
        let router = options.router();
        let first = self.schedule_child_raw(name, options.instance_id.clone(), encoded.clone(), router.clone());
        match options.retry_policy {
            None => first.map(|r| r.and_then(|raw| Json::decode_opt(raw.as_deref()))).boxed(),
            Some(policy) => {
                let name = name.to_string();
                let instance_id = options.instance_id;
                retry_loop(self.clone(), policy, first, move |ctx| {
                    ctx.schedule_child_raw(&name, instance_id.clone(), encoded.clone(), router.clone())
                })
                .map(|r| r.and_then(|raw| Json::decode_opt(raw.as_deref())))
                .boxed()
            }
        }
    }

    pub fn schedule_child_raw(
        &self,
        name: &str,
        instance_id: Option<String>,
        input: Option<String>,
        router: Option<TaskRouter>,
    ) -> DurableFuture {
        let child_instance_id = instance_id.unwrap_or_else(|| self.new_guid().to_string());
        let mut inner = self.lock();
        let id = inner.next_id();
        inner.add_action(
            id,
            ActionKind::CreateSubOrchestration {
                name: name.to_string(),
                instance_id: child_instance_id,
                input,
            },
            router,
        );
        inner.open_task(id, TaskKind::ChildWorkflow);
        drop(inner);
        self.durable(id, TaskKind::ChildWorkflow, None)
    }

    // ------------------------------------------------------------------
    // Completion, identifiers, status
    // ------------------------------------------------------------------

    /// Restart the instance with `input` once this turn returns.
    ///
    /// With `preserve_unprocessed_events`, every buffered event that no wait
    /// has claimed is forwarded into the next execution.
    pub fn continue_as_new<I: Serialize + ?Sized>(
        &self,
        input: &I,
        preserve_unprocessed_events: bool,
    ) -> Result<(), WorkflowError> {
        let encoded = Json::encode(input)?;
        let mut inner = self.lock();
        let id = inner.next_id();
        let carryover_events = if preserve_unprocessed_events {
            inner.take_unclaimed_events()
        } else {
            Vec::new()
        };
        tracing::debug!(
            target: "durable_worker::context",
            instance_id = %inner.instance_id,
            carryover = carryover_events.len(),
            "Continuing as new"
        );
        inner.add_action(
            id,
            ActionKind::CompleteOrchestration(CompleteOrchestrationAction {
                status: OrchestrationStatus::ContinuedAsNew,
                result: Some(encoded),
                failure: None,
                carryover_events,
            }),
            None,
        );
        Ok(())
    }

    /// Deterministic UUID v5 from the instance namespace and a local counter.
    ///
    /// The name hashed is `"{instance_id}_{counter}"`. When the instance id is
    /// a UUID it is the namespace; otherwise the namespace is itself a v5
    /// UUID of the instance id.
    pub fn new_guid(&self) -> Uuid {
        let mut inner = self.lock();
        let counter = inner.guid_counter;
        inner.guid_counter += 1;
        let name = format!("{}_{}", inner.instance_id, counter);
        Uuid::new_v5(&inner.guid_namespace, name.as_bytes())
    }

    pub fn set_custom_status<S: Serialize + ?Sized>(&self, status: &S) -> Result<(), WorkflowError> {
        let encoded = Json::encode(status)?;
        self.lock().custom_status = Some(encoded);
        Ok(())
    }

    pub fn clear_custom_status(&self) {
        self.lock().custom_status = None;
    }

    pub fn custom_status(&self) -> Option<String> {
        self.lock().custom_status.clone()
    }

    /// Snapshot of actions not yet acknowledged by history, ordered by id.
    pub fn pending_actions(&self) -> Vec<OrchestratorAction> {
        self.lock().pending_actions.values().cloned().collect()
    }

    pub(crate) fn take_pending_actions(&self) -> Vec<OrchestratorAction> {
        std::mem::take(&mut self.lock().pending_actions).into_values().collect()
    }

    /// First history/code disagreement recorded during this turn.
    pub fn nondeterminism_error(&self) -> Option<String> {
        self.lock().nondeterminism_error.clone()
    }

    // ------------------------------------------------------------------
    // Hooks used by the durable futures
    // ------------------------------------------------------------------

    fn durable(&self, id: i32, kind: TaskKind, cancel: Option<CancellationToken>) -> DurableFuture {
        DurableFuture {
            ctx: self.clone(),
            id,
            kind,
            cancel,
            done: false,
        }
    }

    pub(crate) fn poll_task(
        &self,
        id: i32,
        kind: TaskKind,
        cancel: Option<&CancellationToken>,
    ) -> Poll<Result<Option<String>, WorkflowError>> {
        let mut inner = self.lock();
        match inner.tasks.get(&id) {
            Some(TaskSlot::Resolved { .. }) => {
                let Some(TaskSlot::Resolved { outcome, .. }) = inner.tasks.insert(id, TaskSlot::Consumed) else {
                    return Poll::Pending;
                };
                Poll::Ready(match outcome {
                    TaskOutcome::Completed(result) => Ok(result),
                    TaskOutcome::Fired => Ok(None),
                    TaskOutcome::Failed(details) => Err(WorkflowError::TaskFailed { details }),
                })
            }
            Some(TaskSlot::Mismatched(message)) => Poll::Ready(Err(WorkflowError::Nondeterminism(message.clone()))),
            Some(TaskSlot::Consumed) | Some(TaskSlot::Withdrawn) => Poll::Pending,
            Some(TaskSlot::Open(_)) | None => {
                if cancel.is_some_and(CancellationToken::is_cancelled) {
                    tracing::debug!(
                        target: "durable_worker::context",
                        instance_id = %inner.instance_id,
                        task_id = id,
                        kind = kind.as_str(),
                        "Await canceled before resolution"
                    );
                    inner.tasks.insert(id, TaskSlot::Withdrawn);
                    return Poll::Ready(Err(WorkflowError::Canceled));
                }
                Poll::Pending
            }
        }
    }

    pub(crate) fn withdraw_task(&self, id: i32) {
        let mut inner = self.lock();
        if let Some(TaskSlot::Open(_)) = inner.tasks.get(&id) {
            inner.tasks.insert(id, TaskSlot::Withdrawn);
        }
    }

    pub(crate) fn poll_waiter(
        &self,
        key: &str,
        waiter: u64,
        cancel: Option<&CancellationToken>,
    ) -> Poll<Result<Option<String>, WorkflowError>> {
        let mut inner = self.lock();
        if let Some(payload) = inner.delivered.remove(&waiter) {
            return Poll::Ready(Ok(payload));
        }
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            remove_waiter(&mut inner, key, waiter);
            return Poll::Ready(Err(WorkflowError::Canceled));
        }
        Poll::Pending
    }

    pub(crate) fn withdraw_waiter(&self, key: &str, waiter: u64) {
        let mut inner = self.lock();
        match inner.delivered.remove(&waiter) {
            Some(payload) => requeue_front(&mut inner, key, payload),
            None => remove_waiter(&mut inner, key, waiter),
        }
    }

    pub(crate) fn return_unclaimed(&self, key: &str, payload: Option<String>) {
        let mut inner = self.lock();
        requeue_front(&mut inner, key, payload);
    }
}

fn remove_waiter(inner: &mut CtxInner, key: &str, waiter: u64) {
    if let Some(queue) = inner.events.get_mut(key) {
        queue.waiters.retain(|w| *w != waiter);
        if queue.waiters.is_empty() && queue.arrived.is_empty() {
            inner.events.remove(key);
        }
    }
}

/// Give an unconsumed payload back to the head of its queue, or to the next waiter.
fn requeue_front(inner: &mut CtxInner, key: &str, payload: Option<String>) {
    let queue = inner.events.entry(key.to_string()).or_default();
    if let Some(next) = queue.waiters.pop_front() {
        if queue.waiters.is_empty() {
            inner.events.remove(key);
        }
        inner.delivered.insert(next, payload);
        return;
    }
    let arrival = queue.arrived.front().map_or(inner.next_arrival, |e| e.arrival.saturating_sub(1));
    queue.arrived.push_front(ArrivedEvent {
        arrival,
        name: key.to_string(),
        payload,
    });
}

fn retry_loop<S>(
    ctx: OrchestrationContext,
    policy: RetryPolicy,
    first: DurableFuture,
    schedule: S,
) -> BoxFuture<'static, Result<Option<String>, WorkflowError>>
where
    S: Fn(&OrchestrationContext) -> DurableFuture + Send + 'static,
{
    async move {
        let mut attempt = 1u32;
        let mut waited = Duration::ZERO;
        let mut current = first;
        loop {
            match current.await {
                Ok(result) => return Ok(result),
                Err(WorkflowError::TaskFailed { details }) if policy.should_retry(attempt, waited) => {
                    let delay = policy.next_delay(attempt);
                    tracing::debug!(
                        target: "durable_worker::context",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %details,
                        "Retrying failed task after durable delay"
                    );
                    ctx.create_timer_after(delay, None).await?;
                    waited += delay;
                    attempt += 1;
                    current = schedule(&ctx);
                }
                Err(e) => return Err(e),
            }
        }
    }
    .boxed()
}
