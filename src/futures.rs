//! Durable futures handed to workflow code.
//!
//! None of these futures ever registers a waker. The replay engine polls the
//! workflow exactly once per turn with a no-op waker, so a future is either
//! resolvable from folded history right now or it stays pending until the
//! next work item.

use crate::context::{OrchestrationContext, TaskKind};
use crate::errors::WorkflowError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
use tokio_util::sync::CancellationToken;

/// Await point correlated with one sequence id (activity, timer or child workflow).
pub struct DurableFuture {
    pub(crate) ctx: OrchestrationContext,
    pub(crate) id: i32,
    pub(crate) kind: TaskKind,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) done: bool,
}

impl DurableFuture {
    /// Sequence id this await point was assigned.
    pub fn id(&self) -> i32 {
        self.id
    }
}

impl Future for DurableFuture {
    type Output = Result<Option<String>, WorkflowError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.done {
            return Poll::Pending;
        }
        let polled = this.ctx.poll_task(this.id, this.kind, this.cancel.as_ref());
        if polled.is_ready() {
            this.done = true;
        }
        polled
    }
}

impl Drop for DurableFuture {
    fn drop(&mut self) {
        if !self.done {
            self.ctx.withdraw_task(self.id);
        }
    }
}

pub(crate) enum WaitState {
    /// Satisfied from the buffer when the wait was issued.
    Ready(Option<String>),
    Waiting(u64),
    Done,
}

/// Local wait on a named external event. Never produces an action.
pub struct ExternalEventFuture {
    pub(crate) ctx: OrchestrationContext,
    pub(crate) name: String,
    pub(crate) state: WaitState,
    pub(crate) cancel: Option<CancellationToken>,
}

impl Future for ExternalEventFuture {
    type Output = Result<Option<String>, WorkflowError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.state, WaitState::Done) {
            WaitState::Ready(payload) => Poll::Ready(Ok(payload)),
            WaitState::Waiting(waiter) => match this.ctx.poll_waiter(&this.name, waiter, this.cancel.as_ref()) {
                Poll::Ready(out) => Poll::Ready(out),
                Poll::Pending => {
                    this.state = WaitState::Waiting(waiter);
                    Poll::Pending
                }
            },
            WaitState::Done => Poll::Pending,
        }
    }
}

impl Drop for ExternalEventFuture {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.state, WaitState::Done) {
            WaitState::Ready(payload) => self.ctx.return_unclaimed(&self.name, payload),
            WaitState::Waiting(waiter) => self.ctx.withdraw_waiter(&self.name, waiter),
            WaitState::Done => {}
        }
    }
}

pub(crate) fn noop_waker() -> Waker {
    unsafe fn clone(_: *const ()) -> RawWaker {
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    unsafe fn wake(_: *const ()) {}
    unsafe fn wake_by_ref(_: *const ()) {}
    unsafe fn drop(_: *const ()) {}
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);
    // SAFETY: every vtable entry ignores the data pointer, so a null pointer is never dereferenced.
    unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
}

/// Poll a pinned future exactly once with a no-op waker.
pub(crate) fn poll_once<F: Future + ?Sized>(fut: Pin<&mut F>) -> Poll<F::Output> {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    fut.poll(&mut cx)
}
