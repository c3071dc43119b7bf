//! Channel-backed provider for tests and local demos.
//!
//! Work items are pushed through an [`InMemoryHandle`]; responses are
//! recorded and can be awaited from the handle.

use super::{
    ActivityResponse, HistoryChunk, OrchestrationResponse, Provider, ProviderError, WorkItem,
};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

#[derive(Default)]
struct Shared {
    orchestration_responses: Mutex<Vec<OrchestrationResponse>>,
    activity_responses: Mutex<Vec<ActivityResponse>>,
    histories: Mutex<HashMap<String, Vec<HistoryChunk>>>,
    completion_error: Mutex<Option<ProviderError>>,
    responded: Notify,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct InMemoryProvider {
    work_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<WorkItem>>,
    shared: Arc<Shared>,
}

/// Producer side of an [`InMemoryProvider`].
#[derive(Clone)]
pub struct InMemoryHandle {
    work_tx: Arc<Mutex<Option<mpsc::UnboundedSender<WorkItem>>>>,
    shared: Arc<Shared>,
}

impl InMemoryProvider {
    pub fn new() -> (Self, InMemoryHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        (
            Self {
                work_rx: tokio::sync::Mutex::new(rx),
                shared: shared.clone(),
            },
            InMemoryHandle {
                work_tx: Arc::new(Mutex::new(Some(tx))),
                shared,
            },
        )
    }

    fn completion_error(&self) -> Option<ProviderError> {
        lock(&self.shared.completion_error).clone()
    }
}

#[async_trait::async_trait]
impl Provider for InMemoryProvider {
    async fn next_work_item(&self) -> Result<Option<WorkItem>, ProviderError> {
        Ok(self.work_rx.lock().await.recv().await)
    }

    async fn complete_orchestration(&self, response: OrchestrationResponse) -> Result<(), ProviderError> {
        if let Some(err) = self.completion_error() {
            return Err(err);
        }
        lock(&self.shared.orchestration_responses).push(response);
        self.shared.responded.notify_waiters();
        Ok(())
    }

    async fn complete_activity(&self, response: ActivityResponse) -> Result<(), ProviderError> {
        if let Some(err) = self.completion_error() {
            return Err(err);
        }
        lock(&self.shared.activity_responses).push(response);
        self.shared.responded.notify_waiters();
        Ok(())
    }

    fn stream_instance_history(
        &self,
        instance_id: &str,
        _execution_id: Option<&str>,
    ) -> BoxStream<'static, Result<HistoryChunk, ProviderError>> {
        match lock(&self.shared.histories).get(instance_id) {
            Some(chunks) => futures::stream::iter(chunks.clone().into_iter().map(Ok)).boxed(),
            None => futures::stream::once(futures::future::ready(Err(ProviderError::permanent(
                "stream_instance_history",
                format!("no history stored for instance '{instance_id}'"),
            ))))
            .boxed(),
        }
    }
}

impl InMemoryHandle {
    /// Queue a work item. Returns false once the handle was closed.
    pub fn enqueue(&self, item: WorkItem) -> bool {
        match lock(&self.work_tx).as_ref() {
            Some(tx) => tx.send(item).is_ok(),
            None => false,
        }
    }

    /// End the work item stream; the worker drains in-flight items and returns.
    pub fn close(&self) {
        lock(&self.work_tx).take();
    }

    /// History served by the streaming fetch for `instance_id`.
    pub fn set_history(&self, instance_id: &str, chunks: Vec<HistoryChunk>) {
        lock(&self.shared.histories).insert(instance_id.to_string(), chunks);
    }

    /// Make every subsequent completion call fail with `err` (or succeed again with `None`).
    pub fn set_completion_error(&self, err: Option<ProviderError>) {
        *lock(&self.shared.completion_error) = err;
    }

    pub fn orchestration_responses(&self) -> Vec<OrchestrationResponse> {
        lock(&self.shared.orchestration_responses).clone()
    }

    pub fn activity_responses(&self) -> Vec<ActivityResponse> {
        lock(&self.shared.activity_responses).clone()
    }

    fn response_count(&self) -> usize {
        lock(&self.shared.orchestration_responses).len() + lock(&self.shared.activity_responses).len()
    }

    /// Wait until at least `count` responses of either kind were recorded.
    pub async fn wait_for_responses(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.shared.responded.notified();
                if self.response_count() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}
