//! Worker runtime: handler traits, registry, replay engine and dispatch loop.

use crate::_typed_codec::{Codec, Json};
use crate::errors::WorkflowError;
use crate::providers::{Provider, WorkItem};
use crate::OrchestrationContext;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub mod dispatchers;
pub mod limits;
pub mod observability;
pub mod registry;
pub mod replay_engine;
pub mod scope;

pub use observability::{LogFormat, MetricsSnapshot, ObservabilityConfig, WorkerMetrics, init_tracing};
pub use registry::{Registry, RegistryBuilder, RegistryError};
pub use scope::{Scope, Services, ServicesBuilder};

/// Type-erased workflow entry point invoked by the replay engine.
#[async_trait]
pub trait OrchestrationHandler: Send + Sync {
    async fn invoke(&self, ctx: OrchestrationContext, input: Option<String>) -> Result<Option<String>, WorkflowError>;

    /// Declared input type, for diagnostics.
    fn input_type(&self) -> &'static str {
        "string"
    }

    /// Declared output type, for diagnostics.
    fn output_type(&self) -> &'static str {
        "string"
    }
}

/// Type-erased activity entry point.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn invoke(&self, ctx: ActivityContext, input: Option<String>) -> Result<Option<String>, WorkflowError>;

    fn input_type(&self) -> &'static str {
        "string"
    }

    fn output_type(&self) -> &'static str {
        "string"
    }
}

/// Typed workflow definition.
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    type Input: DeserializeOwned + Send + 'static;
    type Output: Serialize + Send + 'static;

    async fn run(&self, ctx: OrchestrationContext, input: Self::Input) -> Result<Self::Output, WorkflowError>;
}

/// Typed activity definition.
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    type Input: DeserializeOwned + Send + 'static;
    type Output: Serialize + Send + 'static;

    async fn run(&self, ctx: ActivityContext, input: Self::Input) -> Result<Self::Output, WorkflowError>;
}

/// Adapts a [`Workflow`] to [`OrchestrationHandler`].
pub struct TypedWorkflow<W>(pub W);

#[async_trait]
impl<W: Workflow> OrchestrationHandler for TypedWorkflow<W> {
    async fn invoke(&self, ctx: OrchestrationContext, input: Option<String>) -> Result<Option<String>, WorkflowError> {
        let input: W::Input = Json::decode_opt(input.as_deref())?;
        let output = self.0.run(ctx, input).await?;
        Json::encode(&output).map(Some)
    }

    fn input_type(&self) -> &'static str {
        std::any::type_name::<W::Input>()
    }

    fn output_type(&self) -> &'static str {
        std::any::type_name::<W::Output>()
    }
}

/// Adapts an [`Activity`] to [`ActivityHandler`].
pub struct TypedActivity<A>(pub A);

#[async_trait]
impl<A: Activity> ActivityHandler for TypedActivity<A> {
    async fn invoke(&self, ctx: ActivityContext, input: Option<String>) -> Result<Option<String>, WorkflowError> {
        let input: A::Input = Json::decode_opt(input.as_deref())?;
        let output = self.0.run(ctx, input).await?;
        Json::encode(&output).map(Some)
    }

    fn input_type(&self) -> &'static str {
        std::any::type_name::<A::Input>()
    }

    fn output_type(&self) -> &'static str {
        std::any::type_name::<A::Output>()
    }
}

/// Function wrapper that implements [`OrchestrationHandler`].
pub struct FnOrchestration<F> {
    f: F,
    input_type: &'static str,
    output_type: &'static str,
}

impl<F, Fut> FnOrchestration<F>
where
    F: Fn(OrchestrationContext, Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<String>, WorkflowError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            input_type: "string",
            output_type: "string",
        }
    }
}

type BoxedResult = futures::future::BoxFuture<'static, Result<Option<String>, WorkflowError>>;

/// Wrap a typed workflow function; input and output go through the JSON codec.
pub fn typed_orchestration<In, Out, G, GFut>(
    g: G,
) -> FnOrchestration<impl Fn(OrchestrationContext, Option<String>) -> BoxedResult + Send + Sync + 'static>
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
    G: Fn(OrchestrationContext, In) -> GFut + Send + Sync + 'static,
    GFut: Future<Output = Result<Out, WorkflowError>> + Send + 'static,
{
    let g = Arc::new(g);
    FnOrchestration {
        f: move |ctx: OrchestrationContext, input: Option<String>| -> BoxedResult {
            let g = g.clone();
            Box::pin(async move {
                let input: In = Json::decode_opt(input.as_deref())?;
                let output = g(ctx, input).await?;
                Json::encode(&output).map(Some)
            })
        },
        input_type: std::any::type_name::<In>(),
        output_type: std::any::type_name::<Out>(),
    }
}

/// Wrap a typed activity function; input and output go through the JSON codec.
pub fn typed_activity<In, Out, G, GFut>(
    g: G,
) -> FnActivity<impl Fn(ActivityContext, Option<String>) -> BoxedResult + Send + Sync + 'static>
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
    G: Fn(ActivityContext, In) -> GFut + Send + Sync + 'static,
    GFut: Future<Output = Result<Out, WorkflowError>> + Send + 'static,
{
    let g = Arc::new(g);
    FnActivity {
        f: move |ctx: ActivityContext, input: Option<String>| -> BoxedResult {
            let g = g.clone();
            Box::pin(async move {
                let input: In = Json::decode_opt(input.as_deref())?;
                let output = g(ctx, input).await?;
                Json::encode(&output).map(Some)
            })
        },
        input_type: std::any::type_name::<In>(),
        output_type: std::any::type_name::<Out>(),
    }
}

#[async_trait]
impl<F, Fut> OrchestrationHandler for FnOrchestration<F>
where
    F: Fn(OrchestrationContext, Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<String>, WorkflowError>> + Send + 'static,
{
    async fn invoke(&self, ctx: OrchestrationContext, input: Option<String>) -> Result<Option<String>, WorkflowError> {
        (self.f)(ctx, input).await
    }

    fn input_type(&self) -> &'static str {
        self.input_type
    }

    fn output_type(&self) -> &'static str {
        self.output_type
    }
}

/// Function wrapper that implements [`ActivityHandler`].
pub struct FnActivity<F> {
    f: F,
    input_type: &'static str,
    output_type: &'static str,
}

impl<F, Fut> FnActivity<F>
where
    F: Fn(ActivityContext, Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<String>, WorkflowError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            input_type: "string",
            output_type: "string",
        }
    }
}

#[async_trait]
impl<F, Fut> ActivityHandler for FnActivity<F>
where
    F: Fn(ActivityContext, Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<String>, WorkflowError>> + Send + 'static,
{
    async fn invoke(&self, ctx: ActivityContext, input: Option<String>) -> Result<Option<String>, WorkflowError> {
        (self.f)(ctx, input).await
    }

    fn input_type(&self) -> &'static str {
        self.input_type
    }

    fn output_type(&self) -> &'static str {
        self.output_type
    }
}

/// Context handed to activity code.
#[derive(Clone, Debug)]
pub struct ActivityContext {
    instance_id: String,
    activity_name: String,
    task_id: i32,
    task_execution_id: Option<String>,
    scope: Arc<Scope>,
}

impl ActivityContext {
    /// The worker builds one per activity request; tests may build their own.
    pub fn new(
        instance_id: String,
        activity_name: String,
        task_id: i32,
        task_execution_id: Option<String>,
        scope: Arc<Scope>,
    ) -> Self {
        Self {
            instance_id,
            activity_name,
            task_id,
            task_execution_id,
            scope,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn activity_name(&self) -> &str {
        &self.activity_name
    }

    pub fn task_id(&self) -> i32 {
        self.task_id
    }

    pub fn task_execution_id(&self) -> Option<&str> {
        self.task_execution_id.as_deref()
    }

    /// Resolve a service from this work item's scope.
    pub fn service<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.scope.get::<T>()
    }

    pub fn trace_info(&self, message: impl Into<String>) {
        tracing::info!(
            target: "durable_worker::activity",
            instance_id = %self.instance_id,
            activity_name = %self.activity_name,
            task_id = self.task_id,
            "{}",
            message.into()
        );
    }

    pub fn trace_error(&self, message: impl Into<String>) {
        tracing::error!(
            target: "durable_worker::activity",
            instance_id = %self.instance_id,
            activity_name = %self.activity_name,
            task_id = self.task_id,
            "{}",
            message.into()
        );
    }
}

/// Configuration options for the [`Worker`].
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct WorkerOptions {
    /// Maximum orchestration work items processed at once.
    /// Default: 100
    pub max_concurrent_orchestrations: usize,
    /// Maximum activity work items processed at once.
    /// Default: 100
    pub max_concurrent_activities: usize,
    pub observability: ObservabilityConfig,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_orchestrations: 100,
            max_concurrent_activities: 100,
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    #[error("max_concurrent_orchestrations must be greater than zero")]
    ZeroOrchestrationConcurrency,
    #[error("max_concurrent_activities must be greater than zero")]
    ZeroActivityConcurrency,
}

impl WorkerOptions {
    pub fn with_max_concurrent_orchestrations(mut self, n: usize) -> Self {
        self.max_concurrent_orchestrations = n;
        self
    }

    pub fn with_max_concurrent_activities(mut self, n: usize) -> Self {
        self.max_concurrent_activities = n;
        self
    }

    pub fn with_observability(mut self, observability: ObservabilityConfig) -> Self {
        self.observability = observability;
        self
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.max_concurrent_orchestrations == 0 {
            return Err(OptionsError::ZeroOrchestrationConcurrency);
        }
        if self.max_concurrent_activities == 0 {
            return Err(OptionsError::ZeroActivityConcurrency);
        }
        Ok(())
    }
}

/// Pulls work items from a [`Provider`] and answers each one.
pub struct Worker {
    registry: Arc<Registry>,
    services: Services,
    provider: Arc<dyn Provider>,
    options: WorkerOptions,
    metrics: Arc<WorkerMetrics>,
}

impl Worker {
    pub fn new(
        registry: Arc<Registry>,
        provider: Arc<dyn Provider>,
        options: WorkerOptions,
    ) -> Result<Arc<Self>, OptionsError> {
        Self::with_services(registry, Services::default(), provider, options)
    }

    /// Build a worker; fails if `options` do not validate.
    pub fn with_services(
        registry: Arc<Registry>,
        services: Services,
        provider: Arc<dyn Provider>,
        options: WorkerOptions,
    ) -> Result<Arc<Self>, OptionsError> {
        options.validate()?;
        Ok(Arc::new(Self {
            registry,
            services,
            provider,
            options,
            metrics: Arc::new(WorkerMetrics::default()),
        }))
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Pull and process work items until `shutdown` fires or the provider ends the stream.
    ///
    /// Orchestration and activity items are admitted under separate ceilings.
    /// In-flight items are drained before returning.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let orchestration_permits = Arc::new(Semaphore::new(self.options.max_concurrent_orchestrations));
        let activity_permits = Arc::new(Semaphore::new(self.options.max_concurrent_activities));
        let mut in_flight = JoinSet::new();

        tracing::info!(
            target: "durable_worker::runtime",
            max_concurrent_orchestrations = self.options.max_concurrent_orchestrations,
            max_concurrent_activities = self.options.max_concurrent_activities,
            "Worker started"
        );

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.provider.next_work_item() => next,
            };
            let item = match next {
                Ok(Some(item)) => item,
                Ok(None) => {
                    tracing::info!(target: "durable_worker::runtime", "Work item stream closed");
                    break;
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(target: "durable_worker::runtime", error = %e, "Transient error fetching work item");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(limits::FETCH_RETRY_DELAY) => continue,
                    }
                }
                Err(e) => {
                    tracing::error!(target: "durable_worker::runtime", error = %e, "Permanent error fetching work item");
                    break;
                }
            };

            // Reap finished tasks so the set does not grow unbounded.
            while let Some(joined) = in_flight.try_join_next() {
                log_join_error(joined);
            }

            // Permits are taken on the item's task; intake never waits on a ceiling.
            let permits = match &item {
                WorkItem::Orchestration(_) => orchestration_permits.clone(),
                WorkItem::Activity(_) => activity_permits.clone(),
            };
            let worker = self.clone();
            in_flight.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                worker.dispatch(item).await;
            });
        }

        while let Some(joined) = in_flight.join_next().await {
            log_join_error(joined);
        }
        tracing::info!(target: "durable_worker::runtime", "Worker stopped");
    }

    async fn dispatch(&self, item: WorkItem) {
        match item {
            WorkItem::Orchestration(request) => {
                let instance_id = request.instance_id.clone();
                let response = self.handle_orchestration(request).await;
                if let Err(e) = self.provider.complete_orchestration(response).await {
                    tracing::error!(
                        target: "durable_worker::runtime",
                        instance_id = %instance_id,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Failed to send orchestration response"
                    );
                }
            }
            WorkItem::Activity(request) => {
                let instance_id = request.instance_id.clone();
                let task_id = request.task_id;
                let response = self.handle_activity(request).await;
                if let Err(e) = self.provider.complete_activity(response).await {
                    tracing::error!(
                        target: "durable_worker::runtime",
                        instance_id = %instance_id,
                        task_id,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Failed to send activity response"
                    );
                }
            }
        }
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(target: "durable_worker::runtime", error = %e, "Work item task aborted");
    }
}
