//! Name → factory tables for workflows and activities.
//!
//! Names are matched case-insensitively. Lookups create a fresh handler per
//! work item through its factory, inside that work item's [`Scope`]. A
//! factory that fails or panics is reported as a miss and leaves the table
//! untouched for everyone else.

use super::scope::Scope;
use super::{
    Activity, ActivityContext, ActivityHandler, FnActivity, FnOrchestration, OrchestrationHandler, TypedActivity,
    TypedWorkflow, Workflow, typed_activity, typed_orchestration,
};
use crate::OrchestrationContext;
use crate::errors::WorkflowError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

pub type Factory<H> = Arc<dyn Fn(&Scope) -> Result<Arc<H>, String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate {kind} registration: {name}")]
    Duplicate { kind: &'static str, name: String },
    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<RegistryError>),
}

struct Entry<H: ?Sized> {
    name: String,
    factory: Factory<H>,
}

impl<H: ?Sized> Clone for Entry<H> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            factory: Arc::clone(&self.factory),
        }
    }
}

/// One concurrency-safe table of factories.
struct HandlerTable<H: ?Sized> {
    kind: &'static str,
    entries: RwLock<HashMap<String, Entry<H>>>,
}

impl<H: ?Sized> HandlerTable<H> {
    fn new(kind: &'static str, entries: HashMap<String, Entry<H>>) -> Self {
        Self {
            kind,
            entries: RwLock::new(entries),
        }
    }

    fn insert(&self, name: &str, factory: Factory<H>) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let key = name.to_lowercase();
        if entries.contains_key(&key) {
            tracing::warn!(
                target: "durable_worker::runtime::registry",
                kind = self.kind,
                name = %name,
                "Rejected duplicate registration"
            );
            return Err(RegistryError::Duplicate {
                kind: self.kind,
                name: name.to_string(),
            });
        }
        entries.insert(
            key,
            Entry {
                name: name.to_string(),
                factory,
            },
        );
        Ok(())
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|e| e.name.clone())
            .collect();
        names.sort();
        names
    }

    fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&name.to_lowercase())
    }

    fn create(&self, name: &str, scope: &Scope) -> Option<Arc<H>> {
        // The read lock is released before user factory code runs.
        let factory = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name.to_lowercase())
            .map(|e| Arc::clone(&e.factory));
        let Some(factory) = factory else {
            self.log_registry_miss(name);
            return None;
        };
        match catch_unwind(AssertUnwindSafe(|| factory(scope))) {
            Ok(Ok(handler)) => Some(handler),
            Ok(Err(error)) => {
                tracing::error!(
                    target: "durable_worker::runtime::registry",
                    kind = self.kind,
                    name = %name,
                    scope_id = scope.id(),
                    error = %error,
                    "Handler construction failed"
                );
                None
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    target: "durable_worker::runtime::registry",
                    kind = self.kind,
                    name = %name,
                    scope_id = scope.id(),
                    panic = %message,
                    "Handler construction panicked"
                );
                None
            }
        }
    }

    fn log_registry_miss(&self, name: &str) {
        let registered = self.names();
        tracing::debug!(
            target: "durable_worker::runtime::registry",
            kind = self.kind,
            requested_name = %name,
            registered_count = registered.len(),
            registered_names = ?registered,
            "Registry lookup miss"
        );
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Workflow and activity registry shared by all in-flight work items.
pub struct Registry {
    workflows: HandlerTable<dyn OrchestrationHandler>,
    activities: HandlerTable<dyn ActivityHandler>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            workflows: HandlerTable::new("workflow", HashMap::new()),
            activities: HandlerTable::new("activity", HashMap::new()),
        }
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Create the workflow registered under `name`, or `None` if unknown or unconstructible.
    pub fn try_create_workflow(&self, name: &str, scope: &Scope) -> Option<Arc<dyn OrchestrationHandler>> {
        self.workflows.create(name, scope)
    }

    /// Create the activity registered under `name`, or `None` if unknown or unconstructible.
    pub fn try_create_activity(&self, name: &str, scope: &Scope) -> Option<Arc<dyn ActivityHandler>> {
        self.activities.create(name, scope)
    }

    pub fn has_workflow(&self, name: &str) -> bool {
        self.workflows.contains(name)
    }

    pub fn has_activity(&self, name: &str) -> bool {
        self.activities.contains(name)
    }

    pub fn workflow_names(&self) -> Vec<String> {
        self.workflows.names()
    }

    pub fn activity_names(&self) -> Vec<String> {
        self.activities.names()
    }

    /// Register a workflow factory after the registry was built.
    pub fn add_workflow_factory(&self, name: &str, factory: Factory<dyn OrchestrationHandler>) -> Result<(), RegistryError> {
        self.workflows.insert(name, factory)
    }

    /// Register an activity factory after the registry was built.
    pub fn add_activity_factory(&self, name: &str, factory: Factory<dyn ActivityHandler>) -> Result<(), RegistryError> {
        self.activities.insert(name, factory)
    }

    pub fn add_workflow_fn<In, Out, F, Fut>(&self, name: &str, f: F) -> Result<(), RegistryError>
    where
        In: DeserializeOwned + Send + 'static,
        Out: Serialize + Send + 'static,
        F: Fn(OrchestrationContext, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, WorkflowError>> + Send + 'static,
    {
        self.add_workflow_factory(name, shared_factory(Arc::new(typed_orchestration(f))))
    }

    pub fn add_activity_fn<In, Out, F, Fut>(&self, name: &str, f: F) -> Result<(), RegistryError>
    where
        In: DeserializeOwned + Send + 'static,
        Out: Serialize + Send + 'static,
        F: Fn(ActivityContext, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, WorkflowError>> + Send + 'static,
    {
        self.add_activity_factory(name, shared_factory(Arc::new(typed_activity(f))))
    }
}

fn shared_factory<H: ?Sized + Send + Sync + 'static>(handler: Arc<H>) -> Factory<H> {
    Arc::new(move |_scope: &Scope| Ok::<_, String>(Arc::clone(&handler)))
}

/// Collects registrations and reports every duplicate at [`build`](Self::build).
#[derive(Default)]
pub struct RegistryBuilder {
    workflows: HashMap<String, Entry<dyn OrchestrationHandler>>,
    activities: HashMap<String, Entry<dyn ActivityHandler>>,
    errors: Vec<RegistryError>,
}

impl RegistryBuilder {
    pub fn build(self) -> Result<Registry, RegistryError> {
        let mut errors = self.errors;
        match errors.len() {
            0 => Ok(Registry {
                workflows: HandlerTable::new("workflow", self.workflows),
                activities: HandlerTable::new("activity", self.activities),
            }),
            1 => Err(errors.remove(0)),
            _ => Err(RegistryError::Multiple(errors)),
        }
    }

    fn insert_workflow(mut self, name: &str, factory: Factory<dyn OrchestrationHandler>) -> Self {
        let key = name.to_lowercase();
        if self.workflows.contains_key(&key) {
            self.errors.push(RegistryError::Duplicate {
                kind: "workflow",
                name: name.to_string(),
            });
            return self;
        }
        self.workflows.insert(
            key,
            Entry {
                name: name.to_string(),
                factory,
            },
        );
        self
    }

    fn insert_activity(mut self, name: &str, factory: Factory<dyn ActivityHandler>) -> Self {
        let key = name.to_lowercase();
        if self.activities.contains_key(&key) {
            self.errors.push(RegistryError::Duplicate {
                kind: "activity",
                name: name.to_string(),
            });
            return self;
        }
        self.activities.insert(
            key,
            Entry {
                name: name.to_string(),
                factory,
            },
        );
        self
    }

    /// Register a typed workflow function.
    pub fn register_workflow_fn<In, Out, F, Fut>(self, name: &str, f: F) -> Self
    where
        In: DeserializeOwned + Send + 'static,
        Out: Serialize + Send + 'static,
        F: Fn(OrchestrationContext, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, WorkflowError>> + Send + 'static,
    {
        self.insert_workflow(name, shared_factory(Arc::new(typed_orchestration(f))))
    }

    /// Register a workflow over raw serialized input and output.
    pub fn register_workflow_raw<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(OrchestrationContext, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<String>, WorkflowError>> + Send + 'static,
    {
        self.insert_workflow(name, shared_factory(Arc::new(FnOrchestration::new(f))))
    }

    /// Register a [`Workflow`] built per work item from its scope.
    pub fn register_workflow<W, F>(self, name: &str, factory: F) -> Self
    where
        W: Workflow,
        F: Fn(&Scope) -> Result<W, String> + Send + Sync + 'static,
    {
        let factory: Factory<dyn OrchestrationHandler> = Arc::new(move |scope: &Scope| {
            factory(scope).map(|w| Arc::new(TypedWorkflow(w)) as Arc<dyn OrchestrationHandler>)
        });
        self.insert_workflow(name, factory)
    }

    pub fn register_workflow_factory(self, name: &str, factory: Factory<dyn OrchestrationHandler>) -> Self {
        self.insert_workflow(name, factory)
    }

    /// Register a typed activity function.
    pub fn register_activity_fn<In, Out, F, Fut>(self, name: &str, f: F) -> Self
    where
        In: DeserializeOwned + Send + 'static,
        Out: Serialize + Send + 'static,
        F: Fn(ActivityContext, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, WorkflowError>> + Send + 'static,
    {
        self.insert_activity(name, shared_factory(Arc::new(typed_activity(f))))
    }

    pub fn register_activity_raw<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(ActivityContext, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<String>, WorkflowError>> + Send + 'static,
    {
        self.insert_activity(name, shared_factory(Arc::new(FnActivity::new(f))))
    }

    /// Register an [`Activity`] built per work item from its scope.
    pub fn register_activity<A, F>(self, name: &str, factory: F) -> Self
    where
        A: Activity,
        F: Fn(&Scope) -> Result<A, String> + Send + Sync + 'static,
    {
        let factory: Factory<dyn ActivityHandler> = Arc::new(move |scope: &Scope| {
            factory(scope).map(|a| Arc::new(TypedActivity(a)) as Arc<dyn ActivityHandler>)
        });
        self.insert_activity(name, factory)
    }

    pub fn register_activity_factory(self, name: &str, factory: Factory<dyn ActivityHandler>) -> Self {
        self.insert_activity(name, factory)
    }
}
