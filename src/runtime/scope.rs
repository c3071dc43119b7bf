//! Service container and per-work-item scopes.
//!
//! [`Services`] is built once and shared by the worker. Every work item gets
//! a fresh [`Scope`]: singletons are shared, scoped services are created
//! lazily and live only as long as that scope.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub type SharedService = Arc<dyn Any + Send + Sync>;
type ScopedFactory = Arc<dyn Fn(&Scope) -> SharedService + Send + Sync>;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Default)]
pub struct Services {
    singletons: Arc<HashMap<TypeId, SharedService>>,
    scoped: Arc<HashMap<TypeId, ScopedFactory>>,
}

#[derive(Default)]
pub struct ServicesBuilder {
    singletons: HashMap<TypeId, SharedService>,
    scoped: HashMap<TypeId, ScopedFactory>,
}

impl ServicesBuilder {
    pub fn add_singleton<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.singletons.insert(TypeId::of::<T>(), Arc::new(value));
        self
    }

    /// Register a service created once per scope on first use.
    pub fn add_scoped<T, F>(mut self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Scope) -> T + Send + Sync + 'static,
    {
        self.scoped
            .insert(TypeId::of::<T>(), Arc::new(move |scope: &Scope| Arc::new(factory(scope)) as SharedService));
        self
    }

    pub fn build(self) -> Services {
        Services {
            singletons: Arc::new(self.singletons),
            scoped: Arc::new(self.scoped),
        }
    }
}

impl Services {
    pub fn builder() -> ServicesBuilder {
        ServicesBuilder::default()
    }

    pub fn create_scope(&self) -> Scope {
        Scope {
            id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
            services: self.clone(),
            instances: Mutex::new(HashMap::new()),
        }
    }
}

/// Service resolution for one work item.
pub struct Scope {
    id: u64,
    services: Services,
    instances: Mutex<HashMap<TypeId, SharedService>>,
}

impl Scope {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Resolve a service: scoped instances first, then singletons.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let key = TypeId::of::<T>();
        if let Some(factory) = self.services.scoped.get(&key) {
            let existing = self
                .instances
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&key)
                .cloned();
            let instance = match existing {
                Some(instance) => instance,
                None => {
                    // Built outside the lock so factories may resolve other services.
                    let created = factory(self);
                    self.instances
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .entry(key)
                        .or_insert(created)
                        .clone()
                }
            };
            return instance.downcast::<T>().ok();
        }
        self.services
            .singletons
            .get(&key)
            .cloned()
            .and_then(|s| s.downcast::<T>().ok())
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope").field("id", &self.id).finish_non_exhaustive()
    }
}
