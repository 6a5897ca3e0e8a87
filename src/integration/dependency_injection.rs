// Copyright 2025 Cowboy AI, LLC.

//! Dependency injection for subreducers and their collaborators
//!
//! Services are keyed by type, trait objects included, so a subreducer factory
//! can ask for `dyn SnapshotStore` or `dyn EventPublisher` without knowing the
//! concrete implementation. Resolution is synchronous and never holds a
//! container lock while a factory runs.

use crate::errors::{ReducerError, ReducerResult};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

type Factory<T> = Box<dyn Fn(&DependencyContainer) -> ReducerResult<Arc<T>> + Send + Sync>;

/// Produces instances of `T` on request
pub trait ServiceProvider<T: ?Sized>: Send + Sync {
    /// Create or return an instance
    fn provide(&self, container: &DependencyContainer) -> ReducerResult<Arc<T>>;
}

/// Provider that calls its factory on every resolve
pub struct FactoryProvider<T: ?Sized> {
    factory: Factory<T>,
}

impl<T: ?Sized> FactoryProvider<T> {
    /// Wrap a factory function
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&DependencyContainer) -> ReducerResult<Arc<T>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
        }
    }
}

impl<T: ?Sized + Send + Sync> ServiceProvider<T> for FactoryProvider<T> {
    fn provide(&self, container: &DependencyContainer) -> ReducerResult<Arc<T>> {
        (self.factory)(container)
    }
}

/// Provider that builds its instance once, on first resolve
pub struct SingletonProvider<T: ?Sized> {
    instance: RwLock<Option<Arc<T>>>,
    factory: Factory<T>,
}

impl<T: ?Sized> SingletonProvider<T> {
    /// Wrap a factory function
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&DependencyContainer) -> ReducerResult<Arc<T>> + Send + Sync + 'static,
    {
        Self {
            instance: RwLock::new(None),
            factory: Box::new(factory),
        }
    }
}

impl<T: ?Sized + Send + Sync> ServiceProvider<T> for SingletonProvider<T> {
    fn provide(&self, container: &DependencyContainer) -> ReducerResult<Arc<T>> {
        if let Some(instance) = self
            .instance
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(instance.clone());
        }

        let mut slot = self.instance.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(instance) = slot.as_ref() {
            return Ok(instance.clone());
        }

        let instance = (self.factory)(container)?;
        *slot = Some(instance.clone());
        Ok(instance)
    }
}

/// Dependency injection container
#[derive(Default)]
pub struct DependencyContainer {
    /// `TypeId::of::<T>()` -> `Arc<T>`
    services: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    /// `TypeId::of::<T>()` -> `Arc<dyn ServiceProvider<T>>`
    providers: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl DependencyContainer {
    /// Create an empty container
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ready-made instance
    pub fn register_instance<T>(&self, service: Arc<T>) -> ReducerResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.ensure_unregistered::<T>()?;
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<T>(), Box::new(service));
        debug!(service = type_name::<T>(), "Registered instance");
        Ok(())
    }

    /// Register a provider
    pub fn register_provider<T, P>(&self, provider: P) -> ReducerResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
        P: ServiceProvider<T> + 'static,
    {
        self.ensure_unregistered::<T>()?;
        let provider: Arc<dyn ServiceProvider<T>> = Arc::new(provider);
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<T>(), Box::new(provider));
        debug!(service = type_name::<T>(), "Registered provider");
        Ok(())
    }

    /// Register a factory called on every resolve
    pub fn register_factory<T, F>(&self, factory: F) -> ReducerResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&DependencyContainer) -> ReducerResult<Arc<T>> + Send + Sync + 'static,
    {
        self.register_provider::<T, _>(FactoryProvider::new(factory))
    }

    /// Register a factory whose result is built once and shared
    pub fn register_singleton<T, F>(&self, factory: F) -> ReducerResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&DependencyContainer) -> ReducerResult<Arc<T>> + Send + Sync + 'static,
    {
        self.register_provider::<T, _>(SingletonProvider::new(factory))
    }

    /// Register an async factory
    ///
    /// Reserved; resolution is synchronous.
    pub fn register_async_factory<T, F, Fut>(&self, _factory: F) -> ReducerResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&DependencyContainer) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ReducerResult<Arc<T>>> + Send + 'static,
    {
        Err(ReducerError::NotImplementedYet(format!(
            "async factory registration for {}",
            type_name::<T>()
        )))
    }

    /// Resolve a service
    pub fn resolve<T>(&self) -> ReducerResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();

        if let Some(service) = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&type_id)
            .and_then(|s| s.downcast_ref::<Arc<T>>())
        {
            return Ok(service.clone());
        }

        let provider = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&type_id)
            .and_then(|p| p.downcast_ref::<Arc<dyn ServiceProvider<T>>>())
            .cloned();

        match provider {
            Some(provider) => provider.provide(self),
            None => Err(ReducerError::NotFound(format!(
                "Service of type {} not registered",
                type_name::<T>()
            ))),
        }
    }

    /// Whether a service or provider is registered for `T`
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        let type_id = TypeId::of::<T>();
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&type_id)
            || self
                .providers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(&type_id)
    }

    /// Create a scoped container
    ///
    /// Reserved; every registration is process-scoped.
    pub fn create_scope(&self) -> ReducerResult<DependencyContainer> {
        Err(ReducerError::NotImplementedYet(
            "scoped dependency containers".to_string(),
        ))
    }

    fn ensure_unregistered<T: ?Sized + 'static>(&self) -> ReducerResult<()> {
        if self.contains::<T>() {
            return Err(ReducerError::AlreadyExists(format!(
                "Service of type {} already registered",
                type_name::<T>()
            )));
        }
        Ok(())
    }
}

/// Builder for configuring dependency injection
#[derive(Default)]
pub struct ContainerBuilder {
    container: DependencyContainer,
}

impl ContainerBuilder {
    /// Start an empty container
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a ready-made instance
    pub fn add_instance<T>(self, service: Arc<T>) -> ReducerResult<Self>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.container.register_instance(service)?;
        Ok(self)
    }

    /// Add a factory called on every resolve
    pub fn add_factory<T, F>(self, factory: F) -> ReducerResult<Self>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&DependencyContainer) -> ReducerResult<Arc<T>> + Send + Sync + 'static,
    {
        self.container.register_factory(factory)?;
        Ok(self)
    }

    /// Add a lazily built shared instance
    pub fn add_singleton<T, F>(self, factory: F) -> ReducerResult<Self>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&DependencyContainer) -> ReducerResult<Arc<T>> + Send + Sync + 'static,
    {
        self.container.register_singleton(factory)?;
        Ok(self)
    }

    /// Finish building
    pub fn build(self) -> DependencyContainer {
        self.container
    }
}
