// Copyright 2025 Cowboy AI, LLC.

//! Integration with the collaborators a reducer depends on
//!
//! The [`DependencyContainer`] is the dependency-resolution collaborator:
//! subreducer factories resolve their circuit breakers, snapshot store, event
//! publisher and external services from it.

pub mod dependency_injection;

pub use dependency_injection::{
    ContainerBuilder, DependencyContainer, FactoryProvider, ServiceProvider, SingletonProvider,
};
