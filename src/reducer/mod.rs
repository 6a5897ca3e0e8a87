// Copyright 2025 Cowboy AI, LLC.

//! Reducer engine, router and subreducer contract
//!
//! Control flow: [`ReducerEngine::process`] validates the input, asks the
//! [`WorkflowRouter`] for the handler of its workflow type and converts every
//! outcome into a [`WorkflowOutput`].

pub mod engine;
pub mod input;
pub mod metrics;
pub mod router;
pub mod subreducer;

pub use engine::{
    ReducerEngine, ReducerEngineBuilder, INVALID_TYPE_BUCKET, UNSUPPORTED_TYPE_BUCKET,
};
pub use input::{WorkflowInput, WorkflowOutput};
pub use metrics::{MetricsSummary, ReducerMetrics, TypeMetrics};
pub use router::{RouteStats, RoutedSubreducer, SubreducerFactory, WorkflowRouter};
pub use subreducer::{Subreducer, SubreducerContext, SubreducerResult};
