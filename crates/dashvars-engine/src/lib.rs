pub mod config;
pub mod datemath;
pub mod error;
pub mod graph;
pub mod interpolate;
pub mod interval;
pub mod orchestrator;
pub mod scheduler;
pub mod traits;
pub mod url_sync;
pub mod validation;
pub mod variable;

pub use config::TemplatingConfig;
pub use error::EngineError;
pub use graph::{DependencyGraph, NodeId};
pub use interpolate::{ScopedVar, ScopedVars, TemplateSrv, VariableFormat};
pub use orchestrator::{DashboardEvent, VariableSrv};
pub use scheduler::{Layer, Schedule, Scheduler};
pub use traits::{
    DatasourceInstance, DatasourceProvider, MemoryUrlStore, MetricFindOptions, MetricFindSource,
    MetricFindValue, Services, TimeSource, UrlParams, UrlStore,
};
pub use validation::{ValidationError, VariableIssue, validate_variables};
pub use variable::{Refresh, Variable, VariableKind, parse_variables};

#[cfg(test)]
mod tests;
