//! Meta crate that re-exports the dashvars building blocks with sensible
//! defaults. Hosts depend on this crate and opt into layers via feature
//! flags while keeping access to the underlying crates when they need to
//! implement services or inspect the dependency graph directly.

#[cfg(feature = "common")]
pub use dashvars_common as common;

#[cfg(feature = "parse")]
pub use dashvars_parse as parse;

#[cfg(feature = "engine")]
pub use dashvars_engine as engine;

#[cfg(feature = "common")]
pub use dashvars_common::{
    AdHocFilter, Current, OptionValue, Selection, TimeRange, TimeZoneSpec, VariableError,
    VariableErrorKind, VariableOption,
};

#[cfg(feature = "engine")]
pub use dashvars_engine::{
    DashboardEvent, DatasourceProvider, EngineError, MetricFindOptions, MetricFindSource,
    MetricFindValue, Services, TemplateSrv, TemplatingConfig, TimeSource, UrlStore, Variable,
    VariableFormat, VariableKind, VariableSrv, parse_variables, validate_variables,
};
