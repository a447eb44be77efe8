//! Common test helpers
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use dashvars_common::{
    Current, OptionValue, TimeRange, VariableError, VariableErrorKind, VariableOption,
};

use crate::config::TemplatingConfig;
use crate::interpolate::TemplateSrv;
use crate::traits::{DatasourceInstance, DatasourceProvider, MetricFindSource, TimeSource};
use crate::variable::{
    Builtins, CustomVariable, QueryVariable, ResolveContext, Variable, VariableKind,
};

pub fn query(name: &str, query: &str) -> Variable {
    Variable::new(name, VariableKind::Query(QueryVariable::new(query)))
}

/// Custom variable with `values` as options and `current` selected.
pub fn custom(name: &str, values: &[&str], current: impl Into<OptionValue>) -> Variable {
    let current = current.into();
    let text = current.join(" + ");
    Variable::new(name, VariableKind::Custom(CustomVariable::new(values.join(","))))
        .with_options(values.iter().map(|v| VariableOption::text_value(*v)).collect())
        .with_current(Current::new(text, current))
}

pub fn names<'a>(graph: &'a crate::graph::DependencyGraph, ids: &[crate::graph::NodeId]) -> Vec<&'a str> {
    ids.iter().map(|&id| graph.name(id)).collect()
}

/// Datasource registry that only lists instances.
pub struct Instances(pub Vec<DatasourceInstance>);

impl DatasourceProvider for Instances {
    fn get(&self, name: Option<&str>) -> Result<Arc<dyn MetricFindSource>, VariableError> {
        Err(VariableError::new(VariableErrorKind::Datasource)
            .with_message(format!("no source behind `{}`", name.unwrap_or("default"))))
    }

    fn list(&self) -> Vec<DatasourceInstance> {
        self.0.clone()
    }
}

pub struct FixedRange(pub TimeRange);

impl TimeSource for FixedRange {
    fn time_range(&self) -> TimeRange {
        self.0.clone()
    }
}

/// The six hours before 2024-01-15 12:00 UTC.
pub fn six_hours() -> TimeRange {
    let to = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
    TimeRange::relative(to - Duration::hours(6), to, "now-6h", "now")
}

/// Resolve `variable` against `datasources` without an orchestrator.
pub fn resolve(
    variable: &mut Variable,
    templates: &TemplateSrv,
    datasources: &[DatasourceInstance],
) -> Result<Builtins, VariableError> {
    let datasources = Instances(datasources.to_vec());
    let time = FixedRange(six_hours());
    let config = TemplatingConfig::default();
    let ctx = ResolveContext {
        templates,
        datasources: &datasources,
        time: &time,
        config: &config,
    };
    futures::executor::block_on(variable.update_options(&ctx, None))
}
