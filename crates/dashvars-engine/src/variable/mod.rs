//! Variable models.
//!
//! A [`Variable`] is the common state every kind shares (name, selection,
//! options) plus a [`VariableKind`] with the per-kind definition. Kinds
//! implement [`VariableAdapter`], which the orchestrator drives without
//! knowing which kind it is talking to.

mod adhoc;
mod custom;
mod datasource;
mod interval;
mod query;
pub mod selection;
mod textbox;
mod time_expression;

pub use adhoc::AdHocVariable;
pub use custom::CustomVariable;
pub use datasource::DatasourceVariable;
pub use interval::IntervalVariable;
pub use query::{QueryVariable, VariableSort, string_to_regex};
pub use textbox::{ConstantVariable, TextboxVariable};
pub use time_expression::TimeExpressionVariable;

use async_trait::async_trait;
use dashvars_common::{
    Current, OptionValue, Selection, UrlValue, VariableError, VariableErrorKind, VariableOption,
};
use dashvars_parse::variable_names;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::config::TemplatingConfig;
use crate::interpolate::TemplateSrv;
use crate::traits::{DatasourceProvider, TimeSource};

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("variable name pattern is valid"));

/// When a variable's options are re-resolved from their source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Refresh {
    /// Options are persisted with the dashboard.
    #[default]
    Never,
    OnDashboardLoad,
    OnTimeRangeChange,
}

impl From<u8> for Refresh {
    fn from(code: u8) -> Self {
        match code {
            1 => Refresh::OnDashboardLoad,
            2 => Refresh::OnTimeRangeChange,
            _ => Refresh::Never,
        }
    }
}

impl From<Refresh> for u8 {
    fn from(refresh: Refresh) -> Self {
        match refresh {
            Refresh::Never => 0,
            Refresh::OnDashboardLoad => 1,
            Refresh::OnTimeRangeChange => 2,
        }
    }
}

/// Picker visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Hide {
    #[default]
    DontHide,
    HideLabel,
    HideVariable,
}

impl From<u8> for Hide {
    fn from(code: u8) -> Self {
        match code {
            1 => Hide::HideLabel,
            2 => Hide::HideVariable,
            _ => Hide::DontHide,
        }
    }
}

impl From<Hide> for u8 {
    fn from(hide: Hide) -> Self {
        hide as u8
    }
}

/// Multi-select and All settings shared by the option-list kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionPolicy {
    #[serde(default)]
    pub multi: bool,
    #[serde(default)]
    pub include_all: bool,
    /// Literal interpolated instead of the option list when All is selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_value: Option<String>,
}

impl SelectionPolicy {
    pub fn custom_all_value(&self) -> Option<&str> {
        self.all_value.as_deref().filter(|v| !v.is_empty())
    }

    /// Prepend the All option when enabled.
    pub(crate) fn with_all_option(&self, mut options: Vec<VariableOption>) -> Vec<VariableOption> {
        if self.include_all {
            options.insert(0, VariableOption::all(self.custom_all_value()));
        }
        options
    }
}

/// State every variable kind carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableState {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub hide: Hide,
    #[serde(default)]
    pub skip_url_sync: bool,
    #[serde(default)]
    pub current: Current,
    #[serde(default)]
    pub options: Vec<VariableOption>,
}

/// What a resolving variable can reach.
pub struct ResolveContext<'a> {
    pub templates: &'a TemplateSrv,
    pub datasources: &'a dyn DatasourceProvider,
    pub time: &'a dyn TimeSource,
    pub config: &'a TemplatingConfig,
}

/// Builtin values derived by a resolution. The caller publishes them once the
/// result is accepted.
pub type Builtins = SmallVec<[(String, String); 2]>;

/// Behaviour that differs per variable kind.
#[async_trait]
pub trait VariableAdapter: Send + Sync {
    fn refresh(&self) -> Refresh {
        Refresh::Never
    }

    fn selection_policy(&self) -> Option<&SelectionPolicy> {
        None
    }

    /// Definition strings that may reference other variables.
    fn definition_fields(&self) -> SmallVec<[&str; 2]>;

    /// Kinds whose options are computed locally rather than queried.
    fn is_static(&self) -> bool {
        false
    }

    /// Recompute `state.options` (and, for single-option kinds, the
    /// selection).
    async fn update_options(
        &mut self,
        state: &mut VariableState,
        ctx: &ResolveContext<'_>,
        search_filter: Option<&str>,
    ) -> Result<(), VariableError>;

    /// Builtins this kind derives from freshly resolved `state`.
    fn builtins(
        &self,
        _state: &VariableState,
        _ctx: &ResolveContext<'_>,
    ) -> Result<Builtins, VariableError> {
        Ok(Builtins::new())
    }

    fn set_value_from_url(&mut self, state: &mut VariableState, url_value: &UrlValue) {
        selection::set_from_url(state, self.selection_policy(), url_value);
    }

    fn value_for_url(&self, state: &VariableState) -> UrlValue {
        selection::value_for_url(state)
    }
}

/// The per-kind definition, tagged by the persisted `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VariableKind {
    Query(QueryVariable),
    Custom(CustomVariable),
    Interval(IntervalVariable),
    Textbox(TextboxVariable),
    Constant(ConstantVariable),
    Datasource(DatasourceVariable),
    #[serde(rename = "adhoc", alias = "ad-hoc")]
    AdHoc(AdHocVariable),
    #[serde(rename = "time-expression", alias = "timeexpression")]
    TimeExpression(TimeExpressionVariable),
}

impl VariableKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            VariableKind::Query(_) => "query",
            VariableKind::Custom(_) => "custom",
            VariableKind::Interval(_) => "interval",
            VariableKind::Textbox(_) => "textbox",
            VariableKind::Constant(_) => "constant",
            VariableKind::Datasource(_) => "datasource",
            VariableKind::AdHoc(_) => "adhoc",
            VariableKind::TimeExpression(_) => "time-expression",
        }
    }

    pub fn adapter(&self) -> &dyn VariableAdapter {
        match self {
            VariableKind::Query(v) => v,
            VariableKind::Custom(v) => v,
            VariableKind::Interval(v) => v,
            VariableKind::Textbox(v) => v,
            VariableKind::Constant(v) => v,
            VariableKind::Datasource(v) => v,
            VariableKind::AdHoc(v) => v,
            VariableKind::TimeExpression(v) => v,
        }
    }

    pub fn adapter_mut(&mut self) -> &mut dyn VariableAdapter {
        match self {
            VariableKind::Query(v) => v,
            VariableKind::Custom(v) => v,
            VariableKind::Interval(v) => v,
            VariableKind::Textbox(v) => v,
            VariableKind::Constant(v) => v,
            VariableKind::Datasource(v) => v,
            VariableKind::AdHoc(v) => v,
            VariableKind::TimeExpression(v) => v,
        }
    }
}

/// A dashboard variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    #[serde(flatten)]
    pub state: VariableState,
    #[serde(flatten)]
    pub kind: VariableKind,
}

impl Variable {
    pub fn new(name: impl Into<String>, kind: VariableKind) -> Self {
        Self {
            state: VariableState {
                name: name.into(),
                ..VariableState::default()
            },
            kind,
        }
    }

    pub fn with_current(mut self, current: Current) -> Self {
        self.state.current = current;
        self
    }

    pub fn with_options(mut self, options: Vec<VariableOption>) -> Self {
        self.state.options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn current(&self) -> &Current {
        &self.state.current
    }

    pub fn options(&self) -> &[VariableOption] {
        &self.state.options
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn refresh(&self) -> Refresh {
        self.kind.adapter().refresh()
    }

    pub fn selection_policy(&self) -> Option<&SelectionPolicy> {
        self.kind.adapter().selection_policy()
    }

    /// Names of all variables this one's definition mentions.
    pub fn referenced_names(&self) -> SmallVec<[String; 4]> {
        let mut names: SmallVec<[String; 4]> = SmallVec::new();
        for field in self.kind.adapter().definition_fields() {
            for name in variable_names(field) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// True when this variable's definition references `name`.
    pub fn depends_on(&self, name: &str) -> bool {
        name != self.name() && self.referenced_names().iter().any(|n| n == name)
    }

    /// Whether initialization has to resolve options rather than trust the
    /// persisted ones.
    pub fn needs_resolution_on_init(&self) -> bool {
        match self.refresh() {
            Refresh::OnDashboardLoad | Refresh::OnTimeRangeChange => true,
            Refresh::Never => self.needs_local_options(),
        }
    }

    /// Options are computed without a datasource.
    pub fn is_static(&self) -> bool {
        self.kind.adapter().is_static()
    }

    /// A static variable persisted without options still has to build them.
    pub fn needs_local_options(&self) -> bool {
        self.is_static() && self.state.options.is_empty()
    }

    /// Resolve options and reconcile the selection with them. Returns the
    /// builtins the new state defines; nothing is written to `ctx.templates`.
    pub async fn update_options(
        &mut self,
        ctx: &ResolveContext<'_>,
        search_filter: Option<&str>,
    ) -> Result<Builtins, VariableError> {
        let Variable { state, kind } = self;
        let adapter = kind.adapter_mut();
        adapter.update_options(state, ctx, search_filter).await?;
        selection::validate_selection(state, adapter.selection_policy());
        adapter.builtins(state, ctx)
    }

    /// Apply a selection as the current value.
    pub fn set_value(&mut self, selection: Selection) {
        selection::set_current(&mut self.state, selection);
    }

    pub fn set_value_from_url(&mut self, url_value: &UrlValue) {
        let Variable { state, kind } = self;
        kind.adapter_mut().set_value_from_url(state, url_value);
    }

    pub fn value_for_url(&self) -> UrlValue {
        self.kind.adapter().value_for_url(&self.state)
    }

    /// True when the All option is the active selection.
    pub fn is_all_selected(&self) -> bool {
        let Some(policy) = self.selection_policy() else {
            return false;
        };
        let current = &self.state.current;
        if current.value.is_all_sentinel() {
            return true;
        }
        if !policy.include_all {
            return false;
        }
        if let Some(all_value) = policy.custom_all_value() {
            if current.value.first() == Some(all_value) {
                return true;
            }
        }
        current.text == dashvars_common::ALL_VARIABLE_TEXT
    }

    /// Values an All selection expands to: every option except the
    /// synthetic ones.
    pub fn all_option_values(&self) -> Vec<String> {
        let all_value = self.selection_policy().and_then(SelectionPolicy::custom_all_value);
        self.state
            .options
            .iter()
            .filter(|o| !o.is_none)
            .filter(|o| {
                let is_all_option = o.value == dashvars_common::ALL_VARIABLE_VALUE
                    || (o.text == dashvars_common::ALL_VARIABLE_TEXT
                        && all_value == Some(o.value.as_str()));
                !is_all_option
            })
            .map(|o| o.value.clone())
            .collect()
    }

    /// The persisted form: variables refreshed from a source drop their
    /// options.
    pub fn save_model(&self) -> Variable {
        let mut saved = self.clone();
        if saved.refresh() != Refresh::Never {
            saved.state.options.clear();
        }
        for option in &mut saved.state.options {
            option.selected = false;
        }
        saved
    }

    /// The current value as a plain list.
    pub fn current_values(&self) -> Vec<String> {
        match &self.state.current.value {
            OptionValue::Single(v) => vec![v.clone()],
            OptionValue::Multi(vs) => vs.clone(),
        }
    }
}

/// Check a proposed name against the naming rules and the names in use.
pub fn validate_name<'a, I>(name: &str, existing: I) -> Result<(), VariableError>
where
    I: IntoIterator<Item = &'a str>,
{
    if name.starts_with("__") {
        return Err(VariableError::new(VariableErrorKind::InvalidName)
            .with_message(
                "Template names cannot begin with '__', that's reserved for built-in variables",
            )
            .for_variable(name));
    }
    if !NAME_RE.is_match(name) {
        return Err(VariableError::new(VariableErrorKind::InvalidName)
            .with_message("Only word and digit characters are allowed in variable names")
            .for_variable(name));
    }
    if existing.into_iter().any(|n| n == name) {
        return Err(VariableError::new(VariableErrorKind::DuplicateName)
            .with_message("Variable with the same name already exists")
            .for_variable(name));
    }
    Ok(())
}

/// Read variables from dashboard JSON: a full dashboard
/// (`templating.list`), a bare `templating` object (`list`) or a plain array.
pub fn parse_variables(json: &str) -> Result<Vec<Variable>, serde_json::Error> {
    let mut value: serde_json::Value = serde_json::from_str(json)?;
    let list = if value.is_array() {
        value
    } else if let Some(list) = value.pointer_mut("/templating/list") {
        list.take()
    } else if let Some(list) = value.get_mut("list") {
        list.take()
    } else {
        serde_json::Value::Array(Vec::new())
    };
    serde_json::from_value(list)
}
