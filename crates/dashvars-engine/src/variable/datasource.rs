use async_trait::async_trait;
use dashvars_common::{VariableError, VariableOption};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{
    Refresh, ResolveContext, SelectionPolicy, VariableAdapter, VariableState, string_to_regex,
};
use crate::interpolate::VariableFormat;

/// Placeholder text when no datasource instance matches.
pub const NO_DATASOURCES_TEXT: &str = "No data sources found";

/// Lets the user pick among the configured instances of one plugin type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceVariable {
    /// Plugin id the instances must match.
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default = "load_refresh")]
    pub refresh: Refresh,
    #[serde(flatten)]
    pub selection: SelectionPolicy,
}

fn load_refresh() -> Refresh {
    Refresh::OnDashboardLoad
}

impl DatasourceVariable {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            query: plugin_id.into(),
            regex: None,
            refresh: Refresh::OnDashboardLoad,
            selection: SelectionPolicy::default(),
        }
    }
}

#[async_trait]
impl VariableAdapter for DatasourceVariable {
    fn refresh(&self) -> Refresh {
        Refresh::OnDashboardLoad
    }

    fn selection_policy(&self) -> Option<&SelectionPolicy> {
        Some(&self.selection)
    }

    fn definition_fields(&self) -> SmallVec<[&str; 2]> {
        self.regex.as_deref().into_iter().collect()
    }

    async fn update_options(
        &mut self,
        state: &mut VariableState,
        ctx: &ResolveContext<'_>,
        _search_filter: Option<&str>,
    ) -> Result<(), VariableError> {
        let regex = match self.regex.as_deref().filter(|r| !r.is_empty()) {
            None => None,
            Some(pattern) => {
                let pattern = ctx.templates.replace(pattern, None, Some(VariableFormat::Regex));
                match string_to_regex(&pattern) {
                    Ok(regex) => Some(regex),
                    Err(_err) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(variable = %state.name, error = %_err, "regex filter rejected");
                        state.options = vec![VariableOption::none()];
                        return Ok(());
                    }
                }
            }
        };

        let mut options: Vec<VariableOption> = ctx
            .datasources
            .list()
            .into_iter()
            .filter(|ds| ds.plugin_id == self.query)
            .filter(|ds| regex.as_ref().is_none_or(|r| r.is_match(&ds.name)))
            .map(|ds| VariableOption::text_value(ds.name))
            .collect();

        if options.is_empty() {
            options.push(VariableOption::new(NO_DATASOURCES_TEXT, ""));
        }

        state.options = self.selection.with_all_option(options);
        Ok(())
    }
}
