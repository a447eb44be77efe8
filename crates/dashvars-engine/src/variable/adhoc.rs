use async_trait::async_trait;
use dashvars_common::{AdHocFilter, OptionValue, UrlValue, VariableError};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{ResolveContext, VariableAdapter, VariableState};
use crate::url_sync::{decode_adhoc_filter, encode_adhoc_filter};

/// Key/operator/value filters applied to every query of one datasource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdHocVariable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource: Option<String>,
    #[serde(default)]
    pub filters: Vec<AdHocFilter>,
}

impl AdHocVariable {
    pub fn new(datasource: Option<&str>) -> Self {
        Self {
            datasource: datasource.map(str::to_string),
            filters: Vec::new(),
        }
    }

    /// Insert or update the filter on `(key, value)`.
    pub fn upsert_filter(&mut self, key: &str, value: &str, operator: &str) {
        match self
            .filters
            .iter_mut()
            .find(|f| f.key == key && f.value == value)
        {
            Some(existing) => existing.operator = operator.to_string(),
            None => self.filters.push(AdHocFilter::new(key, operator, value)),
        }
    }
}

#[async_trait]
impl VariableAdapter for AdHocVariable {
    fn definition_fields(&self) -> SmallVec<[&str; 2]> {
        self.datasource.as_deref().into_iter().collect()
    }

    async fn update_options(
        &mut self,
        _state: &mut VariableState,
        _ctx: &ResolveContext<'_>,
        _search_filter: Option<&str>,
    ) -> Result<(), VariableError> {
        Ok(())
    }

    fn set_value_from_url(&mut self, _state: &mut VariableState, url_value: &UrlValue) {
        self.filters = url_value
            .as_slice()
            .iter()
            .filter_map(|raw| decode_adhoc_filter(raw))
            .collect();
    }

    fn value_for_url(&self, _state: &VariableState) -> UrlValue {
        OptionValue::Multi(self.filters.iter().map(encode_adhoc_filter).collect())
    }
}
