use async_trait::async_trait;
use dashvars_common::{VariableError, VariableOption};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

use super::{ResolveContext, SelectionPolicy, VariableAdapter, VariableState};

/// A run of characters up to an unescaped comma.
static CUSTOM_ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\\,|[^,])+").expect("custom item pattern is valid"));

/// Split a comma list where `\,` stands for a literal comma; items are
/// trimmed and empty segments skipped.
pub(crate) fn split_custom_query(query: &str) -> Vec<String> {
    CUSTOM_ITEM_RE
        .find_iter(query)
        .map(|m| m.as_str().replace("\\,", ",").trim().to_string())
        .collect()
}

/// A variable with a fixed, comma separated option list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomVariable {
    #[serde(default)]
    pub query: String,
    #[serde(flatten)]
    pub selection: SelectionPolicy,
}

impl CustomVariable {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl VariableAdapter for CustomVariable {
    fn selection_policy(&self) -> Option<&SelectionPolicy> {
        Some(&self.selection)
    }

    fn definition_fields(&self) -> SmallVec<[&str; 2]> {
        smallvec![self.query.as_str()]
    }

    fn is_static(&self) -> bool {
        true
    }

    async fn update_options(
        &mut self,
        state: &mut VariableState,
        _ctx: &ResolveContext<'_>,
        _search_filter: Option<&str>,
    ) -> Result<(), VariableError> {
        let mut seen = FxHashSet::default();
        let options = split_custom_query(&self.query)
            .into_iter()
            .filter(|item| seen.insert(item.clone()))
            .map(VariableOption::text_value)
            .collect();
        state.options = self.selection.with_all_option(options);
        Ok(())
    }
}
