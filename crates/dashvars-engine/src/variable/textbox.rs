use async_trait::async_trait;
use dashvars_common::{Current, UrlValue, VariableError, VariableOption};
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

use super::{ResolveContext, VariableAdapter, VariableState, selection};

/// Replace the options with the single trimmed `query` and select it.
fn single_option(state: &mut VariableState, query: &str) {
    let option = VariableOption::text_value(query.trim());
    state.current = Current::from_option(&option);
    state.options = vec![option];
    selection::mark_selected(state);
}

/// Free text typed by the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextboxVariable {
    #[serde(default)]
    pub query: String,
}

impl TextboxVariable {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

#[async_trait]
impl VariableAdapter for TextboxVariable {
    fn definition_fields(&self) -> SmallVec<[&str; 2]> {
        SmallVec::new()
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
        single_option(state, &self.query);
        Ok(())
    }

    fn set_value_from_url(&mut self, state: &mut VariableState, url_value: &UrlValue) {
        self.query = url_value.first().unwrap_or_default().to_string();
        single_option(state, &self.query);
    }
}

/// A hidden value fixed by the dashboard author.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstantVariable {
    #[serde(default)]
    pub query: String,
}

impl ConstantVariable {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

#[async_trait]
impl VariableAdapter for ConstantVariable {
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
        single_option(state, &self.query);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use dashvars_common::OptionValue;
    use dashvars_common::TimeZoneSpec;
    use pretty_assertions::assert_eq;

    use crate::interpolate::TemplateSrv;
    use crate::tests::common::resolve;
    use crate::variable::{ConstantVariable, TextboxVariable, Variable, VariableKind};

    fn texts(variable: &Variable) -> Vec<&str> {
        variable.options().iter().map(|o| o.text.as_str()).collect()
    }

    #[test]
    fn textbox_offers_its_trimmed_query() {
        let templates = TemplateSrv::new(TimeZoneSpec::Utc);
        let mut v = Variable::new("q", VariableKind::Textbox(TextboxVariable::new("  cpu load ")));

        resolve(&mut v, &templates, &[]).unwrap();

        assert_eq!(texts(&v), vec!["cpu load"]);
        assert_eq!(v.current().text, "cpu load");
        assert!(v.options()[0].selected);
    }

    #[test]
    fn textbox_url_value_becomes_the_query() {
        let templates = TemplateSrv::new(TimeZoneSpec::Utc);
        let mut v = Variable::new("q", VariableKind::Textbox(TextboxVariable::new("old")));
        resolve(&mut v, &templates, &[]).unwrap();

        v.set_value_from_url(&OptionValue::from("typed"));

        let VariableKind::Textbox(def) = &v.kind else {
            unreachable!()
        };
        assert_eq!(def.query, "typed");
        assert_eq!(texts(&v), vec!["typed"]);
        assert_eq!(v.current().value, OptionValue::from("typed"));
    }

    #[test]
    fn constant_is_static_and_keeps_its_option_when_saved() {
        let templates = TemplateSrv::new(TimeZoneSpec::Utc);
        let mut v = Variable::new("env", VariableKind::Constant(ConstantVariable::new(" prod ")));
        assert!(v.needs_resolution_on_init());

        resolve(&mut v, &templates, &[]).unwrap();

        assert_eq!(texts(&v), vec!["prod"]);
        assert_eq!(v.current().text, "prod");
        assert!(!v.needs_resolution_on_init());
        assert_eq!(texts(&v.save_model()), vec!["prod"]);
    }
}
