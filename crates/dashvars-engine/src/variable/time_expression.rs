use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use dashvars_common::{Current, VariableError, VariableErrorKind, VariableOption};
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

use super::{Refresh, ResolveContext, VariableAdapter, VariableState, selection};
use crate::datemath;

fn default_format() -> String {
    "%Y-%m-%d".to_string()
}

fn time_range_refresh() -> Refresh {
    Refresh::OnTimeRangeChange
}

/// A date computed from a date-math expression, rendered with a strftime
/// format in the dashboard timezone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeExpressionVariable {
    /// Date-math expression, e.g. `now-1d/d`.
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub round_up: bool,
    #[serde(default = "time_range_refresh")]
    pub refresh: Refresh,
}

impl TimeExpressionVariable {
    pub fn new(query: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            format: format.into(),
            round_up: false,
            refresh: Refresh::OnTimeRangeChange,
        }
    }

    /// Evaluate the expression and render it.
    pub fn evaluate(&self, ctx: &ResolveContext<'_>) -> Result<String, VariableError> {
        let items: Vec<Item<'_>> = StrftimeItems::new(&self.format).collect();
        if items.iter().any(|item| matches!(item, Item::Error)) {
            return Err(VariableError::new(VariableErrorKind::DateMath)
                .with_message(format!("invalid format '{}'", self.format)));
        }

        let expression = ctx.templates.replace(&self.query, None, None);
        let timezone = ctx.templates.timezone();
        let instant = datemath::parse(&expression, ctx.time.now(), &timezone, self.round_up)?;
        let local = timezone.localize(&instant);
        Ok(local.format_with_items(items.into_iter()).to_string())
    }
}

#[async_trait]
impl VariableAdapter for TimeExpressionVariable {
    fn refresh(&self) -> Refresh {
        self.refresh
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
        ctx: &ResolveContext<'_>,
        _search_filter: Option<&str>,
    ) -> Result<(), VariableError> {
        let rendered = self.evaluate(ctx)?;
        let option = VariableOption::text_value(rendered);
        state.current = Current::from_option(&option);
        state.options = vec![option];
        selection::mark_selected(state);
        Ok(())
    }
}
