use async_trait::async_trait;
use dashvars_common::{VariableError, VariableOption};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

use super::{Builtins, Refresh, ResolveContext, VariableAdapter, VariableState};
use crate::interval::calculate_interval;

/// A quoted item or a run of word characters.
static INTERVAL_ITEM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""[^"]*"|'[^']*'|\w+"#).expect("interval item pattern is valid")
});

/// Text of the synthetic auto option.
pub const AUTO_TEXT: &str = "auto";

/// Builtin key holding the auto interval of the variable `name`.
pub fn auto_interval_key(name: &str) -> String {
    format!("__auto_interval_{name}")
}

/// Legacy builtin holding the most recently computed auto interval.
pub const LEGACY_AUTO_INTERVAL_KEY: &str = "__auto_interval";

/// A list of intervals, optionally headed by an auto-sized one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalVariable {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub auto: bool,
    #[serde(rename = "auto_count", default, skip_serializing_if = "Option::is_none")]
    pub auto_count: Option<u32>,
    #[serde(rename = "auto_min", default, skip_serializing_if = "Option::is_none")]
    pub auto_min: Option<String>,
    /// Interval variables always follow the time range; kept for the
    /// persisted shape.
    #[serde(default = "time_range_refresh")]
    pub refresh: Refresh,
}

fn time_range_refresh() -> Refresh {
    Refresh::OnTimeRangeChange
}

impl Default for IntervalVariable {
    fn default() -> Self {
        Self {
            query: String::new(),
            auto: false,
            auto_count: None,
            auto_min: None,
            refresh: Refresh::OnTimeRangeChange,
        }
    }
}

impl IntervalVariable {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_auto(mut self, count: u32, min: impl Into<String>) -> Self {
        self.auto = true;
        self.auto_count = Some(count);
        self.auto_min = Some(min.into());
        self
    }
}

pub(crate) fn split_interval_query(query: &str) -> Vec<String> {
    INTERVAL_ITEM_RE
        .find_iter(query)
        .map(|m| m.as_str().replace(['"', '\''], "").trim().to_string())
        .collect()
}

#[async_trait]
impl VariableAdapter for IntervalVariable {
    fn refresh(&self) -> Refresh {
        Refresh::OnTimeRangeChange
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
        let mut options: Vec<VariableOption> = split_interval_query(&self.query)
            .into_iter()
            .map(VariableOption::text_value)
            .collect();

        if self.auto && options.first().is_none_or(|o| o.text != AUTO_TEXT) {
            let key = auto_interval_key(&state.name);
            options.insert(0, VariableOption::new(AUTO_TEXT, format!("${key}")));
        }
        state.options = options;
        Ok(())
    }

    fn builtins(
        &self,
        state: &VariableState,
        ctx: &ResolveContext<'_>,
    ) -> Result<Builtins, VariableError> {
        if !self.auto {
            return Ok(Builtins::new());
        }
        let count = self.auto_count.unwrap_or(ctx.config.default_auto_count);
        let min = self
            .auto_min
            .clone()
            .unwrap_or_else(|| ctx.config.default_auto_min.clone());
        let interval = calculate_interval(&ctx.time.time_range(), count, Some(&min))?;

        Ok(smallvec![
            (auto_interval_key(&state.name), interval.interval.clone()),
            (LEGACY_AUTO_INTERVAL_KEY.to_string(), interval.interval),
        ])
    }
}
