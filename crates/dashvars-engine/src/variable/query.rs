use async_trait::async_trait;
use dashvars_common::{VariableError, VariableErrorKind, VariableOption};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

use super::{Refresh, ResolveContext, SelectionPolicy, VariableAdapter, VariableState};
use crate::interpolate::VariableFormat;
use crate::traits::{MetricFindOptions, MetricFindValue};

static FIRST_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r".*?(\d+).*").expect("numeric sort pattern is valid"));

/// Sort order of a query variable's options.
///
/// `ceil(code / 2)` picks the family (1 alphabetical, 2 numeric,
/// 3 case-insensitive alphabetical); even codes sort descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct VariableSort(pub u8);

impl From<u8> for VariableSort {
    fn from(code: u8) -> Self {
        VariableSort(code)
    }
}

impl From<VariableSort> for u8 {
    fn from(sort: VariableSort) -> Self {
        sort.0
    }
}

impl VariableSort {
    pub const DISABLED: VariableSort = VariableSort(0);
    pub const ALPHABETICAL_ASC: VariableSort = VariableSort(1);
    pub const ALPHABETICAL_DESC: VariableSort = VariableSort(2);
    pub const NUMERICAL_ASC: VariableSort = VariableSort(3);
    pub const NUMERICAL_DESC: VariableSort = VariableSort(4);
    pub const ALPHABETICAL_CI_ASC: VariableSort = VariableSort(5);
    pub const ALPHABETICAL_CI_DESC: VariableSort = VariableSort(6);

    /// Sort `options` in place.
    pub fn apply(self, options: &mut [VariableOption]) {
        if self.0 == 0 {
            return;
        }
        let family = self.0.div_ceil(2);
        match family {
            1 => options.sort_by(|a, b| a.text.cmp(&b.text)),
            2 => options.sort_by_key(|o| first_number(&o.text)),
            3 => options.sort_by_cached_key(|o| o.text.to_lowercase()),
            _ => return,
        }
        if self.0 % 2 == 0 {
            options.reverse();
        }
    }
}

/// The first run of digits in `text`, or -1 when there is none.
fn first_number(text: &str) -> i64 {
    FIRST_NUMBER_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().parse::<i64>().unwrap_or(i64::MAX))
        .unwrap_or(-1)
}

/// Compile a user regex written either bare (anchored as `^...$`) or in
/// `/pattern/flags` form. Flags `i` and `m` are honoured; `g` and `y` have no
/// meaning for a single match and are accepted.
pub fn string_to_regex(pattern: &str) -> Result<Regex, VariableError> {
    let invalid = |detail: String| {
        VariableError::new(VariableErrorKind::Regex)
            .with_message(format!("{detail} in '{pattern}'"))
    };

    let Some(body) = pattern.strip_prefix('/') else {
        return Regex::new(&format!("^{pattern}$")).map_err(|e| invalid(e.to_string()));
    };

    let close = body
        .rfind('/')
        .ok_or_else(|| invalid("missing closing '/'".to_string()))?;
    let (source, flags) = (&body[..close], &body[close + 1..]);

    let mut builder = RegexBuilder::new(source);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            'g' | 'y' => {}
            other => return Err(invalid(format!("unsupported flag '{other}'"))),
        }
    }
    builder.build().map_err(|e| invalid(e.to_string()))
}

/// A variable whose options come from a datasource's metric-find query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryVariable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource: Option<String>,
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default)]
    pub sort: VariableSort,
    #[serde(default)]
    pub refresh: Refresh,
    #[serde(flatten)]
    pub selection: SelectionPolicy,
}

impl QueryVariable {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    fn regex_pattern(&self) -> Option<&str> {
        self.regex.as_deref().filter(|r| !r.is_empty())
    }

    /// Map raw metric-find rows to options: text/value fallback, regex
    /// extraction, dedupe by value, sort, All/None.
    pub(crate) fn metric_names_to_options(
        &self,
        rows: Vec<MetricFindValue>,
        regex: Option<&Regex>,
    ) -> Vec<VariableOption> {
        let mut seen = FxHashSet::default();
        let mut options = Vec::with_capacity(rows.len());

        for row in rows {
            let value = row.value.unwrap_or_else(|| row.text.clone());
            let mut text = if row.text.is_empty() { value.clone() } else { row.text };
            let mut value = value;

            if let Some(regex) = regex {
                let Some(caps) = regex.captures(&value) else {
                    continue;
                };
                if let Some(group) = caps.get(1) {
                    text = group.as_str().to_string();
                    value = text.clone();
                }
            }

            if seen.insert(value.clone()) {
                options.push(VariableOption::new(text, value));
            }
        }

        self.sort.apply(&mut options);

        if options.is_empty() {
            return vec![VariableOption::none()];
        }
        self.selection.with_all_option(options)
    }
}

#[async_trait]
impl VariableAdapter for QueryVariable {
    fn refresh(&self) -> Refresh {
        self.refresh
    }

    fn selection_policy(&self) -> Option<&SelectionPolicy> {
        Some(&self.selection)
    }

    fn definition_fields(&self) -> SmallVec<[&str; 2]> {
        let mut fields: SmallVec<[&str; 2]> = smallvec![self.query.as_str()];
        if let Some(ds) = &self.datasource {
            fields.push(ds);
        }
        if let Some(regex) = self.regex_pattern() {
            fields.push(regex);
        }
        fields
    }

    async fn update_options(
        &mut self,
        state: &mut VariableState,
        ctx: &ResolveContext<'_>,
        search_filter: Option<&str>,
    ) -> Result<(), VariableError> {
        let datasource = self
            .datasource
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(|d| ctx.templates.replace(d, None, None));
        let source = ctx.datasources.get(datasource.as_deref())?;

        let query = ctx.templates.replace(&self.query, None, None);
        let options = MetricFindOptions {
            range: (self.refresh == Refresh::OnTimeRangeChange).then(|| ctx.time.time_range()),
            variable: state.name.clone(),
            search_filter: search_filter.map(str::to_string),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(variable = %state.name, %query, "metric find query");

        let rows = source.metric_find_query(&query, &options).await?;

        let regex = match self.regex_pattern() {
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

        state.options = self.metric_names_to_options(rows, regex.as_ref());
        Ok(())
    }
}
