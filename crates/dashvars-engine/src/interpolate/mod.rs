//! The interpolation engine.
//!
//! [`TemplateSrv`] owns the variable list of one dashboard and substitutes
//! variable tokens in arbitrary strings. Resolution order for a token:
//! scoped override, declared variable, builtin, otherwise left as written.

mod format;

pub use format::{VariableFormat, format_value, lucene_escape, regex_escape};

use dashvars_common::{
    AdHocFilter, OptionValue, TimeRange, TimeZoneSpec, UrlValue, VariableError,
};
use dashvars_parse::Tokenizer;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::datemath;
use crate::interval::seconds_to_hms;
use crate::traits::UrlParams;
use crate::url_sync::{encode_url_param, to_url_params, url_key};
use crate::variable::{SelectionPolicy, Variable, VariableKind, validate_name};

/// Builtins computed on demand rather than stored.
const ALL_VARIABLES: &str = "__all_variables";
const URL_TIME_RANGE: &str = "__url_time_range";
const TIMEZONE: &str = "__timezone";
const INTERVAL: &str = "__interval";
const INTERVAL_MS: &str = "__interval_ms";

const COMPUTED_BUILTINS: [&str; 3] = [ALL_VARIABLES, URL_TIME_RANGE, TIMEZONE];

/// Custom all values may reference other variables; nesting stops here.
const MAX_ALL_VALUE_DEPTH: u8 = 8;

/// A call-site override of one variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedVar {
    pub text: String,
    pub value: OptionValue,
    pub skip_url_sync: bool,
}

impl ScopedVar {
    pub fn new(text: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        Self {
            text: text.into(),
            value: value.into(),
            skip_url_sync: false,
        }
    }

    /// Override whose text is its value.
    pub fn value(value: impl Into<String>) -> Self {
        let value = value.into();
        Self::new(value.clone(), value)
    }
}

pub type ScopedVars = FxHashMap<String, ScopedVar>;

/// Variables in declaration order plus a name index.
#[derive(Debug, Default)]
pub(crate) struct VariableStore {
    list: Vec<Variable>,
    index: FxHashMap<String, usize>,
}

impl VariableStore {
    fn from_list(list: Vec<Variable>) -> Self {
        let mut store = Self {
            list,
            index: FxHashMap::default(),
        };
        store.update_index();
        store
    }

    fn update_index(&mut self) {
        self.index.clear();
        for (i, variable) in self.list.iter().enumerate() {
            // first declaration wins on duplicate names
            self.index.entry(variable.name().to_string()).or_insert(i);
        }
    }

    fn get(&self, name: &str) -> Option<&Variable> {
        self.index.get(name).map(|&i| &self.list[i])
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.index.get(name).map(|&i| &mut self.list[i])
    }
}

/// Read-only view used for one rendering pass, taken under the locks.
struct Renderer<'a> {
    store: &'a VariableStore,
    builtins: &'a FxHashMap<String, String>,
    time_range: Option<&'a TimeRange>,
    timezone: &'a TimeZoneSpec,
}

impl Renderer<'_> {
    fn replace(
        &self,
        target: &str,
        scoped: Option<&ScopedVars>,
        format: Option<VariableFormat>,
        depth: u8,
    ) -> String {
        let tokenizer = Tokenizer::new(target);
        if !tokenizer.has_variables() {
            return target.to_string();
        }
        tokenizer.render_with(|_, var| {
            let format = var
                .format
                .as_deref()
                .and_then(|f| f.parse::<VariableFormat>().ok())
                .or(format)
                .unwrap_or_default();
            self.resolve(&var.name, scoped, format, depth)
        })
    }

    fn resolve(
        &self,
        name: &str,
        scoped: Option<&ScopedVars>,
        format: VariableFormat,
        depth: u8,
    ) -> Option<String> {
        if let Some(over) = scoped.and_then(|s| s.get(name)) {
            return Some(format_value(&over.value, format, name, &over.text));
        }
        if let Some(variable) = self.store.get(name) {
            return Some(self.variable_value(variable, scoped, format, depth));
        }
        self.builtin_value(name, scoped, format)
    }

    fn variable_value(
        &self,
        variable: &Variable,
        scoped: Option<&ScopedVars>,
        format: VariableFormat,
        depth: u8,
    ) -> String {
        if matches!(variable.kind, VariableKind::AdHoc(_)) {
            return String::new();
        }

        let name = variable.name();
        let current = variable.current();
        if let Some(builtin) = self.builtin_for_value(&current.value) {
            return format_value(&OptionValue::Single(builtin.clone()), format, name, &current.text);
        }

        if variable.is_all_selected() {
            let custom = variable
                .selection_policy()
                .and_then(SelectionPolicy::custom_all_value);
            if let Some(all_value) = custom {
                if depth >= MAX_ALL_VALUE_DEPTH {
                    return all_value.to_string();
                }
                return self.replace(all_value, scoped, None, depth + 1);
            }
            let values = OptionValue::Multi(variable.all_option_values());
            return format_value(&values, format, name, &current.text);
        }

        format_value(&current.value, format, name, &current.text)
    }

    /// A current value such as `$__auto_interval_x` points into the builtin
    /// table.
    fn builtin_for_value(&self, value: &OptionValue) -> Option<&String> {
        match value {
            OptionValue::Single(v) => v
                .strip_prefix('$')
                .filter(|key| key.starts_with("__"))
                .and_then(|key| self.builtins.get(key)),
            OptionValue::Multi(_) => None,
        }
    }

    fn builtin_value(
        &self,
        name: &str,
        scoped: Option<&ScopedVars>,
        format: VariableFormat,
    ) -> Option<String> {
        match name {
            ALL_VARIABLES => Some(to_url_params(
                self.url_pairs(scoped).iter().map(|(k, v)| (k, v)),
            )),
            URL_TIME_RANGE => self.time_range.map(url_time_range),
            TIMEZONE => {
                let tz = self.timezone.name();
                Some(format_value(&OptionValue::Single(tz.clone()), format, name, &tz))
            }
            _ => self
                .builtins
                .get(name)
                .map(|v| format_value(&OptionValue::Single(v.clone()), format, name, v)),
        }
    }

    fn text_value(&self, name: &str, scoped: Option<&ScopedVars>) -> Option<String> {
        if let Some(over) = scoped.and_then(|s| s.get(name)) {
            return Some(over.text.clone());
        }
        let variable = self.store.get(name)?;
        let current = variable.current();
        Some(
            self.builtin_for_value(&current.value)
                .cloned()
                .unwrap_or_else(|| current.text.clone()),
        )
    }

    /// `var-<name>` pairs in declaration order, scoped overrides first.
    fn url_pairs(&self, scoped: Option<&ScopedVars>) -> Vec<(String, UrlValue)> {
        let mut pairs = Vec::with_capacity(self.store.list.len());
        for variable in &self.store.list {
            let name = variable.name();
            if let Some(over) = scoped.and_then(|s| s.get(name)) {
                if !over.skip_url_sync {
                    pairs.push((url_key(name), over.value.clone()));
                }
                continue;
            }
            if variable.state.skip_url_sync {
                continue;
            }
            pairs.push((url_key(name), variable.value_for_url()));
        }
        pairs
    }

    fn is_known(&self, name: &str) -> bool {
        self.store.get(name).is_some()
            || COMPUTED_BUILTINS.contains(&name)
            || self.builtins.contains_key(name)
    }
}

/// `from=..&to=..`, keeping relative expressions and writing absolute bounds
/// as epoch milliseconds.
fn url_time_range(range: &TimeRange) -> String {
    let side = |raw: &str, instant: &chrono::DateTime<chrono::Utc>| {
        if datemath::is_relative(raw) {
            encode_url_param(raw)
        } else {
            instant.timestamp_millis().to_string()
        }
    };
    format!(
        "from={}&to={}",
        side(&range.raw.from, &range.from),
        side(&range.raw.to, &range.to)
    )
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Owns the variables of one dashboard and interpolates them.
#[derive(Debug, Default)]
pub struct TemplateSrv {
    store: RwLock<VariableStore>,
    builtins: RwLock<FxHashMap<String, String>>,
    time_range: RwLock<Option<TimeRange>>,
    timezone: RwLock<TimeZoneSpec>,
}

impl TemplateSrv {
    pub fn new(timezone: TimeZoneSpec) -> Self {
        Self {
            timezone: RwLock::new(timezone),
            ..Self::default()
        }
    }

    /// Replace the variable list wholesale.
    pub fn init(&self, variables: Vec<Variable>, time_range: Option<TimeRange>) {
        *self.store.write() = VariableStore::from_list(variables);
        *self.time_range.write() = time_range;
    }

    fn with_renderer<R>(&self, f: impl FnOnce(&Renderer<'_>) -> R) -> R {
        let store = self.store.read();
        let builtins = self.builtins.read();
        let time_range = self.time_range.read();
        let timezone = self.timezone.read();
        let renderer = Renderer {
            store: &store,
            builtins: &builtins,
            time_range: time_range.as_ref(),
            timezone: &timezone,
        };
        f(&renderer)
    }

    /* ───────────────────────── variable list ───────────────────────── */

    /// Snapshot of all variables in declaration order.
    pub fn variables(&self) -> Vec<Variable> {
        self.store.read().list.clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.store
            .read()
            .list
            .iter()
            .map(|v| v.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.store.read().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, name: &str) -> Option<Variable> {
        self.store.read().get(name).cloned()
    }

    pub fn with_variable<R>(&self, name: &str, f: impl FnOnce(&Variable) -> R) -> Option<R> {
        self.store.read().get(name).map(f)
    }

    pub fn update_variable<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Variable) -> R,
    ) -> Option<R> {
        self.store.write().get_mut(name).map(f)
    }

    /// Store `variable`, replacing the one with the same name.
    /// Returns false when no such variable exists.
    pub fn put(&self, variable: Variable) -> bool {
        let mut store = self.store.write();
        match store.get_mut(variable.name()) {
            Some(slot) => {
                *slot = variable;
                true
            }
            None => false,
        }
    }

    /// Append a new variable after validating its name.
    pub fn add(&self, variable: Variable) -> Result<(), VariableError> {
        let mut store = self.store.write();
        validate_name(variable.name(), store.index.keys().map(String::as_str))?;
        store.list.push(variable);
        store.update_index();
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Option<Variable> {
        let mut store = self.store.write();
        let position = *store.index.get(name)?;
        let removed = store.list.remove(position);
        store.update_index();
        Some(removed)
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<(), VariableError> {
        let mut store = self.store.write();
        if store.get(old).is_none() {
            return Err(VariableError::not_found(old));
        }
        validate_name(
            new,
            store.index.keys().map(String::as_str).filter(|n| *n != old),
        )?;
        if let Some(variable) = store.get_mut(old) {
            variable.state.name = new.to_string();
        }
        store.update_index();
        Ok(())
    }

    /* ───────────────────────── interpolation ───────────────────────── */

    /// Substitute every known token in `target`.
    ///
    /// `format` applies to tokens without a `:format` suffix of their own;
    /// `None` means raw.
    pub fn replace(
        &self,
        target: &str,
        scoped_vars: Option<&ScopedVars>,
        format: Option<VariableFormat>,
    ) -> String {
        self.with_renderer(|r| r.replace(target, scoped_vars, format, 0))
    }

    /// Like [`replace`](Self::replace) but substitutes display texts.
    pub fn replace_with_text(&self, target: &str, scoped_vars: Option<&ScopedVars>) -> String {
        let tokenizer = Tokenizer::new(target);
        if !tokenizer.has_variables() {
            return target.to_string();
        }
        self.with_renderer(|r| tokenizer.render_with(|_, var| r.text_value(&var.name, scoped_vars)))
    }

    pub fn contains_template(&self, target: &str) -> bool {
        Tokenizer::new(target).has_variables()
    }

    pub fn get_variable_name(&self, expression: &str) -> Option<String> {
        dashvars_parse::get_variable_name(expression)
    }

    /// True when `expression` names a declared variable.
    pub fn variable_exists(&self, expression: &str) -> bool {
        self.get_variable_name(expression)
            .is_some_and(|name| self.store.read().get(&name).is_some())
    }

    /// HTML-escape `input` and wrap known variables and builtins in
    /// `<span class="template-variable">`.
    pub fn highlight_variables_as_html(&self, input: &str) -> String {
        let escaped = escape_html(input);
        let tokenizer = Tokenizer::new(&escaped);
        if !tokenizer.has_variables() {
            return escaped;
        }
        self.with_renderer(|r| {
            tokenizer.render_with(|token, var| {
                r.is_known(&var.name)
                    .then(|| format!(r#"<span class="template-variable">{}</span>"#, token.value))
            })
        })
    }

    /// Write `var-<name>` entries for every variable into `params`.
    pub fn fill_variable_values_for_url(&self, params: &mut UrlParams, scoped_vars: Option<&ScopedVars>) {
        let pairs = self.with_renderer(|r| r.url_pairs(scoped_vars));
        params.extend(pairs);
    }

    /// Filters of the ad-hoc variables bound to `datasource_name`; unbound
    /// ad-hoc variables apply to every datasource.
    pub fn get_adhoc_filters(&self, datasource_name: &str) -> Vec<AdHocFilter> {
        self.with_renderer(|r| {
            let mut filters = Vec::new();
            for variable in &r.store.list {
                let VariableKind::AdHoc(adhoc) = &variable.kind else {
                    continue;
                };
                let applies = match adhoc.datasource.as_deref() {
                    None => true,
                    Some(ds) if ds == datasource_name => true,
                    Some(ds) if ds.starts_with('$') => r.replace(ds, None, None, 0) == datasource_name,
                    Some(_) => false,
                };
                if applies {
                    filters.extend(adhoc.filters.iter().cloned());
                }
            }
            filters
        })
    }

    /* ─────────────────────────── builtins ──────────────────────────── */

    pub fn set_builtin(&self, name: &str, value: &str) {
        self.builtins
            .write()
            .insert(name.trim_start_matches('$').to_string(), value.to_string());
    }

    pub fn builtin(&self, name: &str) -> Option<String> {
        self.builtins.read().get(name.trim_start_matches('$')).cloned()
    }

    /// Bind `$__interval` and `$__interval_ms`.
    pub fn set_query_interval(&self, interval_ms: f64) {
        let mut builtins = self.builtins.write();
        builtins.insert(INTERVAL.to_string(), seconds_to_hms(interval_ms / 1000.0));
        builtins.insert(INTERVAL_MS.to_string(), format!("{}", interval_ms.round() as i64));
    }

    pub fn update_time_range(&self, range: TimeRange) {
        *self.time_range.write() = Some(range);
    }

    pub fn time_range(&self) -> Option<TimeRange> {
        self.time_range.read().clone()
    }

    pub fn timezone(&self) -> TimeZoneSpec {
        self.timezone.read().clone()
    }

    pub fn set_timezone(&self, timezone: TimeZoneSpec) {
        *self.timezone.write() = timezone;
    }
}
