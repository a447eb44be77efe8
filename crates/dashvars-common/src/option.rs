//! Option lists, selections and the shapes values take on their way in and
//! out of a URL.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Sentinel value of the synthetic "All" option.
pub const ALL_VARIABLE_VALUE: &str = "$__all";
/// Display text of the synthetic "All" option.
pub const ALL_VARIABLE_TEXT: &str = "All";
/// Display text of the placeholder option used when nothing resolved.
pub const NONE_VARIABLE_TEXT: &str = "None";
/// Separator used to build the display text of a multi selection.
pub const MULTI_VALUE_SEPARATOR: &str = " + ";

/// A value that is either a single string or a list of strings.
///
/// Used for selection values, URL query values and scoped overrides.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OptionValue {
    Single(String),
    Multi(Vec<String>),
}

impl Default for OptionValue {
    fn default() -> Self {
        OptionValue::Single(String::new())
    }
}

impl OptionValue {
    pub fn is_multi(&self) -> bool {
        matches!(self, OptionValue::Multi(_))
    }

    /// View the value as a list; a single value becomes a one-element slice.
    pub fn as_slice(&self) -> &[String] {
        match self {
            OptionValue::Single(v) => std::slice::from_ref(v),
            OptionValue::Multi(vs) => vs,
        }
    }

    /// Cast to the list form (`_.castArray` semantics).
    pub fn into_multi(self) -> Self {
        match self {
            OptionValue::Single(v) => OptionValue::Multi(vec![v]),
            multi => multi,
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.as_slice().to_vec()
    }

    /// First element, if any.
    pub fn first(&self) -> Option<&str> {
        self.as_slice().first().map(String::as_str)
    }

    /// True when this is exactly the All sentinel (`"$__all"` or `["$__all", ..]`).
    pub fn is_all_sentinel(&self) -> bool {
        match self {
            OptionValue::Single(v) => v == ALL_VARIABLE_VALUE,
            OptionValue::Multi(vs) => vs.first().is_some_and(|v| v == ALL_VARIABLE_VALUE),
        }
    }

    /// Join list values with `sep`; a single value is returned as is.
    pub fn join(&self, sep: &str) -> String {
        match self {
            OptionValue::Single(v) => v.clone(),
            OptionValue::Multi(vs) => vs.join(sep),
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Single(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Single(value)
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(values: Vec<String>) -> Self {
        OptionValue::Multi(values)
    }
}

impl From<Vec<&str>> for OptionValue {
    fn from(values: Vec<&str>) -> Self {
        OptionValue::Multi(values.into_iter().map(str::to_string).collect())
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join(","))
    }
}

/// Values read from or written to the URL query string.
pub type UrlValue = OptionValue;

/// One resolved candidate of a variable.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VariableOption {
    pub text: String,
    pub value: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub selected: bool,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "is_false"))]
    pub is_none: bool,
}

#[cfg(feature = "serde")]
fn is_false(b: &bool) -> bool {
    !*b
}

impl VariableOption {
    pub fn new(text: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            value: value.into(),
            selected: false,
            is_none: false,
        }
    }

    /// Option whose text and value are the same string.
    pub fn text_value(s: impl Into<String>) -> Self {
        let s = s.into();
        Self::new(s.clone(), s)
    }

    /// The synthetic "All" option, carrying a custom all value when given.
    pub fn all(all_value: Option<&str>) -> Self {
        Self::new(ALL_VARIABLE_TEXT, all_value.unwrap_or(ALL_VARIABLE_VALUE))
    }

    /// Placeholder used when a resolution produced no candidates.
    pub fn none() -> Self {
        Self {
            text: NONE_VARIABLE_TEXT.to_string(),
            value: String::new(),
            selected: false,
            is_none: true,
        }
    }
}

/// The active selection of a variable.
///
/// `text` is always the display form; for multi selections it is the
/// `" + "`-joined texts of the selected options while `value` holds the list.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Current {
    #[cfg_attr(feature = "serde", serde(default, deserialize_with = "de_text"))]
    pub text: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub value: OptionValue,
}

/// Older dashboards persist multi selections with a list as `text`.
#[cfg(feature = "serde")]
fn de_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(OptionValue::deserialize(deserializer)?.join(MULTI_VALUE_SEPARATOR))
}

impl Current {
    pub fn new(text: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        Self {
            text: text.into(),
            value: value.into(),
        }
    }

    /// Selection equal to a single option.
    pub fn from_option(option: &VariableOption) -> Self {
        Self::new(option.text.clone(), option.value.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.value.as_slice().iter().all(String::is_empty)
    }
}

/// A selection request before normalization: what a picker or a URL hands
/// over. Text may still be a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub text: OptionValue,
    pub value: OptionValue,
}

impl Selection {
    pub fn new(text: impl Into<OptionValue>, value: impl Into<OptionValue>) -> Self {
        Self {
            text: text.into(),
            value: value.into(),
        }
    }

    /// Selection where text equals value.
    pub fn value(value: impl Into<OptionValue>) -> Self {
        let value = value.into();
        Self {
            text: value.clone(),
            value,
        }
    }
}

impl From<&VariableOption> for Selection {
    fn from(option: &VariableOption) -> Self {
        Selection::new(option.text.clone(), option.value.clone())
    }
}

/// One key/operator/value filter of an ad-hoc variable.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdHocFilter {
    pub key: String,
    pub operator: String,
    pub value: String,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub condition: Option<String>,
}

impl AdHocFilter {
    pub fn new(key: impl Into<String>, operator: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            operator: operator.into(),
            value: value.into(),
            condition: None,
        }
    }
}
