//! Rendering a variable value for a target dialect.

use std::fmt;
use std::str::FromStr;

use dashvars_common::OptionValue;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::url_sync::{encode_uri_component, encode_url_param, url_key};

static LUCENE_SPECIAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([!*+\-=<>\s&|()\[\]{}^~?:\\/"])"#).expect("lucene escape pattern is valid")
});

static REGEX_SPECIAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\\^$*+?.()|\[\]{}/])").expect("regex escape pattern is valid"));

/// How a value is rendered into the surrounding text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VariableFormat {
    /// Values joined with `,`.
    #[default]
    Raw,
    /// `{a,b}` for more than one value.
    Glob,
    /// `a|b`
    Pipe,
    /// `("a" OR "b")`, Lucene-escaped.
    Lucene,
    /// `(a|b)`, regex-escaped.
    Regex,
    /// `a,name=b,name=c`
    Distributed,
    Csv,
    Json,
    /// `encodeURIComponent`; lists are encoded as `{a,b}`.
    PercentEncode,
    /// `'a','b'`
    SingleQuote,
    /// `"a","b"`
    DoubleQuote,
    /// `'a','b'` with `'` doubled.
    SqlString,
    /// The selection's display text.
    Text,
    /// `var-name=a&var-name=b`
    QueryParam,
}

impl VariableFormat {
    pub const ALL: [VariableFormat; 14] = [
        VariableFormat::Raw,
        VariableFormat::Glob,
        VariableFormat::Pipe,
        VariableFormat::Lucene,
        VariableFormat::Regex,
        VariableFormat::Distributed,
        VariableFormat::Csv,
        VariableFormat::Json,
        VariableFormat::PercentEncode,
        VariableFormat::SingleQuote,
        VariableFormat::DoubleQuote,
        VariableFormat::SqlString,
        VariableFormat::Text,
        VariableFormat::QueryParam,
    ];

    pub fn name(self) -> &'static str {
        match self {
            VariableFormat::Raw => "raw",
            VariableFormat::Glob => "glob",
            VariableFormat::Pipe => "pipe",
            VariableFormat::Lucene => "lucene",
            VariableFormat::Regex => "regex",
            VariableFormat::Distributed => "distributed",
            VariableFormat::Csv => "csv",
            VariableFormat::Json => "json",
            VariableFormat::PercentEncode => "percentencode",
            VariableFormat::SingleQuote => "singlequote",
            VariableFormat::DoubleQuote => "doublequote",
            VariableFormat::SqlString => "sqlstring",
            VariableFormat::Text => "text",
            VariableFormat::QueryParam => "queryparam",
        }
    }
}

impl fmt::Display for VariableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VariableFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        VariableFormat::ALL
            .into_iter()
            .find(|f| f.name() == lower)
            .ok_or_else(|| format!("unknown format '{s}'"))
    }
}

pub fn lucene_escape(value: &str) -> String {
    LUCENE_SPECIAL.replace_all(value, r"\$1").into_owned()
}

pub fn regex_escape(value: &str) -> String {
    REGEX_SPECIAL.replace_all(value, r"\$1").into_owned()
}

fn quote_each(value: &OptionValue, quote: char) -> String {
    let escaped = format!("\\{quote}");
    value
        .as_slice()
        .iter()
        .map(|v| format!("{quote}{}{quote}", v.replace(quote, &escaped)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Render `value` in `format`. `name` is the variable name (used by the
/// distributed and queryparam dialects) and `text` its display text.
pub fn format_value(value: &OptionValue, format: VariableFormat, name: &str, text: &str) -> String {
    match format {
        VariableFormat::Raw | VariableFormat::Csv => value.join(","),
        VariableFormat::Glob => match value {
            OptionValue::Multi(values) if values.len() > 1 => format!("{{{}}}", values.join(",")),
            _ => value.join(","),
        },
        VariableFormat::Pipe => value.join("|"),
        VariableFormat::Lucene => match value {
            OptionValue::Single(v) => lucene_escape(v),
            OptionValue::Multi(values) if values.is_empty() => "__empty__".to_string(),
            OptionValue::Multi(values) => {
                let quoted: Vec<String> = values
                    .iter()
                    .map(|v| format!("\"{}\"", lucene_escape(v)))
                    .collect();
                format!("({})", quoted.join(" OR "))
            }
        },
        VariableFormat::Regex => match value {
            OptionValue::Single(v) => regex_escape(v),
            OptionValue::Multi(values) if values.len() == 1 => regex_escape(&values[0]),
            OptionValue::Multi(values) => {
                let escaped: Vec<String> = values.iter().map(|v| regex_escape(v)).collect();
                format!("({})", escaped.join("|"))
            }
        },
        VariableFormat::Distributed => match value {
            OptionValue::Multi(values) => {
                let mut parts = Vec::with_capacity(values.len());
                for (i, v) in values.iter().enumerate() {
                    if i == 0 {
                        parts.push(v.clone());
                    } else {
                        parts.push(format!("{name}={v}"));
                    }
                }
                parts.join(",")
            }
            OptionValue::Single(v) => v.clone(),
        },
        VariableFormat::Json => match value {
            OptionValue::Single(v) => serde_json::Value::from(v.as_str()).to_string(),
            OptionValue::Multi(values) => serde_json::Value::from(values.clone()).to_string(),
        },
        VariableFormat::PercentEncode => match value {
            OptionValue::Single(v) => encode_uri_component(v),
            OptionValue::Multi(values) => {
                encode_uri_component(&format!("{{{}}}", values.join(",")))
            }
        },
        VariableFormat::SingleQuote => quote_each(value, '\''),
        VariableFormat::DoubleQuote => quote_each(value, '"'),
        VariableFormat::SqlString => value
            .as_slice()
            .iter()
            .map(|v| format!("'{}'", v.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(","),
        VariableFormat::Text => text.to_string(),
        VariableFormat::QueryParam => {
            let key = encode_url_param(&url_key(name));
            value
                .as_slice()
                .iter()
                .map(|v| format!("{key}={}", encode_url_param(v)))
                .collect::<Vec<_>>()
                .join("&")
        }
    }
}
