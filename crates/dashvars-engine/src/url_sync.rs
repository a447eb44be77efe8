//! Query-string plumbing: `var-<name>` parameters, percent-encoding and the
//! ad-hoc filter wire form.

use dashvars_common::{AdHocFilter, OptionValue, UrlValue};
use url::form_urlencoded;

use crate::traits::UrlParams;

/// Prefix of the query parameters that carry variable selections.
pub const VAR_PREFIX: &str = "var-";

/// Escape for `|` inside an ad-hoc filter segment.
const PIPE_ESCAPE: &str = "__gfp__";

pub fn url_key(name: &str) -> String {
    format!("{VAR_PREFIX}{name}")
}

/// `encodeURIComponent`: everything but `A-Z a-z 0-9 - _ . ! ~ * ' ( )` is
/// percent-encoded.
pub fn encode_uri_component(input: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(input.as_bytes()).collect();
    // byte_serialize writes spaces as '+' and escapes a literal '+' as %2B
    encoded
        .replace('+', "%20")
        .replace("%21", "!")
        .replace("%7E", "~")
        .replace("%27", "'")
        .replace("%28", "(")
        .replace("%29", ")")
}

/// Percent-encoding used for URL parameters: like [`encode_uri_component`]
/// but keeps `@ : $ , ;` readable.
pub fn encode_url_param(input: &str) -> String {
    encode_uri_component(input)
        .replace("%40", "@")
        .replace("%3A", ":")
        .replace("%24", "$")
        .replace("%2C", ",")
        .replace("%3B", ";")
}

/// Render `key=value` pairs; list values repeat the key.
pub fn to_url_params<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a UrlValue)>,
{
    let mut parts = Vec::new();
    for (key, value) in params {
        let key = encode_url_param(key);
        for item in value.as_slice() {
            parts.push(format!("{key}={}", encode_url_param(item)));
        }
    }
    parts.join("&")
}

/// Parse a query string (with or without the leading `?`).
pub fn parse_query(query: &str) -> UrlParams {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut params = UrlParams::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let value = value.into_owned();
        match params.remove(&*key) {
            None => {
                params.insert(key.into_owned(), OptionValue::Single(value));
            }
            Some(existing) => {
                let mut values = existing.to_vec();
                values.push(value);
                params.insert(key.into_owned(), OptionValue::Multi(values));
            }
        }
    }
    params
}

/// True when `url_value` would change the selection `current`.
///
/// A scalar URL value is compared as a one-element list against a list
/// selection.
pub fn is_url_value_different(current: &OptionValue, url_value: &UrlValue) -> bool {
    let url_value = if current.is_multi() {
        url_value.clone().into_multi()
    } else {
        url_value.clone()
    };
    &url_value != current
}

fn escape_filter_segment(segment: &str) -> String {
    segment.replace('|', PIPE_ESCAPE)
}

fn unescape_filter_segment(segment: &str) -> String {
    segment.replace(PIPE_ESCAPE, "|")
}

/// `key|operator|value`, with `|` inside a segment escaped.
pub fn encode_adhoc_filter(filter: &AdHocFilter) -> String {
    [&filter.key, &filter.operator, &filter.value]
        .map(|segment| escape_filter_segment(segment))
        .join("|")
}

/// Inverse of [`encode_adhoc_filter`]; malformed entries yield `None`.
pub fn decode_adhoc_filter(raw: &str) -> Option<AdHocFilter> {
    let mut parts = raw.split('|');
    let key = parts.next()?;
    let operator = parts.next()?;
    let value = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some(AdHocFilter::new(
        unescape_filter_segment(key),
        unescape_filter_segment(operator),
        unescape_filter_segment(value),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_component_matches_browser_escaping() {
        assert_eq!(encode_uri_component("a b+c"), "a%20b%2Bc");
        assert_eq!(encode_uri_component("{x,y}"), "%7Bx%2Cy%7D");
        assert_eq!(encode_uri_component("it's (ok)!~*"), "it's%20(ok)!~*");
        assert_eq!(encode_uri_component("é"), "%C3%A9");
    }

    #[test]
    fn url_params_keep_readable_punctuation() {
        let mut params = UrlParams::new();
        params.insert("var-host".into(), OptionValue::from(vec!["a:1", "b c"]));
        params.insert("from".into(), OptionValue::from("now-6h"));
        assert_eq!(
            to_url_params(params.iter()),
            "from=now-6h&var-host=a:1&var-host=b%20c"
        );
    }

    #[test]
    fn repeated_keys_become_lists() {
        let params = parse_query("?var-app=a&var-app=b&var-env=prod");
        assert_eq!(params["var-app"], OptionValue::from(vec!["a", "b"]));
        assert_eq!(params["var-env"], OptionValue::from("prod"));
    }

    #[test]
    fn scalar_url_value_matches_single_item_list() {
        let current = OptionValue::from(vec!["a"]);
        assert!(!is_url_value_different(&current, &OptionValue::from("a")));
        assert!(is_url_value_different(&current, &OptionValue::from("b")));
    }

    #[test]
    fn adhoc_filters_escape_pipes() {
        let filter = AdHocFilter::new("path", "=~", "a|b");
        let raw = encode_adhoc_filter(&filter);
        assert_eq!(raw, "path|=~|a__gfp__b");
        assert_eq!(decode_adhoc_filter(&raw), Some(filter));
        assert_eq!(decode_adhoc_filter("only|two"), None);
    }
}
