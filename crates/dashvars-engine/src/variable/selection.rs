//! Selection normalization and reconciliation against a fresh option list.

use dashvars_common::{
    ALL_VARIABLE_TEXT, Current, MULTI_VALUE_SEPARATOR, OptionValue, Selection, UrlValue,
    VariableOption,
};

use super::{SelectionPolicy, VariableState};

/// Normalize `selection` into `state.current` and refresh the `selected`
/// flags of the options.
///
/// List texts are joined with `" + "`; a list value that is not the All
/// sentinel also dictates the text.
pub fn set_current(state: &mut VariableState, selection: Selection) {
    let Selection { text, value } = selection;
    let text = match (&text, &value) {
        (OptionValue::Multi(texts), _) if !texts.is_empty() => texts.join(MULTI_VALUE_SEPARATOR),
        (_, OptionValue::Multi(values)) if !value.is_all_sentinel() => {
            values.join(MULTI_VALUE_SEPARATOR)
        }
        (OptionValue::Single(text), _) => text.clone(),
        (OptionValue::Multi(_), _) => String::new(),
    };
    state.current = Current { text, value };
    mark_selected(state);
}

/// Flag every option that is part of the current selection.
pub fn mark_selected(state: &mut VariableState) {
    let values = state.current.value.as_slice();
    let all_selected = state.current.value.is_all_sentinel();
    for option in &mut state.options {
        option.selected = if all_selected {
            option.text == ALL_VARIABLE_TEXT
        } else {
            values.iter().any(|v| *v == option.value)
        };
    }
}

/// Re-point the selection at the current option list.
///
/// - an All selection on an include-all variable is kept as is;
/// - a list selection keeps the options whose values survived, falling back
///   to the first option as a scalar;
/// - a scalar selection is kept when an option with the same text exists,
///   otherwise the first option is selected.
///
/// With no options at all the selection is left alone.
pub fn validate_selection(state: &mut VariableState, policy: Option<&SelectionPolicy>) {
    if state.options.is_empty() {
        mark_selected(state);
        return;
    }

    if let Some(policy) = policy {
        if policy.include_all && is_all_current(state, policy) {
            mark_selected(state);
            return;
        }
    }

    let first = Selection::from(&state.options[0]);
    match &state.current.value {
        OptionValue::Multi(previous) => {
            let kept: Vec<&VariableOption> = state
                .options
                .iter()
                .filter(|o| previous.contains(&o.value))
                .collect();
            let selection = if kept.is_empty() {
                first
            } else {
                Selection::new(
                    kept.iter().map(|o| o.text.clone()).collect::<Vec<_>>(),
                    kept.iter().map(|o| o.value.clone()).collect::<Vec<_>>(),
                )
            };
            set_current(state, selection);
        }
        OptionValue::Single(_) => {
            let by_text = state
                .options
                .iter()
                .find(|o| o.text == state.current.text)
                .map(Selection::from);
            set_current(state, by_text.unwrap_or(first));
        }
    }
}

fn is_all_current(state: &VariableState, policy: &SelectionPolicy) -> bool {
    let value = &state.current.value;
    value.is_all_sentinel()
        || policy
            .custom_all_value()
            .is_some_and(|all| value.first() == Some(all))
}

/// Apply a value taken from the URL.
///
/// A matching option (by text or value) is selected as is; otherwise the
/// value is kept verbatim, with texts looked up per item for lists.
/// Multi-select variables always end up with list values.
pub fn set_from_url(state: &mut VariableState, policy: Option<&SelectionPolicy>, url_value: &UrlValue) {
    let matched = match url_value {
        OptionValue::Single(raw) => state
            .options
            .iter()
            .find(|o| o.text == *raw || o.value == *raw)
            .map(Selection::from),
        OptionValue::Multi(_) => None,
    };

    let mut selection = matched.unwrap_or_else(|| {
        let text = match url_value {
            OptionValue::Multi(items) => OptionValue::Multi(
                items
                    .iter()
                    .map(|item| {
                        state
                            .options
                            .iter()
                            .find(|o| o.value == *item)
                            .map(|o| o.text.clone())
                            .unwrap_or_else(|| item.clone())
                    })
                    .collect(),
            ),
            single => single.clone(),
        };
        Selection::new(text, url_value.clone())
    });

    if policy.is_some_and(|p| p.multi) {
        selection = Selection::new(selection.text.into_multi(), selection.value.into_multi());
    }

    set_current(state, selection);
}

/// The URL form of the selection: the literal `All` for an All selection,
/// the value otherwise.
pub fn value_for_url(state: &VariableState) -> UrlValue {
    if state.current.text == ALL_VARIABLE_TEXT {
        OptionValue::Single(ALL_VARIABLE_TEXT.to_string())
    } else {
        state.current.value.clone()
    }
}
