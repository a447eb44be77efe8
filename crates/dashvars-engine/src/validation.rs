//! Static checks over a dashboard's variable list, run without resolving
//! anything.

use std::fmt;

use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::graph::DependencyGraph;
use crate::variable::{Variable, validate_name};

/// One problem found in a variable list, located by a JSON-ish path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableIssue {
    pub path: String,
    pub message: String,
}

impl VariableIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for VariableIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Error)]
#[error("variable list has {} issue(s)", issues.len())]
pub struct ValidationError {
    pub issues: Vec<VariableIssue>,
}

/// Check names, duplicates, references to undeclared variables and
/// dependency cycles.
pub fn validate_variables(variables: &[Variable]) -> Result<(), ValidationError> {
    let mut issues = Vec::new();
    let mut seen: FxHashSet<&str> = FxHashSet::default();

    for (idx, variable) in variables.iter().enumerate() {
        let path = format!("list[{idx}].name");
        if let Err(err) = validate_name(variable.name(), seen.iter().copied()) {
            issues.push(VariableIssue::new(
                &path,
                err.message.unwrap_or_else(|| err.kind.to_string()),
            ));
        }
        seen.insert(variable.name());
    }

    let declared: FxHashSet<&str> = variables.iter().map(Variable::name).collect();
    for (idx, variable) in variables.iter().enumerate() {
        for name in variable.referenced_names() {
            // built-ins such as `$__interval` are always available
            if name.starts_with("__") || declared.contains(name.as_str()) {
                continue;
            }
            issues.push(VariableIssue::new(
                format!("list[{idx}]"),
                format!("references undeclared variable `{name}`"),
            ));
        }
    }

    let graph = DependencyGraph::from_variables(variables);
    for cycle in graph.init_schedule().cycles {
        let names: Vec<&str> = cycle.iter().map(|&id| graph.name(id)).collect();
        issues.push(VariableIssue::new(
            "list",
            format!("dependency cycle between {}", names.join(", ")),
        ));
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { issues })
    }
}
