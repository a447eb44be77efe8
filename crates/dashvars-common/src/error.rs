//! Variable resolution errors that are local to a single variable.
//!
//! - **`VariableErrorKind`** : what went wrong (query, regex, cycle, …)
//! - **`VariableError`**     : the kind plus an optional message and the
//!   name of the variable it belongs to
//!
//! None of these are fatal to a dashboard: the orchestrator collects them per
//! variable and keeps resolving everything else.

use std::{error::Error, fmt};

/// Every failure a variable can hit while being resolved or edited.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum VariableErrorKind {
    /// The metric-find call of a query variable failed.
    Query,
    /// No datasource could be found for a query or ad-hoc variable.
    Datasource,
    /// A regex filter did not compile.
    Regex,
    /// The variable is part of a dependency cycle.
    Cycle,
    /// A name that breaks the naming rules.
    InvalidName,
    /// A name that is already taken in the dashboard.
    DuplicateName,
    /// Lookup of an undeclared variable.
    NotFound,
    /// An interval string such as `5m` could not be parsed.
    Interval,
    /// A date-math expression could not be evaluated.
    DateMath,
    /// A result arrived after the dashboard it was requested for went away.
    Stale,
}

impl fmt::Display for VariableErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Query => "query failed",
            Self::Datasource => "datasource unavailable",
            Self::Regex => "invalid regex",
            Self::Cycle => "circular dependency",
            Self::InvalidName => "invalid name",
            Self::DuplicateName => "duplicate name",
            Self::NotFound => "not found",
            Self::Interval => "invalid interval",
            Self::DateMath => "invalid date math",
            Self::Stale => "stale result",
        })
    }
}

/// The error value passed around by variable models and the orchestrator.
///
/// Build one from a kind and attach detail as it becomes known:
///
/// ```
/// use dashvars_common::{VariableError, VariableErrorKind};
///
/// let err = VariableError::new(VariableErrorKind::Regex)
///     .with_message("unclosed group")
///     .for_variable("server");
/// assert_eq!(err.to_string(), "invalid regex: unclosed group (variable `server`)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableError {
    pub kind: VariableErrorKind,
    pub message: Option<String>,
    pub variable: Option<String>,
}

/* ───────────────────── Constructors & helpers ─────────────────────── */

impl From<VariableErrorKind> for VariableError {
    fn from(kind: VariableErrorKind) -> Self {
        Self {
            kind,
            message: None,
            variable: None,
        }
    }
}

impl VariableError {
    /// Basic constructor (no message, no variable).
    pub fn new(kind: VariableErrorKind) -> Self {
        kind.into()
    }

    /// Attach a human-readable explanation.
    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Attach the name of the variable the error belongs to.
    ///
    /// An already attached name is kept, so errors bubbling up through
    /// dependent variables still point at the variable that failed first.
    pub fn for_variable<S: Into<String>>(mut self, name: S) -> Self {
        if self.variable.is_none() {
            self.variable = Some(name.into());
        }
        self
    }

    pub fn query<S: Into<String>>(msg: S) -> Self {
        Self::new(VariableErrorKind::Query).with_message(msg)
    }

    pub fn not_found(name: &str) -> Self {
        Self::new(VariableErrorKind::NotFound)
            .with_message(format!("no variable named `{name}`"))
    }
}

/* ───────────────────────── Display / Error ────────────────────────── */

impl fmt::Display for VariableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if let Some(ref msg) = self.message {
            write!(f, ": {msg}")?;
        }

        if let Some(ref name) = self.variable {
            write!(f, " (variable `{name}`)")?;
        }

        Ok(())
    }
}

impl Error for VariableError {}

impl From<VariableError> for String {
    fn from(error: VariableError) -> Self {
        format!("{error}")
    }
}
