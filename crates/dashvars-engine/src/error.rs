use dashvars_common::VariableError;
use thiserror::Error;

/// Failures surfaced by the dashboard-level operations.
///
/// Per-variable problems are [`VariableError`]s; operations that touch many
/// variables collect them instead of stopping at the first one.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error(transparent)]
    Variable(#[from] VariableError),

    #[error("{} variable(s) failed to initialize", failures.len())]
    Init { failures: Vec<VariableError> },

    #[error("{} variable(s) failed to refresh", failures.len())]
    Refresh { failures: Vec<VariableError> },

    #[error("invalid dashboard model: {0}")]
    Model(#[from] serde_json::Error),
}

impl EngineError {
    /// The per-variable failures carried by this error.
    pub fn failures(&self) -> &[VariableError] {
        match self {
            EngineError::Init { failures } | EngineError::Refresh { failures } => failures,
            EngineError::Variable(err) => std::slice::from_ref(err),
            _ => &[],
        }
    }

    pub(crate) fn from_failures(
        failures: Vec<VariableError>,
        wrap: fn(Vec<VariableError>) -> EngineError,
    ) -> Result<(), EngineError> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(wrap(failures))
        }
    }
}
