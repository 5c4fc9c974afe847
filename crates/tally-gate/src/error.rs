/// Errors that can occur during gate evaluation.
///
/// A denial is not an error: it is reported through
/// [`GateResult`](crate::GateResult). Errors mean the gate could not decide.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// The facts handed to the gate contradict each other or the request.
    #[error("inconsistent facts: {0}")]
    InconsistentFacts(String),

    /// A stage returned an unexpected error.
    #[error("stage error in '{stage}': {message}")]
    StageError { stage: String, message: String },
}

impl GateError {
    /// Create a stage error with a name and message.
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageError {
            stage: stage.into(),
            message: message.into(),
        }
    }
}
