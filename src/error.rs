#[derive(thiserror::Error, Debug)]
pub enum EngagementError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("caller identity is missing or invalid")]
    Unauthenticated,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("action not allowed: cannot go from {from} to {to}")]
    ActionNotAllowed { from: String, to: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("record codec failure: {0}")]
    Codec(String),
}

impl EngagementError {
    /// Shorthand for the transition/turn rejection, which always names
    /// the current and requested state.
    pub fn not_allowed(from: impl ToString, to: impl ToString) -> Self {
        Self::ActionNotAllowed {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
