use thiserror::Error;

/// Failure taxonomy shared by the workflow engine, the repayment ledger and the stores.
#[derive(Debug, Error)]
pub enum BenefitsError {
    /// No caller identity, or one that could not be resolved.
    #[error("caller identity is missing or invalid")]
    Unauthorized,

    /// Valid identity without the authority for this action, or acting out of turn.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Terminal state reached, or the decision at this level already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Store failures and anything unexpected. Never shown verbatim to callers.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type BenefitsResult<T> = Result<T, BenefitsError>;
