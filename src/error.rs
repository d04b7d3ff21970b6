use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient data: need at least {needed} observations, found {found}")]
    InsufficientData { needed: usize, found: usize },

    #[error("computation failed: {0}")]
    ComputationFailure(String),

    #[error("invalid series: {0}")]
    InvalidSeries(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Errors that fall back to a neutral result instead of failing the topic.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientData { .. } | EngineError::ComputationFailure(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
