use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("invalid input: {0}")]
    Invalid(&'static str),
    #[error("invalid quality {0}: expected 0..=5")]
    InvalidQuality(i32),
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),
    #[error("conflict: {0}")]
    Conflict(&'static str),
    #[error("storage error: {0}")]
    Storage(&'static str),
}

impl CoreError {
    /// True when the input was rejected before anything was written.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            CoreError::Invalid(_) | CoreError::InvalidQuality(_) | CoreError::InvalidState(_)
        )
    }
}
