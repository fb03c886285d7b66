use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("No keys on loan to {holder}")]
    NoKeysOnLoan { holder: String },

    #[error("No keys selected for partial return")]
    EmptyReturnSelection,

    #[error("Storage error: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl AppError {
    /// True for the "nothing to act on" family (no open loans, empty selection).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::NoKeysOnLoan { .. } | AppError::EmptyReturnSelection
        )
    }
}
