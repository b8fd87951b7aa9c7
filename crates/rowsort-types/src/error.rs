use thiserror::Error;

#[derive(Error, Debug)]
pub enum SortError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Execution canceled")]
    Canceled,
}

impl SortError {
    /// True if this error is a cancellation request rather than a data or
    /// configuration problem.
    pub fn is_canceled(&self) -> bool {
        matches!(self, SortError::Canceled)
    }
}

pub type Result<T> = std::result::Result<T, SortError>;
