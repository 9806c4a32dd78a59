use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("invalid job id '{0}': must be a single path segment of [A-Za-z0-9_.-]")]
    InvalidJobId(String),

    #[error("unknown job status '{0}'")]
    UnknownStatus(String),

    #[error("unknown job kind '{0}'")]
    UnknownKind(String),
}

impl StoreError {
    pub fn backend(e: impl std::fmt::Display) -> Self {
        Self::Backend(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
