//! Structured error handling for the reactor core.

/// Errors produced by the instruction reactor.
///
/// Store failures are fatal to the current job run; a failed compare-and-set
/// is *not* an error and is reported through the `bool` return of
/// [`crate::store::InstructionStore::compare_and_set_status`].
#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, ReactorError>;
